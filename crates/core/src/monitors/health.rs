//! Monitor health model: per-source statistics, heartbeat staleness and
//! the aggregation rules that fold them into a monitor-wide status.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

/// Heartbeat age below which a monitor counts as actively running.
pub const HEARTBEAT_ACTIVE_SECS: i64 = 30;
/// Heartbeat age below which a monitor counts as stale rather than dead.
pub const HEARTBEAT_STALE_SECS: i64 = 300;

/// Consecutive failures at which an API source is considered failing.
pub const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 5;
/// Failure rate over the call window at which a source is failing.
pub const FAILURE_RATE_THRESHOLD: f64 = 0.5;
/// Minimum calls before the failure rate is meaningful.
pub const FAILURE_RATE_MIN_CALLS: u32 = 4;
/// Average response time above which a source is degraded, in seconds.
pub const SLOW_RESPONSE_SECS: f64 = 10.0;
/// Smoothing factor for the response-time EWMA.
pub const RESPONSE_TIME_EWMA_ALPHA: f64 = 0.2;

/// Monitor-wide health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorHealthStatusType {
    Healthy,
    Warning,
    Error,
    Disabled,
    Unknown,
}

impl MonitorHealthStatusType {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Warning | Self::Error)
    }

    /// Higher is worse. Disabled/Unknown sort below Healthy so they never
    /// mask a real problem.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Disabled => 0,
            Self::Healthy => 1,
            Self::Warning => 2,
            Self::Error => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Disabled => "Disabled",
            Self::Unknown => "Unknown",
        }
    }

    pub fn worst(statuses: impl IntoIterator<Item = Self>) -> Self {
        statuses
            .into_iter()
            .max_by_key(|s| s.severity())
            .unwrap_or(Self::Healthy)
    }
}

/// Heartbeat staleness derived from the last successful work cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatusType {
    Active,
    Stale,
    Dead,
}

impl HeartbeatStatusType {
    pub fn from_age_seconds(age_secs: i64) -> Self {
        if age_secs < HEARTBEAT_ACTIVE_SECS {
            Self::Active
        } else if age_secs < HEARTBEAT_STALE_SECS {
            Self::Stale
        } else {
            Self::Dead
        }
    }

    /// A heartbeat that was never seen counts as dead.
    pub fn from_last_heartbeat(last: Option<DateTime<Utc>>) -> Self {
        match last {
            None => Self::Dead,
            Some(ts) => Self::from_age_seconds((Utc::now() - ts).num_seconds()),
        }
    }

    pub fn to_monitor_status(&self) -> MonitorHealthStatusType {
        match self {
            Self::Active => MonitorHealthStatusType::Healthy,
            Self::Stale => MonitorHealthStatusType::Warning,
            Self::Dead => MonitorHealthStatusType::Error,
        }
    }
}

/// Health classification of one remote endpoint a monitor talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiSourceHealthStatusType {
    Healthy,
    Degraded,
    Failing,
    Unavailable,
}

impl ApiSourceHealthStatusType {
    /// Derive a status from the rolling statistics tuple.
    pub fn from_metrics(
        consecutive_failures: u32,
        total_failures: u32,
        total_calls: u32,
        average_response_time: Option<f64>,
    ) -> Self {
        if consecutive_failures >= CONSECUTIVE_FAILURE_THRESHOLD {
            return Self::Failing;
        }
        if total_calls >= FAILURE_RATE_MIN_CALLS {
            let failure_rate = f64::from(total_failures) / f64::from(total_calls);
            if failure_rate > FAILURE_RATE_THRESHOLD {
                return Self::Failing;
            }
        }
        if let Some(avg) = average_response_time {
            if avg > SLOW_RESPONSE_SECS {
                return Self::Degraded;
            }
        }
        Self::Healthy
    }

    pub fn to_monitor_status(&self) -> MonitorHealthStatusType {
        match self {
            Self::Healthy => MonitorHealthStatusType::Healthy,
            Self::Degraded => MonitorHealthStatusType::Warning,
            Self::Failing | Self::Unavailable => MonitorHealthStatusType::Error,
        }
    }
}

/// Rolling health statistics for one remote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSourceHealth {
    pub source_id: String,
    pub source_name: String,
    pub status: ApiSourceHealthStatusType,
    pub last_success: Option<DateTime<Utc>>,
    pub total_calls: u32,
    pub total_failures: u32,
    pub consecutive_failures: u32,
    pub average_response_time: Option<f64>,
    pub last_response_time: Option<f64>,
}

impl ApiSourceHealth {
    pub fn new(source_id: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source_name: source_name.into(),
            status: ApiSourceHealthStatusType::Healthy,
            last_success: None,
            total_calls: 0,
            total_failures: 0,
            consecutive_failures: 0,
            average_response_time: None,
            last_response_time: None,
        }
    }

    pub fn record_success(&mut self, response_time: Option<f64>) {
        self.total_calls += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
        self.track_response_time(response_time);
        self.status = ApiSourceHealthStatusType::from_metrics(
            self.consecutive_failures,
            self.total_failures,
            self.total_calls,
            self.average_response_time,
        );
    }

    pub fn record_failure(&mut self, response_time: Option<f64>) {
        self.total_calls += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.track_response_time(response_time);
        self.status = ApiSourceHealthStatusType::from_metrics(
            self.consecutive_failures,
            self.total_failures,
            self.total_calls,
            self.average_response_time,
        );
    }

    fn track_response_time(&mut self, response_time: Option<f64>) {
        let Some(rt) = response_time else { return };
        self.last_response_time = Some(rt);
        self.average_response_time = Some(match self.average_response_time {
            None => rt,
            Some(avg) => avg * (1.0 - RESPONSE_TIME_EWMA_ALPHA) + rt * RESPONSE_TIME_EWMA_ALPHA,
        });
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        f64::from(self.total_failures) / f64::from(self.total_calls)
    }
}

/// Health snapshot for one periodic monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorHealthStatus {
    pub status: MonitorHealthStatusType,
    pub last_check: DateTime<Utc>,
    pub error_message: Option<String>,
    pub error_count: u32,
    pub monitor_heartbeat: Option<DateTime<Utc>>,
    pub api_sources: Vec<ApiSourceHealth>,
}

impl MonitorHealthStatus {
    pub fn healthy() -> Self {
        Self {
            status: MonitorHealthStatusType::Healthy,
            last_check: Utc::now(),
            error_message: None,
            error_count: 0,
            monitor_heartbeat: None,
            api_sources: Vec::new(),
        }
    }

    pub fn get_api_source(&self, source_id: &str) -> Option<&ApiSourceHealth> {
        self.api_sources.iter().find(|s| s.source_id == source_id)
    }

    pub fn get_api_source_mut(&mut self, source_id: &str) -> Option<&mut ApiSourceHealth> {
        self.api_sources.iter_mut().find(|s| s.source_id == source_id)
    }

    /// Worst-case walk over the registered API sources. A monitor with no
    /// sources reports healthy here; the heartbeat is its only signal.
    pub fn overall_api_health(&self) -> ApiSourceHealthStatusType {
        let mut worst = ApiSourceHealthStatusType::Healthy;
        for source in &self.api_sources {
            match source.status {
                ApiSourceHealthStatusType::Unavailable => {
                    return ApiSourceHealthStatusType::Unavailable
                }
                ApiSourceHealthStatusType::Failing => worst = ApiSourceHealthStatusType::Failing,
                ApiSourceHealthStatusType::Degraded
                    if worst == ApiSourceHealthStatusType::Healthy =>
                {
                    worst = ApiSourceHealthStatusType::Degraded
                }
                _ => {}
            }
        }
        worst
    }

    pub fn heartbeat_status(&self) -> HeartbeatStatusType {
        HeartbeatStatusType::from_last_heartbeat(self.monitor_heartbeat)
    }
}

/// Policy mapping per-source health into an overall monitor status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthAggregationRule {
    HeartbeatOnly,
    AllHealthy,
    MajorityHealthy,
    AnyHealthy,
    Weighted,
}

impl HealthAggregationRule {
    /// Default rule by source count: no sources means the heartbeat is the
    /// only signal, a single source must be healthy, multiple sources vote.
    pub fn default_for_source_count(count: usize) -> Self {
        match count {
            0 => Self::HeartbeatOnly,
            1 => Self::AllHealthy,
            _ => Self::MajorityHealthy,
        }
    }
}

/// Fold the API source statuses into one monitor status using the rule.
pub fn aggregate_api_sources(
    api_sources: &[ApiSourceHealth],
    rule: HealthAggregationRule,
) -> MonitorHealthStatusType {
    if api_sources.is_empty() {
        return MonitorHealthStatusType::Healthy;
    }

    let statuses: Vec<MonitorHealthStatusType> = api_sources
        .iter()
        .map(|s| s.status.to_monitor_status())
        .collect();
    let healthy = statuses
        .iter()
        .filter(|s| **s == MonitorHealthStatusType::Healthy)
        .count();
    let warning = statuses
        .iter()
        .filter(|s| **s == MonitorHealthStatusType::Warning)
        .count();
    let error = statuses
        .iter()
        .filter(|s| **s == MonitorHealthStatusType::Error)
        .count();
    let total = statuses.len();

    match rule {
        HealthAggregationRule::HeartbeatOnly => MonitorHealthStatusType::Healthy,
        HealthAggregationRule::AllHealthy => {
            if error > 0 {
                MonitorHealthStatusType::Error
            } else if warning > 0 {
                MonitorHealthStatusType::Warning
            } else {
                MonitorHealthStatusType::Healthy
            }
        }
        HealthAggregationRule::MajorityHealthy => {
            let majority = total / 2 + 1;
            if error >= majority {
                MonitorHealthStatusType::Error
            } else if error + warning >= majority {
                MonitorHealthStatusType::Warning
            } else {
                MonitorHealthStatusType::Healthy
            }
        }
        HealthAggregationRule::AnyHealthy => {
            if healthy > 0 {
                MonitorHealthStatusType::Healthy
            } else if warning > 0 {
                MonitorHealthStatusType::Warning
            } else {
                MonitorHealthStatusType::Error
            }
        }
        HealthAggregationRule::Weighted => {
            warn!("Weighted health aggregation not implemented, using majority rule");
            aggregate_api_sources(api_sources, HealthAggregationRule::MajorityHealthy)
        }
    }
}

/// Overall monitor status: the worst of the heartbeat-derived status and
/// the API-source aggregate.
pub fn overall_monitor_health(
    health: &MonitorHealthStatus,
    rule: Option<HealthAggregationRule>,
) -> MonitorHealthStatusType {
    let rule =
        rule.unwrap_or_else(|| HealthAggregationRule::default_for_source_count(health.api_sources.len()));
    let heartbeat = health.heartbeat_status().to_monitor_status();
    let api = aggregate_api_sources(&health.api_sources, rule);
    MonitorHealthStatusType::worst([heartbeat, api])
}

/// Hysteresis: a transition fires only when severity actually changes, so
/// equal-severity recalculations don't flap the displayed status.
pub fn should_update_status(
    current: MonitorHealthStatusType,
    calculated: MonitorHealthStatusType,
) -> bool {
    calculated.severity() != current.severity()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn heartbeat_bands() {
        assert_eq!(HeartbeatStatusType::from_age_seconds(5), HeartbeatStatusType::Active);
        assert_eq!(HeartbeatStatusType::from_age_seconds(60), HeartbeatStatusType::Stale);
        assert_eq!(HeartbeatStatusType::from_age_seconds(301), HeartbeatStatusType::Dead);
        assert_eq!(
            HeartbeatStatusType::from_last_heartbeat(None),
            HeartbeatStatusType::Dead
        );
    }

    #[test]
    fn stale_heartbeat_downgrades_overall_health() {
        let mut health = MonitorHealthStatus::healthy();
        health.monitor_heartbeat = Some(Utc::now() - Duration::seconds(301));
        assert_eq!(
            overall_monitor_health(&health, None),
            MonitorHealthStatusType::Error
        );
        health.monitor_heartbeat = Some(Utc::now() - Duration::seconds(60));
        assert_eq!(
            overall_monitor_health(&health, None),
            MonitorHealthStatusType::Warning
        );
    }

    #[test]
    fn failure_rate_trips_failing_and_success_resets() {
        let mut source = ApiSourceHealth::new("nws", "National Weather Service");
        for _ in 0..4 {
            source.record_failure(Some(0.1));
        }
        // Four straight failures exceed the rate threshold over a small window.
        assert_eq!(source.status, ApiSourceHealthStatusType::Failing);

        source.record_success(Some(0.1));
        assert_eq!(source.consecutive_failures, 0);
        assert!(source.last_success.is_some());
    }

    #[test]
    fn consecutive_failures_trip_failing_even_with_good_history() {
        let mut source = ApiSourceHealth::new("src", "Source");
        for _ in 0..20 {
            source.record_success(Some(0.1));
        }
        for _ in 0..CONSECUTIVE_FAILURE_THRESHOLD {
            source.record_failure(Some(0.1));
        }
        assert_eq!(source.status, ApiSourceHealthStatusType::Failing);
    }

    #[test]
    fn slow_responses_degrade_a_source() {
        let mut source = ApiSourceHealth::new("slow", "Slow Source");
        for _ in 0..10 {
            source.record_success(Some(30.0));
        }
        assert_eq!(source.status, ApiSourceHealthStatusType::Degraded);
    }

    #[test]
    fn response_time_ewma_converges() {
        let mut source = ApiSourceHealth::new("s", "S");
        source.record_success(Some(1.0));
        assert_eq!(source.average_response_time, Some(1.0));
        source.record_success(Some(2.0));
        let avg = source.average_response_time.unwrap();
        assert!((avg - 1.2).abs() < 1e-9);
    }

    #[test]
    fn default_rule_depends_on_source_count() {
        assert_eq!(
            HealthAggregationRule::default_for_source_count(0),
            HealthAggregationRule::HeartbeatOnly
        );
        assert_eq!(
            HealthAggregationRule::default_for_source_count(1),
            HealthAggregationRule::AllHealthy
        );
        assert_eq!(
            HealthAggregationRule::default_for_source_count(3),
            HealthAggregationRule::MajorityHealthy
        );
    }

    #[test]
    fn majority_rule_votes() {
        let mut healthy = ApiSourceHealth::new("a", "A");
        healthy.record_success(Some(0.1));
        let mut failing = ApiSourceHealth::new("b", "B");
        for _ in 0..5 {
            failing.record_failure(None);
        }

        let sources = vec![healthy.clone(), failing.clone()];
        assert_eq!(
            aggregate_api_sources(&sources, HealthAggregationRule::MajorityHealthy),
            MonitorHealthStatusType::Error
        );

        let sources = vec![healthy.clone(), healthy.clone(), failing];
        assert_eq!(
            aggregate_api_sources(&sources, HealthAggregationRule::MajorityHealthy),
            MonitorHealthStatusType::Healthy
        );
    }

    #[test]
    fn any_healthy_rule_tolerates_failures() {
        let mut healthy = ApiSourceHealth::new("a", "A");
        healthy.record_success(Some(0.1));
        let mut failing = ApiSourceHealth::new("b", "B");
        for _ in 0..5 {
            failing.record_failure(None);
        }
        assert_eq!(
            aggregate_api_sources(&[healthy, failing], HealthAggregationRule::AnyHealthy),
            MonitorHealthStatusType::Healthy
        );
    }

    #[test]
    fn hysteresis_requires_a_severity_change() {
        assert!(!should_update_status(
            MonitorHealthStatusType::Healthy,
            MonitorHealthStatusType::Healthy
        ));
        assert!(should_update_status(
            MonitorHealthStatusType::Healthy,
            MonitorHealthStatusType::Warning
        ));
        assert!(should_update_status(
            MonitorHealthStatusType::Error,
            MonitorHealthStatusType::Healthy
        ));
    }
}
