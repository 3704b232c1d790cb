//! Cooperative periodic task lifecycle:
//! `start -> initialize -> loop { do_work; sleep(interval) } -> cleanup`.
//!
//! Errors never terminate the loop; each one is classified and recorded on
//! the health snapshot, then the loop sleeps and retries.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::errors::Result;

use super::health::{
    ApiSourceHealth, MonitorHealthStatus, MonitorHealthStatusType,
};

/// Fraction of the interval above which a slow work cycle is logged.
const SLOW_CYCLE_FRACTION: f64 = 0.5;

/// Message keywords that downgrade an error to a warning.
const WARNING_KEYWORDS: [&str; 3] = ["temporary", "timeout", "network"];

/// Consecutive failed cycles before a monitor escalates to error.
const ERROR_ESCALATION_COUNT: u32 = 5;

/// Thread-safe holder for a monitor's health snapshot, shared between the
/// monitor implementation and the runner loop.
#[derive(Default)]
pub struct HealthTracker {
    inner: Mutex<Option<MonitorHealthStatus>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Some(MonitorHealthStatus::healthy())),
        }
    }

    pub fn snapshot(&self) -> MonitorHealthStatus {
        self.inner
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(MonitorHealthStatus::healthy)
    }

    fn update(&self, status: MonitorHealthStatusType, error_message: Option<String>) {
        let mut guard = self.inner.lock().unwrap();
        let health = guard.get_or_insert_with(MonitorHealthStatus::healthy);
        health.error_count = if status.is_error() {
            health.error_count + 1
        } else {
            0
        };
        health.status = status;
        health.last_check = Utc::now();
        health.error_message = error_message;
    }

    pub fn mark_healthy(&self, message: impl Into<String>) {
        self.update(MonitorHealthStatusType::Healthy, Some(message.into()));
    }

    /// Classify and record a work-cycle error. Messages mentioning
    /// transient symptoms stay at warning; anything else starts as a
    /// warning and escalates to error once failures persist.
    pub fn record_error(&self, error_message: impl Into<String>) {
        let message = error_message.into();
        let lowered = message.to_lowercase();
        let transient = WARNING_KEYWORDS.iter().any(|kw| lowered.contains(kw));

        let consecutive_errors = self.snapshot().error_count + 1;
        let status = if transient || consecutive_errors < ERROR_ESCALATION_COUNT {
            MonitorHealthStatusType::Warning
        } else {
            MonitorHealthStatusType::Error
        };
        self.update(status, Some(message));
    }

    pub fn record_cancelled(&self) {
        self.update(MonitorHealthStatusType::Error, Some("cancelled".into()));
    }

    /// Updated after each successful work cycle.
    pub fn touch_heartbeat(&self) {
        let mut guard = self.inner.lock().unwrap();
        let health = guard.get_or_insert_with(MonitorHealthStatus::healthy);
        health.monitor_heartbeat = Some(Utc::now());
    }

    pub fn register_api_source(&self, source_id: impl Into<String>, source_name: impl Into<String>) {
        let source_id = source_id.into();
        let mut guard = self.inner.lock().unwrap();
        let health = guard.get_or_insert_with(MonitorHealthStatus::healthy);
        if health.get_api_source(&source_id).is_none() {
            health
                .api_sources
                .push(ApiSourceHealth::new(source_id, source_name));
        }
    }

    /// Track one remote call against a registered source.
    pub fn track_api_call(&self, source_id: &str, success: bool, response_time: Option<f64>) {
        let mut guard = self.inner.lock().unwrap();
        let health = guard.get_or_insert_with(MonitorHealthStatus::healthy);
        let Some(source) = health.get_api_source_mut(source_id) else {
            warn!("Tracked API call for unknown source: {source_id}");
            return;
        };
        if success {
            source.record_success(response_time);
        } else {
            source.record_failure(response_time);
        }
    }
}

/// A task that polls an external source on a cadence.
#[async_trait]
pub trait PeriodicMonitor: Send + Sync {
    fn id(&self) -> &str;

    fn interval(&self) -> Duration;

    fn health(&self) -> &HealthTracker;

    /// One-time setup before the first work cycle.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// One work cycle. Failures are recorded on the health snapshot by the
    /// runner; they never terminate the loop.
    async fn do_work(&self) -> Result<()>;

    /// Teardown after the loop exits, including on cancellation.
    async fn cleanup(&self) {}
}

/// Handle to a spawned monitor task.
pub struct MonitorHandle {
    stop_requested: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Request termination. Idempotent and non-blocking; the loop exits
    /// after the current sleep.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        // Wake the sleep so a long interval does not delay shutdown.
        self.cancel.notify_one();
    }

    /// Host-level cancellation: propagates through the sleep, runs cleanup
    /// and marks the monitor health as cancelled.
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Spawn the monitor's run loop on the current tokio runtime.
pub fn spawn_monitor(monitor: Arc<dyn PeriodicMonitor>) -> MonitorHandle {
    let stop_requested = Arc::new(AtomicBool::new(false));
    let cancel = Arc::new(Notify::new());

    let stop_flag = Arc::clone(&stop_requested);
    let cancel_signal = Arc::clone(&cancel);
    let join = tokio::spawn(async move {
        run_monitor(monitor, stop_flag, cancel_signal).await;
    });

    MonitorHandle {
        stop_requested,
        cancel,
        join,
    }
}

async fn run_monitor(
    monitor: Arc<dyn PeriodicMonitor>,
    stop_requested: Arc<AtomicBool>,
    cancel: Arc<Notify>,
) {
    let id = monitor.id().to_string();
    let interval = monitor.interval();
    info!("Monitor {id} starting (interval: {}s)", interval.as_secs());

    match monitor.initialize().await {
        Ok(()) => monitor.health().mark_healthy("Monitor initialized successfully"),
        Err(err) => {
            monitor.health().record_error(format!("Initialization failed: {err}"));
        }
    }

    let mut cancelled = false;
    let mut cycle: u64 = 0;
    while !stop_requested.load(Ordering::SeqCst) {
        cycle += 1;
        let started = std::time::Instant::now();
        match monitor.do_work().await {
            Ok(()) => {
                monitor.health().touch_heartbeat();
                let elapsed = started.elapsed();
                debug!("Monitor {id} cycle {cycle} completed in {:.2}s", elapsed.as_secs_f64());
                if elapsed.as_secs_f64() > interval.as_secs_f64() * SLOW_CYCLE_FRACTION {
                    warn!(
                        "Monitor {id} cycle {cycle} took {:.2}s, over half the {}s interval",
                        elapsed.as_secs_f64(),
                        interval.as_secs()
                    );
                }
            }
            Err(err) => {
                warn!("Monitor {id} cycle {cycle} failed: {err}");
                monitor.health().record_error(format!("Work cycle failed: {err}"));
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.notified() => {
                if !stop_requested.load(Ordering::SeqCst) {
                    cancelled = true;
                }
                break;
            }
        }
    }

    if cancelled {
        info!("Monitor {id} cancelled");
        monitor.health().record_cancelled();
    }
    monitor.cleanup().await;
    info!("Monitor {id} stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingMonitor {
        health: HealthTracker,
        work_count: AtomicU32,
        cleanup_count: AtomicU32,
        fail_with: Mutex<Option<String>>,
    }

    impl CountingMonitor {
        fn new() -> Self {
            Self {
                health: HealthTracker::new(),
                work_count: AtomicU32::new(0),
                cleanup_count: AtomicU32::new(0),
                fail_with: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl PeriodicMonitor for CountingMonitor {
        fn id(&self) -> &str {
            "counting-monitor"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        fn health(&self) -> &HealthTracker {
            &self.health
        }

        async fn do_work(&self) -> Result<()> {
            self.work_count.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = self.fail_with.lock().unwrap().clone() {
                return Err(crate::Error::Temporary(message));
            }
            Ok(())
        }

        async fn cleanup(&self) {
            self.cleanup_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn monitor_runs_cycles_and_stops_cleanly() {
        let monitor = Arc::new(CountingMonitor::new());
        let handle = spawn_monitor(monitor.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        handle.join().await;

        assert!(monitor.work_count.load(Ordering::SeqCst) >= 2);
        assert_eq!(monitor.cleanup_count.load(Ordering::SeqCst), 1);
        // A graceful stop is not an error condition.
        assert_eq!(
            monitor.health.snapshot().status,
            MonitorHealthStatusType::Healthy
        );
    }

    #[tokio::test]
    async fn cancellation_runs_cleanup_and_marks_error() {
        let monitor = Arc::new(CountingMonitor::new());
        let handle = spawn_monitor(monitor.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
        handle.join().await;

        assert_eq!(monitor.cleanup_count.load(Ordering::SeqCst), 1);
        let health = monitor.health.snapshot();
        assert_eq!(health.status, MonitorHealthStatusType::Error);
        assert_eq!(health.error_message.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn failures_do_not_terminate_the_loop() {
        let monitor = Arc::new(CountingMonitor::new());
        *monitor.fail_with.lock().unwrap() = Some("temporary glitch".into());
        let handle = spawn_monitor(monitor.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(monitor.work_count.load(Ordering::SeqCst) >= 2);
        assert_eq!(
            monitor.health.snapshot().status,
            MonitorHealthStatusType::Warning
        );

        *monitor.fail_with.lock().unwrap() = None;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            monitor.health.snapshot().status,
            MonitorHealthStatusType::Healthy
        );
        handle.stop();
        handle.join().await;
    }

    #[test]
    fn transient_keywords_never_escalate_to_error() {
        let tracker = HealthTracker::new();
        for _ in 0..10 {
            tracker.record_error("network unreachable");
        }
        assert_eq!(tracker.snapshot().status, MonitorHealthStatusType::Warning);
    }

    #[test]
    fn single_failure_warns_five_flip_to_error_and_success_resets() {
        let tracker = HealthTracker::new();
        tracker.record_error("timeout talking to remote");
        let snap = tracker.snapshot();
        assert_eq!(snap.status, MonitorHealthStatusType::Warning);
        assert_eq!(snap.error_count, 1);

        for _ in 0..4 {
            tracker.record_error("hard failure");
        }
        let snap = tracker.snapshot();
        assert_eq!(snap.status, MonitorHealthStatusType::Error);
        assert_eq!(snap.error_count, 5);

        tracker.mark_healthy("recovered");
        let snap = tracker.snapshot();
        assert_eq!(snap.status, MonitorHealthStatusType::Healthy);
        assert_eq!(snap.error_count, 0);
    }

    #[test]
    fn api_call_tracking_requires_registration() {
        let tracker = HealthTracker::new();
        tracker.track_api_call("missing", true, Some(0.1));
        assert!(tracker.snapshot().api_sources.is_empty());

        tracker.register_api_source("src", "Source");
        tracker.register_api_source("src", "Source");
        assert_eq!(tracker.snapshot().api_sources.len(), 1);

        tracker.track_api_call("src", false, Some(0.5));
        let snap = tracker.snapshot();
        let source = snap.get_api_source("src").unwrap();
        assert_eq!(source.total_failures, 1);
        assert_eq!(source.last_response_time, Some(0.5));
    }
}
