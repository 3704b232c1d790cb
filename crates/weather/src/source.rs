//! Shared plumbing for weather data sources: the source contract and the
//! periodic monitor adapter that polls one.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hearth_core::errors::{Error, Result};
use hearth_core::monitors::{HealthTracker, PeriodicMonitor};
use hearth_core::weather::{DataPointSource, TimeInterval, WeatherService};

/// Where the user's hub lives, for location-dependent providers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeographicLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: Option<f64>,
}

/// A provider of environmental data. Each source translates its vendor
/// API response into interval records and feeds the weather service.
#[async_trait]
pub trait WeatherDataSource: Send + Sync {
    fn source(&self) -> &DataPointSource;

    fn polling_interval(&self) -> Duration;

    fn requires_api_key(&self) -> bool {
        false
    }

    fn enabled_by_default(&self) -> bool {
        true
    }

    /// One fetch cycle: pull from the vendor API and push the translated
    /// records into the weather service.
    async fn fetch(&self, weather: &WeatherService) -> Result<()>;
}

/// The local-midnight-to-midnight window for one calendar day, stored UTC.
pub fn local_day_interval(tz: Tz, date: NaiveDate) -> Result<TimeInterval> {
    let start_naive = date.and_hms_opt(0, 0, 0).unwrap();
    let end_naive = (date + ChronoDuration::days(1)).and_hms_opt(0, 0, 0).unwrap();

    let start = tz
        .from_local_datetime(&start_naive)
        .earliest()
        .ok_or_else(|| Error::Temporary(format!("No valid local midnight on {date}")))?
        .with_timezone(&Utc);
    let end = tz
        .from_local_datetime(&end_naive)
        .earliest()
        .ok_or_else(|| Error::Temporary(format!("No valid local midnight after {date}")))?
        .with_timezone(&Utc);
    TimeInterval::new(start, end)
}

/// Periodic monitor wrapping one data source.
pub struct WeatherSourceMonitor {
    monitor_id: String,
    data_source: Arc<dyn WeatherDataSource>,
    weather: Arc<WeatherService>,
    health: HealthTracker,
}

impl WeatherSourceMonitor {
    pub fn new(data_source: Arc<dyn WeatherDataSource>, weather: Arc<WeatherService>) -> Arc<Self> {
        Arc::new(Self {
            monitor_id: format!("{}-monitor", data_source.source().id),
            data_source,
            weather,
            health: HealthTracker::new(),
        })
    }
}

#[async_trait]
impl PeriodicMonitor for WeatherSourceMonitor {
    fn id(&self) -> &str {
        &self.monitor_id
    }

    fn interval(&self) -> Duration {
        self.data_source.polling_interval()
    }

    fn health(&self) -> &HealthTracker {
        &self.health
    }

    async fn initialize(&self) -> Result<()> {
        let source = self.data_source.source();
        self.health.register_api_source(&source.id, &source.label);
        self.weather.ensure_initialized().await;
        Ok(())
    }

    async fn do_work(&self) -> Result<()> {
        let source_id = self.data_source.source().id.clone();
        let started = Instant::now();
        match self.data_source.fetch(&self.weather).await {
            Ok(()) => {
                self.health
                    .track_api_call(&source_id, true, Some(started.elapsed().as_secs_f64()));
                Ok(())
            }
            Err(err) => {
                self.health
                    .track_api_call(&source_id, false, Some(started.elapsed().as_secs_f64()));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_day_interval_spans_exactly_one_day() {
        let tz: Tz = "America/Chicago".parse().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 7, 4).unwrap();
        let interval = local_day_interval(tz, date).unwrap();
        assert_eq!(interval.duration_seconds(), 24.0 * 3600.0);

        use chrono::Timelike;
        let local_start = interval.start.with_timezone(&tz);
        assert_eq!(local_start.hour(), 0);
        assert_eq!(local_start.date_naive(), date);
    }
}
