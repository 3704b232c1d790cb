//! Sunrise-Sunset.org provider for solar astronomical data.
//!
//! Fetches per-day sun times from <https://api.sunrise-sunset.org/json>
//! with `formatted=0`, which returns timezone-aware UTC ISO timestamps and
//! the day length in seconds. No API key required.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use chrono_tz::Tz;
use log::warn;
use serde::Deserialize;
use std::time::Duration;

use hearth_core::errors::{Error, Result};
use hearth_core::weather::{
    AstronomicalData, DataPoint, DataPointSource, IntervalData, UnitKind, WeatherService,
};

use crate::source::{local_day_interval, GeographicLocation, WeatherDataSource};

pub const SOURCE_ID: &str = "sunrise-sunset-org";
const BASE_URL: &str = "https://api.sunrise-sunset.org/json";
/// Lower priority than USNO, which also carries moon data.
pub(crate) const PRIORITY: u8 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Astronomical data only changes once per day per location.
const POLLING_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const FORECAST_DAYS: u32 = 10;

const STATUS_OK: &str = "OK";

/// Top-level response envelope with its API status code.
#[derive(Debug, Deserialize)]
struct SunriseSunsetResponse {
    status: String,
    results: Option<SunriseSunsetResults>,
}

#[derive(Debug, Deserialize)]
struct SunriseSunsetResults {
    sunrise: Option<String>,
    sunset: Option<String>,
    solar_noon: Option<String>,
    day_length: Option<i64>,
    civil_twilight_begin: Option<String>,
    civil_twilight_end: Option<String>,
    nautical_twilight_begin: Option<String>,
    nautical_twilight_end: Option<String>,
    astronomical_twilight_begin: Option<String>,
    astronomical_twilight_end: Option<String>,
}

pub struct SunriseSunsetOrgSource {
    source: DataPointSource,
    client: reqwest::Client,
    location: GeographicLocation,
    timezone: Tz,
}

impl SunriseSunsetOrgSource {
    pub fn new(location: GeographicLocation, timezone: Tz) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            source: DataPointSource::new(SOURCE_ID, "Sunrise-Sunset.org", PRIORITY),
            client,
            location,
            timezone,
        })
    }

    async fn fetch_day(&self, date: NaiveDate) -> Result<SunriseSunsetResults> {
        let url = format!(
            "{BASE_URL}?lat={:.4}&lng={:.4}&date={date}&formatted=0",
            self.location.latitude, self.location.longitude
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("Sunrise-Sunset request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Temporary(format!(
                "Sunrise-Sunset HTTP {}",
                response.status()
            )));
        }
        let body: SunriseSunsetResponse = response
            .json()
            .await
            .map_err(|e| Error::Temporary(format!("Sunrise-Sunset JSON error: {e}")))?;
        parse_response(body)
    }
}

fn parse_response(body: SunriseSunsetResponse) -> Result<SunriseSunsetResults> {
    if body.status != STATUS_OK {
        return Err(Error::Temporary(format!(
            "Sunrise-Sunset API error: {}",
            body.status
        )));
    }
    body.results
        .ok_or_else(|| Error::Temporary("Missing results in Sunrise-Sunset response".into()))
}

/// Parse one UTC ISO timestamp into a local time-of-day data point.
fn time_point(
    raw: &Option<String>,
    field: &str,
    tz: Tz,
    reported_at: DateTime<Utc>,
) -> Option<DataPoint> {
    let raw = raw.as_deref()?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(instant) => {
            let local = instant.with_timezone(&tz);
            Some(DataPoint::time(reported_at, local.time()))
        }
        Err(err) => {
            warn!("Problem parsing {field} time \"{raw}\": {err}");
            None
        }
    }
}

fn results_to_astronomical(
    results: &SunriseSunsetResults,
    tz: Tz,
    reported_at: DateTime<Utc>,
) -> AstronomicalData {
    let mut data = AstronomicalData::default();
    data.sunrise = time_point(&results.sunrise, "sunrise", tz, reported_at);
    data.sunset = time_point(&results.sunset, "sunset", tz, reported_at);
    data.solar_noon = time_point(&results.solar_noon, "solar_noon", tz, reported_at);
    data.civil_twilight_begin =
        time_point(&results.civil_twilight_begin, "civil_twilight_begin", tz, reported_at);
    data.civil_twilight_end =
        time_point(&results.civil_twilight_end, "civil_twilight_end", tz, reported_at);
    data.nautical_twilight_begin = time_point(
        &results.nautical_twilight_begin,
        "nautical_twilight_begin",
        tz,
        reported_at,
    );
    data.nautical_twilight_end =
        time_point(&results.nautical_twilight_end, "nautical_twilight_end", tz, reported_at);
    data.astronomical_twilight_begin = time_point(
        &results.astronomical_twilight_begin,
        "astronomical_twilight_begin",
        tz,
        reported_at,
    );
    data.astronomical_twilight_end = time_point(
        &results.astronomical_twilight_end,
        "astronomical_twilight_end",
        tz,
        reported_at,
    );
    data.day_length = results
        .day_length
        .map(|seconds| DataPoint::numeric(reported_at, seconds as f64, UnitKind::Seconds));
    data
}

#[async_trait]
impl WeatherDataSource for SunriseSunsetOrgSource {
    fn source(&self) -> &DataPointSource {
        &self.source
    }

    fn polling_interval(&self) -> Duration {
        POLLING_INTERVAL
    }

    async fn fetch(&self, weather: &WeatherService) -> Result<()> {
        let reported_at = Utc::now();
        let today = reported_at.with_timezone(&self.timezone).date_naive();

        let mut contributions = Vec::new();
        for day_offset in 0..FORECAST_DAYS {
            let date = today + ChronoDuration::days(i64::from(day_offset));
            let results = match self.fetch_day(date).await {
                Ok(results) => results,
                Err(err) => {
                    warn!("Problem fetching Sunrise-Sunset data for {date}: {err}");
                    continue;
                }
            };
            let interval = local_day_interval(self.timezone, date)?;
            contributions.push(IntervalData::new(
                interval,
                results_to_astronomical(&results, self.timezone, reported_at),
            ));
        }

        if contributions.is_empty() {
            return Err(Error::Temporary(
                "No astronomical data fetched from Sunrise-Sunset.org".into(),
            ));
        }
        weather
            .update_astronomical_data(&self.source, &contributions)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    const FIXTURE: &str = r#"{
        "results": {
            "sunrise": "2026-08-12T11:55:20+00:00",
            "sunset": "2026-08-13T01:10:54+00:00",
            "solar_noon": "2026-08-12T18:33:07+00:00",
            "day_length": 47734,
            "civil_twilight_begin": "2026-08-12T11:28:37+00:00",
            "civil_twilight_end": "2026-08-13T01:37:37+00:00",
            "nautical_twilight_begin": "2026-08-12T10:55:42+00:00",
            "nautical_twilight_end": "2026-08-13T02:10:32+00:00",
            "astronomical_twilight_begin": "2026-08-12T10:20:32+00:00",
            "astronomical_twilight_end": "2026-08-13T02:45:41+00:00"
        },
        "status": "OK"
    }"#;

    #[test]
    fn parse_ok_response_to_local_times() {
        let body: SunriseSunsetResponse = serde_json::from_str(FIXTURE).unwrap();
        let results = parse_response(body).unwrap();
        let tz: Tz = "America/Chicago".parse().unwrap();
        let data = results_to_astronomical(&results, tz, Utc::now());

        // 11:55:20 UTC is 06:55:20 in Chicago during DST.
        let Some(DataPoint::Time(sunrise)) = &data.sunrise else {
            panic!("expected sunrise");
        };
        assert_eq!(sunrise.value.hour(), 6);
        assert_eq!(sunrise.value.minute(), 55);

        let Some(DataPoint::Numeric(day_length)) = &data.day_length else {
            panic!("expected day length");
        };
        assert_eq!(day_length.quantity_ave.magnitude, 47734.0);
        assert_eq!(day_length.quantity_ave.units, UnitKind::Seconds);
    }

    #[test]
    fn error_status_is_rejected() {
        let body: SunriseSunsetResponse =
            serde_json::from_str(r#"{"status": "INVALID_REQUEST", "results": null}"#).unwrap();
        assert!(parse_response(body).is_err());
    }

    #[test]
    fn malformed_time_is_skipped_not_fatal() {
        let results = SunriseSunsetResults {
            sunrise: Some("not-a-time".into()),
            sunset: None,
            solar_noon: None,
            day_length: None,
            civil_twilight_begin: None,
            civil_twilight_end: None,
            nautical_twilight_begin: None,
            nautical_twilight_end: None,
            astronomical_twilight_begin: None,
            astronomical_twilight_end: None,
        };
        let tz: Tz = "UTC".parse().unwrap();
        let data = results_to_astronomical(&results, tz, Utc::now());
        assert!(data.sunrise.is_none());
    }

    #[test]
    fn source_declares_priority_and_cadence() {
        let source = SunriseSunsetOrgSource::new(
            GeographicLocation {
                latitude: 30.27,
                longitude: -97.74,
                elevation_m: None,
            },
            "America/Chicago".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(source.source().id, SOURCE_ID);
        assert_eq!(source.source().priority, PRIORITY);
        assert_eq!(source.polling_interval(), POLLING_INTERVAL);
        assert!(!source.requires_api_key());
    }
}
