//! US Naval Observatory provider for solar and lunar astronomical data.
//!
//! Uses the Astronomical Applications `rstt/oneday` API, which returns
//! rise/set/transit phenomena plus moon phase and illumination. Requested
//! with the local UTC offset so returned times are already local. No API
//! key required.
//!
//! API Documentation: <https://aa.usno.navy.mil/data/api>

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use log::warn;
use serde::Deserialize;
use std::time::Duration;

use hearth_core::errors::{Error, Result};
use hearth_core::weather::{
    AstronomicalData, DataPoint, DataPointSource, IntervalData, UnitKind, WeatherService,
};

use crate::source::{local_day_interval, GeographicLocation, WeatherDataSource};

pub const SOURCE_ID: &str = "usno";
const BASE_URL: &str = "https://aa.usno.navy.mil/api/rstt/oneday";
/// Higher priority than sunrise-sunset.org: it also carries moon data.
const PRIORITY: u8 = 2;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POLLING_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const FORECAST_DAYS: u32 = 10;

#[derive(Debug, Deserialize)]
struct UsnoResponse {
    error: Option<serde_json::Value>,
    properties: Option<UsnoProperties>,
}

#[derive(Debug, Deserialize)]
struct UsnoProperties {
    data: Option<UsnoData>,
}

#[derive(Debug, Deserialize, Default)]
struct UsnoData {
    #[serde(default)]
    sundata: Vec<UsnoPhenomenon>,
    #[serde(default)]
    moondata: Vec<UsnoPhenomenon>,
    curphase: Option<String>,
    fracillum: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsnoPhenomenon {
    phen: Option<String>,
    time: Option<String>,
}

pub struct UsnoSource {
    source: DataPointSource,
    client: reqwest::Client,
    location: GeographicLocation,
    timezone: Tz,
}

impl UsnoSource {
    pub fn new(location: GeographicLocation, timezone: Tz) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            source: DataPointSource::new(SOURCE_ID, "US Naval Observatory", PRIORITY),
            client,
            location,
            timezone,
        })
    }

    /// The local UTC offset in hours on `date`, passed so the API returns
    /// local times.
    fn utc_offset_hours(&self, date: NaiveDate) -> i32 {
        let noon = date.and_hms_opt(12, 0, 0).unwrap();
        self.timezone
            .from_local_datetime(&noon)
            .earliest()
            .map(|dt| dt.offset().fix().local_minus_utc() / 3600)
            .unwrap_or(0)
    }

    async fn fetch_day(&self, date: NaiveDate) -> Result<UsnoData> {
        let url = format!(
            "{BASE_URL}?date={date}&coords={:.4},{:.4}&tz={}",
            self.location.latitude,
            self.location.longitude,
            self.utc_offset_hours(date)
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("USNO request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Temporary(format!("USNO HTTP {}", response.status())));
        }
        let body: UsnoResponse = response
            .json()
            .await
            .map_err(|e| Error::Temporary(format!("USNO JSON error: {e}")))?;
        parse_response(body)
    }
}

fn parse_response(body: UsnoResponse) -> Result<UsnoData> {
    if let Some(error) = body.error {
        return Err(Error::Temporary(format!("USNO API error: {error}")));
    }
    let properties = body
        .properties
        .ok_or_else(|| Error::Temporary("Missing properties in USNO response".into()))?;
    // Empty data is allowed; the API returns nothing for some dates.
    Ok(properties.data.unwrap_or_default())
}

/// USNO times are "HH:MM", already local because of the tz query param.
fn parse_usno_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .ok()
}

/// Whether the moon is waxing, from the current phase name.
fn moon_is_waxing(phase_name: &str) -> Option<bool> {
    let lowered = phase_name.to_lowercase();
    if lowered.contains("waxing") || lowered.contains("new moon") {
        Some(true)
    } else if lowered.contains("waning") || lowered.contains("full moon") {
        Some(false)
    } else {
        None
    }
}

fn data_to_astronomical(data: &UsnoData, reported_at: DateTime<Utc>) -> AstronomicalData {
    let mut astronomical = AstronomicalData::default();

    for event in &data.sundata {
        let (Some(phen), Some(raw_time)) = (&event.phen, &event.time) else {
            continue;
        };
        let Some(value) = parse_usno_time(raw_time) else {
            warn!("Problem parsing USNO solar time \"{raw_time}\"");
            continue;
        };
        let point = Some(DataPoint::time(reported_at, value));
        match phen.to_lowercase().as_str() {
            "rise" => astronomical.sunrise = point,
            "set" => astronomical.sunset = point,
            "upper transit" => astronomical.solar_noon = point,
            _ => {}
        }
    }

    for event in &data.moondata {
        let (Some(phen), Some(raw_time)) = (&event.phen, &event.time) else {
            continue;
        };
        let Some(value) = parse_usno_time(raw_time) else {
            warn!("Problem parsing USNO lunar time \"{raw_time}\"");
            continue;
        };
        let point = Some(DataPoint::time(reported_at, value));
        match phen.to_lowercase().as_str() {
            "rise" => astronomical.moonrise = point,
            "set" => astronomical.moonset = point,
            _ => {}
        }
    }

    if let Some(fracillum) = &data.fracillum {
        let illum_str = fracillum.replace('%', "");
        match illum_str.trim().parse::<f64>() {
            Ok(illumination) => {
                astronomical.moon_illumination =
                    Some(DataPoint::numeric(reported_at, illumination, UnitKind::Percent));
            }
            Err(err) => warn!("Problem parsing USNO illumination \"{fracillum}\": {err}"),
        }
    }

    if let Some(phase_name) = &data.curphase {
        astronomical.moon_phase = Some(DataPoint::text(reported_at, phase_name.clone()));
        if let Some(waxing) = moon_is_waxing(phase_name) {
            astronomical.moon_is_waxing = Some(DataPoint::boolean(reported_at, waxing));
        }
    }

    astronomical
}

#[async_trait]
impl WeatherDataSource for UsnoSource {
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
            let data = match self.fetch_day(date).await {
                Ok(data) => data,
                Err(err) => {
                    warn!("Problem fetching USNO astronomical data for {date}: {err}");
                    continue;
                }
            };
            let interval = local_day_interval(self.timezone, date)?;
            contributions.push(IntervalData::new(
                interval,
                data_to_astronomical(&data, reported_at),
            ));
        }

        if contributions.is_empty() {
            return Err(Error::Temporary("No astronomical data fetched from USNO".into()));
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
        "properties": {
            "data": {
                "sundata": [
                    {"phen": "Rise", "time": "06:41"},
                    {"phen": "Upper Transit", "time": "13:22"},
                    {"phen": "Set", "time": "20:03"}
                ],
                "moondata": [
                    {"phen": "Rise", "time": "10:15"},
                    {"phen": "Set", "time": "22:47"}
                ],
                "curphase": "Waxing Crescent",
                "fracillum": "35%"
            }
        }
    }"#;

    #[test]
    fn parse_oneday_response() {
        let body: UsnoResponse = serde_json::from_str(FIXTURE).unwrap();
        let data = parse_response(body).unwrap();
        let astronomical = data_to_astronomical(&data, Utc::now());

        let Some(DataPoint::Time(sunrise)) = &astronomical.sunrise else {
            panic!("expected sunrise");
        };
        assert_eq!(sunrise.value.hour(), 6);
        assert_eq!(sunrise.value.minute(), 41);

        let Some(DataPoint::Time(solar_noon)) = &astronomical.solar_noon else {
            panic!("expected solar noon");
        };
        assert_eq!(solar_noon.value.hour(), 13);

        let Some(DataPoint::Time(moonset)) = &astronomical.moonset else {
            panic!("expected moonset");
        };
        assert_eq!(moonset.value.hour(), 22);

        let Some(DataPoint::Numeric(illumination)) = &astronomical.moon_illumination else {
            panic!("expected illumination");
        };
        assert_eq!(illumination.quantity_ave.magnitude, 35.0);

        let Some(DataPoint::Boolean(waxing)) = &astronomical.moon_is_waxing else {
            panic!("expected waxing flag");
        };
        assert!(waxing.value);

        let Some(DataPoint::Text(phase)) = &astronomical.moon_phase else {
            panic!("expected phase name");
        };
        assert_eq!(phase.value, "Waxing Crescent");
    }

    #[test]
    fn api_error_is_rejected() {
        let body: UsnoResponse =
            serde_json::from_str(r#"{"error": "invalid coords", "properties": null}"#).unwrap();
        assert!(parse_response(body).is_err());
    }

    #[test]
    fn empty_data_is_allowed() {
        let body: UsnoResponse =
            serde_json::from_str(r#"{"properties": {"data": null}}"#).unwrap();
        let data = parse_response(body).unwrap();
        let astronomical = data_to_astronomical(&data, Utc::now());
        assert!(astronomical.sunrise.is_none());
    }

    #[test]
    fn moon_waxing_detection_from_phase_names() {
        assert_eq!(moon_is_waxing("Waxing Gibbous"), Some(true));
        assert_eq!(moon_is_waxing("Waning Crescent"), Some(false));
        assert_eq!(moon_is_waxing("New Moon"), Some(true));
        assert_eq!(moon_is_waxing("Full Moon"), Some(false));
        assert_eq!(moon_is_waxing("First Quarter"), None);
    }

    #[test]
    fn usno_outranks_sunrise_sunset_org() {
        let source = UsnoSource::new(
            GeographicLocation {
                latitude: 30.27,
                longitude: -97.74,
                elevation_m: None,
            },
            "America/Chicago".parse().unwrap(),
        )
        .unwrap();
        assert!(source.source().priority < crate::sunrise_sunset_org::PRIORITY);
    }
}
