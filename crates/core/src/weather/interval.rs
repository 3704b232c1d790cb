//! Time intervals, data point variants and the field-addressable record
//! contract the aggregation engine works over.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::errors::{Error, Result};

/// Half-open `[start, end)` UTC range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    /// Construct an interval; `start` must precede `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(Error::bad_input(format!(
                "Invalid interval: start {start} is not before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Seconds of overlap with `other`; zero when disjoint.
    pub fn overlap_seconds(&self, other: &TimeInterval) -> f64 {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start >= end {
            return 0.0;
        }
        (end - start).num_milliseconds() as f64 / 1000.0
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// One provider of environmental data. Lower `priority` values win; ties
/// break deterministically on the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataPointSource {
    pub id: String,
    pub label: String,
    pub priority: u8,
}

impl DataPointSource {
    pub fn new(id: impl Into<String>, label: impl Into<String>, priority: u8) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            priority,
        }
    }
}

impl Ord for DataPointSource {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for DataPointSource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Closed set of measurement units. Aggregation never converts between
/// units; mixing them within one field is a programming error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Celsius,
    Fahrenheit,
    Percent,
    Degrees,
    MetersPerSecond,
    MilesPerHour,
    Millimeters,
    Inches,
    Pascals,
    Meters,
    Seconds,
    Unitless,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Celsius => "°C",
            Self::Fahrenheit => "°F",
            Self::Percent => "%",
            Self::Degrees => "°",
            Self::MetersPerSecond => "m/s",
            Self::MilesPerHour => "mph",
            Self::Millimeters => "mm",
            Self::Inches => "in",
            Self::Pascals => "Pa",
            Self::Meters => "m",
            Self::Seconds => "s",
            Self::Unitless => "",
        };
        f.write_str(symbol)
    }
}

/// A magnitude with its unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub magnitude: f64,
    pub units: UnitKind,
}

impl Quantity {
    pub fn new(magnitude: f64, units: UnitKind) -> Self {
        Self { magnitude, units }
    }
}

/// Numeric observation: a min/ave/max triple in one unit. Only the average
/// is mandatory; sources without spread report just that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericDataPoint {
    pub station_id: Option<String>,
    pub source_datetime: Option<DateTime<Utc>>,
    pub quantity_min: Option<Quantity>,
    pub quantity_ave: Quantity,
    pub quantity_max: Option<Quantity>,
}

impl NumericDataPoint {
    pub fn single(source_datetime: DateTime<Utc>, quantity: Quantity) -> Self {
        Self {
            station_id: None,
            source_datetime: Some(source_datetime),
            quantity_min: None,
            quantity_ave: quantity,
            quantity_max: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanDataPoint {
    pub station_id: Option<String>,
    pub source_datetime: Option<DateTime<Utc>>,
    pub value: bool,
}

/// Time-of-day observation, e.g. sunrise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeDataPoint {
    pub station_id: Option<String>,
    pub source_datetime: Option<DateTime<Utc>>,
    pub value: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringDataPoint {
    pub station_id: Option<String>,
    pub source_datetime: Option<DateTime<Utc>>,
    pub value: String,
}

/// List observation, e.g. notable phenomena, carried as display strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListDataPoint {
    pub station_id: Option<String>,
    pub source_datetime: Option<DateTime<Utc>>,
    pub values: Vec<String>,
}

/// Tagged environmental observation. The variant determines the
/// aggregation strategy applied across overlapping source intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataPoint {
    Numeric(NumericDataPoint),
    Boolean(BooleanDataPoint),
    Time(TimeDataPoint),
    Text(StringDataPoint),
    List(ListDataPoint),
}

impl DataPoint {
    pub fn numeric(source_datetime: DateTime<Utc>, magnitude: f64, units: UnitKind) -> Self {
        Self::Numeric(NumericDataPoint::single(
            source_datetime,
            Quantity::new(magnitude, units),
        ))
    }

    pub fn boolean(source_datetime: DateTime<Utc>, value: bool) -> Self {
        Self::Boolean(BooleanDataPoint {
            station_id: None,
            source_datetime: Some(source_datetime),
            value,
        })
    }

    pub fn time(source_datetime: DateTime<Utc>, value: NaiveTime) -> Self {
        Self::Time(TimeDataPoint {
            station_id: None,
            source_datetime: Some(source_datetime),
            value,
        })
    }

    pub fn text(source_datetime: DateTime<Utc>, value: impl Into<String>) -> Self {
        Self::Text(StringDataPoint {
            station_id: None,
            source_datetime: Some(source_datetime),
            value: value.into(),
        })
    }

    /// The instant the originating source reported this value. Aggregated
    /// outputs carry none.
    pub fn source_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Numeric(dp) => dp.source_datetime,
            Self::Boolean(dp) => dp.source_datetime,
            Self::Time(dp) => dp.source_datetime,
            Self::Text(dp) => dp.source_datetime,
            Self::List(dp) => dp.source_datetime,
        }
    }
}

/// A record whose fields are optional data points, addressable by field
/// name. Aggregation walks `field_names()` and dispatches on the variant,
/// so no reflection is needed.
pub trait EnvironmentalData: Clone + Default + Send + Sync + 'static {
    fn field_names() -> &'static [&'static str];

    fn get_field(&self, name: &str) -> Option<&DataPoint>;

    fn set_field(&mut self, name: &str, value: Option<DataPoint>);
}

/// A record paired with the time interval it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalData<E: EnvironmentalData> {
    pub interval: TimeInterval,
    pub data: E,
}

impl<E: EnvironmentalData> IntervalData<E> {
    pub fn new(interval: TimeInterval, data: E) -> Self {
        Self { interval, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn interval_requires_start_before_end() {
        assert!(TimeInterval::new(utc(2, 0), utc(1, 0)).is_err());
        assert!(TimeInterval::new(utc(1, 0), utc(1, 0)).is_err());
        assert!(TimeInterval::new(utc(1, 0), utc(2, 0)).is_ok());
    }

    #[test]
    fn half_open_overlap_arithmetic() {
        let a = TimeInterval::new(utc(0, 0), utc(1, 0)).unwrap();
        let b = TimeInterval::new(utc(0, 30), utc(1, 30)).unwrap();
        let touching = TimeInterval::new(utc(1, 0), utc(2, 0)).unwrap();

        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&touching));
        assert_eq!(a.overlap_seconds(&b), 1800.0);
        assert_eq!(a.overlap_seconds(&touching), 0.0);
        assert!(a.contains(utc(0, 59)));
        assert!(!a.contains(utc(1, 0)));
    }

    #[test]
    fn sources_order_by_priority_then_id() {
        let high = DataPointSource::new("nws", "NWS", 1);
        let low_a = DataPointSource::new("a-source", "A", 3);
        let low_b = DataPointSource::new("b-source", "B", 3);

        let mut sources = vec![low_b.clone(), high.clone(), low_a.clone()];
        sources.sort();
        assert_eq!(sources, vec![high, low_a, low_b]);
    }
}
