//! Merges overlapping source readings into canonical fixed-length time
//! intervals, with per-variant aggregation and a staleness policy that
//! lets a fresh lower-priority source override a stale higher-priority one.

use chrono::{DateTime, Duration, DurationRound, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::interval::{
    DataPoint, DataPointSource, EnvironmentalData, IntervalData, NumericDataPoint, Quantity,
    TimeInterval, UnitKind,
};

/// How old a source's freshest contribution may be before lower-priority
/// sources are allowed to override it.
pub const DATA_AGE_STALE_SECS: i64 = 2 * 60 * 60;

type SourceIntervalMap = HashMap<TimeInterval, DataPoint>;
type FieldSourceData = BTreeMap<DataPointSource, SourceIntervalMap>;

/// Aggregated data for a single canonical interval, retaining every
/// source's raw contributions so re-aggregation can rerun as data arrives.
struct AggregatedIntervalData<E: EnvironmentalData> {
    interval_data: IntervalData<E>,
    source_data: HashMap<&'static str, FieldSourceData>,
}

impl<E: EnvironmentalData> AggregatedIntervalData<E> {
    fn new(interval: TimeInterval) -> Self {
        Self {
            interval_data: IntervalData::new(interval, E::default()),
            source_data: HashMap::new(),
        }
    }

    fn interval(&self) -> TimeInterval {
        self.interval_data.interval
    }

    /// Record one overlapping source interval's non-null fields.
    fn add_source_data(&mut self, source: &DataPointSource, contribution: &IntervalData<E>) {
        debug_assert!(self.interval().overlaps(&contribution.interval));
        for &field in E::field_names() {
            let Some(point) = contribution.data.get_field(field) else {
                continue;
            };
            self.source_data
                .entry(field)
                .or_default()
                .entry(source.clone())
                .or_default()
                .insert(contribution.interval, point.clone());
        }
    }

    /// Re-derive every field from the retained source contributions.
    fn reaggregate(&mut self, now: DateTime<Utc>) {
        if self.source_data.is_empty() {
            return;
        }
        let target = self.interval();
        for (field, source_map) in &self.source_data {
            let Some(best) = best_source(now, source_map) else {
                self.interval_data.data.set_field(field, None);
                continue;
            };
            let interval_map = &source_map[&best];

            let aggregated = if interval_map.len() == 1 {
                // A single contribution is used verbatim.
                interval_map.values().next().cloned()
            } else {
                match interval_map.values().next() {
                    Some(DataPoint::Numeric(_)) => aggregate_numeric(&target, interval_map),
                    Some(DataPoint::Boolean(_)) => Some(aggregate_boolean(&target, interval_map)),
                    Some(DataPoint::Time(_)) | Some(DataPoint::Text(_))
                    | Some(DataPoint::List(_)) => longest_overlap(&target, interval_map),
                    None => None,
                }
            };
            self.interval_data.data.set_field(field, aggregated);
        }
    }
}

/// Select the source to aggregate from: the highest-priority source whose
/// freshest contribution is not stale; if every source is stale, the one
/// with the freshest data.
fn best_source(now: DateTime<Utc>, source_map: &FieldSourceData) -> Option<DataPointSource> {
    let mut stale: Vec<(&DataPointSource, i64)> = Vec::new();
    for (source, interval_map) in source_map {
        if interval_map.is_empty() {
            continue;
        }
        let freshest = interval_map
            .values()
            .filter_map(DataPoint::source_datetime)
            .max();
        match freshest {
            Some(reported_at) => {
                let age_secs = (now - reported_at).num_seconds();
                if age_secs < DATA_AGE_STALE_SECS {
                    return Some(source.clone());
                }
                stale.push((source, age_secs));
            }
            None => stale.push((source, i64::MAX)),
        }
    }
    // min_by_key keeps the first (highest-priority) source on age ties.
    stale
        .into_iter()
        .min_by_key(|(_, age)| *age)
        .map(|(source, _)| source.clone())
}

/// Time-weighted mean of the averages over overlap seconds, tracking the
/// spread via each contribution's min/max (falling back to its average).
/// Units come from the first contribution; mixed units are a programming
/// error and later mismatching contributions are dropped.
fn aggregate_numeric(target: &TimeInterval, interval_map: &SourceIntervalMap) -> Option<DataPoint> {
    let mut min_quantity: Option<Quantity> = None;
    let mut max_quantity: Option<Quantity> = None;
    let mut total_weighted = 0.0;
    let mut total_overlap = 0.0;
    let mut units: Option<UnitKind> = None;

    for (interval, point) in interval_map {
        let DataPoint::Numeric(numeric) = point else {
            warn!("Mixed data point variants in numeric aggregation, skipping one");
            continue;
        };
        let overlap = target.overlap_seconds(interval);
        if overlap <= 0.0 {
            continue;
        }

        let point_units = numeric.quantity_ave.units;
        match units {
            None => units = Some(point_units),
            Some(expected) if expected != point_units => {
                debug_assert!(false, "mixed units: {expected} vs {point_units}");
                warn!("Mixed units in numeric aggregation ({expected} vs {point_units}), skipping");
                continue;
            }
            _ => {}
        }

        total_weighted += overlap * numeric.quantity_ave.magnitude;
        total_overlap += overlap;

        let candidate_min = numeric.quantity_min.unwrap_or(numeric.quantity_ave);
        if min_quantity.map_or(true, |m| candidate_min.magnitude < m.magnitude) {
            min_quantity = Some(candidate_min);
        }
        let candidate_max = numeric.quantity_max.unwrap_or(numeric.quantity_ave);
        if max_quantity.map_or(true, |m| candidate_max.magnitude > m.magnitude) {
            max_quantity = Some(candidate_max);
        }
    }

    if total_overlap <= 0.0 {
        return None;
    }
    Some(DataPoint::Numeric(NumericDataPoint {
        station_id: None,
        source_datetime: None,
        quantity_min: min_quantity,
        quantity_ave: Quantity::new(total_weighted / total_overlap, units?),
        quantity_max: max_quantity,
    }))
}

/// Duration-weighted majority vote. Ties break to `false`; callers relying
/// on the tie behavior get the conservative answer.
fn aggregate_boolean(target: &TimeInterval, interval_map: &SourceIntervalMap) -> DataPoint {
    let mut true_duration = 0.0;
    let mut false_duration = 0.0;
    for (interval, point) in interval_map {
        let DataPoint::Boolean(boolean) = point else {
            continue;
        };
        let overlap = target.overlap_seconds(interval);
        if boolean.value {
            true_duration += overlap;
        } else {
            false_duration += overlap;
        }
    }
    DataPoint::Boolean(super::interval::BooleanDataPoint {
        station_id: None,
        source_datetime: None,
        value: true_duration > false_duration,
    })
}

/// Longest-overlap wins, for values with no meaningful arithmetic.
fn longest_overlap(target: &TimeInterval, interval_map: &SourceIntervalMap) -> Option<DataPoint> {
    let mut best: Option<&DataPoint> = None;
    let mut best_overlap = 0.0;
    for (interval, point) in interval_map {
        let overlap = target.overlap_seconds(interval);
        if overlap > best_overlap {
            best = Some(point);
            best_overlap = overlap;
        }
    }
    best.cloned()
}

/// UTC-aligned hourly windows starting from the current multiple of the
/// interval length.
fn hourly_intervals(
    now: DateTime<Utc>,
    interval_hours: i64,
    count: usize,
    ascending: bool,
) -> Vec<TimeInterval> {
    let truncated = now
        .duration_trunc(Duration::hours(1))
        .unwrap_or(now);
    let mut rounded_start =
        truncated - Duration::hours(i64::from(now.hour()) % interval_hours);
    if now == rounded_start && !ascending {
        rounded_start -= Duration::hours(interval_hours);
    }

    let step = Duration::hours(interval_hours);
    (0..count as i64)
        .map(|idx| {
            let (start, end) = if ascending {
                (rounded_start + step * idx as i32, rounded_start + step * (idx + 1) as i32)
            } else {
                (rounded_start - step * (idx + 1) as i32, rounded_start - step * idx as i32)
            };
            TimeInterval { start, end }
        })
        .collect()
}

fn local_midnight_to_utc(tz: Tz, date: chrono::NaiveDate) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).unwrap();
    match tz.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Midnight fell into a DST gap; the first valid instant after it.
        None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc::now()),
    }
}

/// Local-timezone midnight-to-midnight windows, converted to UTC for
/// storage. This is what makes "today" and "yesterday" match the user's
/// calendar rather than UTC.
fn daily_intervals(
    now: DateTime<Utc>,
    tz: Tz,
    count: usize,
    ascending: bool,
) -> Vec<TimeInterval> {
    let local_today = tz.from_utc_datetime(&now.naive_utc()).date_naive();

    (0..count as i64)
        .map(|idx| {
            let (start_date, end_date) = if ascending {
                (local_today + Duration::days(idx), local_today + Duration::days(idx + 1))
            } else {
                // idx 0 is yesterday, idx 1 the day before, and so on.
                (local_today - Duration::days(idx + 1), local_today - Duration::days(idx))
            };
            TimeInterval {
                start: local_midnight_to_utc(tz, start_date),
                end: local_midnight_to_utc(tz, end_date),
            }
        })
        .collect()
}

struct AggregatorState<E: EnvironmentalData> {
    initialized: bool,
    aggregates: Vec<AggregatedIntervalData<E>>,
}

/// One aggregation engine instance per interval-length/record-type pair.
/// Operations are internally single-threaded via a mutex.
pub struct IntervalAggregator<E: EnvironmentalData> {
    interval_hours: i64,
    max_interval_count: usize,
    is_order_ascending: bool,
    timezone: Tz,
    state: Mutex<AggregatorState<E>>,
}

impl<E: EnvironmentalData> IntervalAggregator<E> {
    /// Daily (24 h) engines align to local midnight in `timezone`; any
    /// other length aligns to UTC hour multiples.
    pub fn new(
        interval_hours: i64,
        max_interval_count: usize,
        is_order_ascending: bool,
        timezone: Tz,
    ) -> Self {
        Self {
            interval_hours,
            max_interval_count,
            is_order_ascending,
            timezone,
            state: Mutex::new(AggregatorState {
                initialized: false,
                aggregates: Vec::new(),
            }),
        }
    }

    fn uses_local_timezone(&self) -> bool {
        self.interval_hours == 24
    }

    fn calculated_intervals(&self, now: DateTime<Utc>) -> Vec<TimeInterval> {
        if self.uses_local_timezone() {
            daily_intervals(now, self.timezone, self.max_interval_count, self.is_order_ascending)
        } else {
            hourly_intervals(
                now,
                self.interval_hours,
                self.max_interval_count,
                self.is_order_ascending,
            )
        }
    }

    /// Idempotent lazy initialization of the interval window.
    pub async fn ensure_initialized(&self) {
        let mut state = self.state.lock().await;
        if state.initialized {
            return;
        }
        let now = Utc::now();
        Self::update_intervals(&mut state, self.calculated_intervals(now));
        state.initialized = true;
    }

    /// Roll the window against `wanted`, preserving previously recorded
    /// source data for intervals still live.
    fn update_intervals(state: &mut AggregatorState<E>, wanted: Vec<TimeInterval>) {
        let mut existing: HashMap<TimeInterval, AggregatedIntervalData<E>> = state
            .aggregates
            .drain(..)
            .map(|agg| (agg.interval(), agg))
            .collect();
        state.aggregates = wanted
            .into_iter()
            .map(|interval| {
                existing
                    .remove(&interval)
                    .unwrap_or_else(|| AggregatedIntervalData::new(interval))
            })
            .collect();
    }

    /// Fold new source intervals in: roll the window, distribute each
    /// contribution into every overlapping aggregate, re-aggregate.
    pub async fn add_data(&self, source: &DataPointSource, contributions: &[IntervalData<E>]) {
        let now = Utc::now();
        self.add_data_at(source, contributions, now).await;
    }

    async fn add_data_at(
        &self,
        source: &DataPointSource,
        contributions: &[IntervalData<E>],
        now: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().await;
        Self::update_intervals(&mut state, self.calculated_intervals(now));
        state.initialized = true;

        debug!(
            "Adding {} interval(s) from source {}",
            contributions.len(),
            source.id
        );
        for contribution in contributions {
            for aggregate in &mut state.aggregates {
                if aggregate.interval().overlaps(&contribution.interval) {
                    aggregate.add_source_data(source, contribution);
                }
            }
        }
        for aggregate in &mut state.aggregates {
            aggregate.reaggregate(now);
        }
    }

    /// Snapshot of the current aggregates in window order.
    pub async fn snapshot(&self) -> Vec<IntervalData<E>> {
        let state = self.state.lock().await;
        state
            .aggregates
            .iter()
            .map(|agg| agg.interval_data.clone())
            .collect()
    }

    /// The aggregate whose interval contains `instant`, if any.
    pub async fn data_at(&self, instant: DateTime<Utc>) -> Option<IntervalData<E>> {
        let state = self.state.lock().await;
        state
            .aggregates
            .iter()
            .find(|agg| agg.interval().contains(instant))
            .map(|agg| agg.interval_data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weather::records::{AstronomicalData, WeatherConditionsData};
    use chrono::TimeZone;

    fn utc(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, h, m, 0).unwrap()
    }

    fn interval(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeInterval {
        TimeInterval::new(start, end).unwrap()
    }

    fn numeric_contribution(
        iv: TimeInterval,
        magnitude: f64,
        reported_at: DateTime<Utc>,
    ) -> IntervalData<WeatherConditionsData> {
        let mut data = WeatherConditionsData::default();
        data.temperature = Some(DataPoint::numeric(reported_at, magnitude, UnitKind::Celsius));
        IntervalData::new(iv, data)
    }

    #[test]
    fn time_weighted_mean_over_overlap_seconds() {
        // A=[0,10) minutes at 10, B=[5,15) at 20, aggregate [0,15):
        // (10*600 + 20*600) / 1200 = 15.
        let target = interval(utc(10, 0, 0), utc(10, 0, 15));
        let mut aggregate = AggregatedIntervalData::<WeatherConditionsData>::new(target);
        let source = DataPointSource::new("nws", "NWS", 1);
        let reported = utc(10, 0, 0);

        aggregate.add_source_data(
            &source,
            &numeric_contribution(interval(utc(10, 0, 0), utc(10, 0, 10)), 10.0, reported),
        );
        aggregate.add_source_data(
            &source,
            &numeric_contribution(interval(utc(10, 0, 5), utc(10, 0, 15)), 20.0, reported),
        );
        aggregate.reaggregate(utc(10, 0, 30));

        let Some(DataPoint::Numeric(result)) =
            aggregate.interval_data.data.get_field("temperature")
        else {
            panic!("expected numeric temperature");
        };
        assert!((result.quantity_ave.magnitude - 15.0).abs() < 1e-9);
        assert_eq!(result.quantity_min.unwrap().magnitude, 10.0);
        assert_eq!(result.quantity_max.unwrap().magnitude, 20.0);
        assert_eq!(result.quantity_ave.units, UnitKind::Celsius);
        assert!(result.source_datetime.is_none());
    }

    #[test]
    fn boolean_majority_is_duration_weighted_with_ties_false() {
        let target = interval(utc(10, 0, 0), utc(10, 0, 10));
        let mut aggregate = AggregatedIntervalData::<AstronomicalData>::new(target);
        let source = DataPointSource::new("usno", "USNO", 4);
        let reported = utc(10, 0, 0);

        // true over 3 minutes, false over 7 minutes.
        let mut data_true = AstronomicalData::default();
        data_true.moon_is_waxing = Some(DataPoint::boolean(reported, true));
        aggregate.add_source_data(
            &source,
            &IntervalData::new(interval(utc(10, 0, 0), utc(10, 0, 3)), data_true),
        );
        let mut data_false = AstronomicalData::default();
        data_false.moon_is_waxing = Some(DataPoint::boolean(reported, false));
        aggregate.add_source_data(
            &source,
            &IntervalData::new(interval(utc(10, 0, 3), utc(10, 0, 10)), data_false),
        );
        aggregate.reaggregate(utc(10, 0, 30));

        let Some(DataPoint::Boolean(result)) =
            aggregate.interval_data.data.get_field("moon_is_waxing")
        else {
            panic!("expected boolean");
        };
        assert!(!result.value);
    }

    #[test]
    fn boolean_exact_tie_breaks_false() {
        let target = interval(utc(10, 0, 0), utc(10, 0, 10));
        let source = DataPointSource::new("s", "S", 1);
        let reported = utc(10, 0, 0);
        let mut aggregate = AggregatedIntervalData::<AstronomicalData>::new(target);

        for (value, iv) in [
            (true, interval(utc(10, 0, 0), utc(10, 0, 5))),
            (false, interval(utc(10, 0, 5), utc(10, 0, 10))),
        ] {
            let mut data = AstronomicalData::default();
            data.moon_is_waxing = Some(DataPoint::boolean(reported, value));
            aggregate.add_source_data(&source, &IntervalData::new(iv, data));
        }
        aggregate.reaggregate(utc(10, 0, 30));

        let Some(DataPoint::Boolean(result)) =
            aggregate.interval_data.data.get_field("moon_is_waxing")
        else {
            panic!("expected boolean");
        };
        assert!(!result.value);
    }

    #[test]
    fn fresh_low_priority_source_overrides_stale_high_priority() {
        let now = utc(10, 12, 0);
        let target = interval(utc(10, 11, 0), utc(10, 13, 0));
        let mut aggregate = AggregatedIntervalData::<WeatherConditionsData>::new(target);

        let high = DataPointSource::new("nws", "NWS", 1);
        let low = DataPointSource::new("backup", "Backup", 3);

        // High priority last reported three hours ago; low one minute ago.
        aggregate.add_source_data(
            &high,
            &numeric_contribution(target, 5.0, now - Duration::hours(3)),
        );
        aggregate.add_source_data(
            &low,
            &numeric_contribution(target, 9.0, now - Duration::minutes(1)),
        );
        aggregate.reaggregate(now);

        let Some(DataPoint::Numeric(result)) =
            aggregate.interval_data.data.get_field("temperature")
        else {
            panic!("expected numeric");
        };
        assert_eq!(result.quantity_ave.magnitude, 9.0);
    }

    #[test]
    fn fresh_high_priority_source_wins_over_fresh_low_priority() {
        let now = utc(10, 12, 0);
        let target = interval(utc(10, 11, 0), utc(10, 13, 0));
        let mut aggregate = AggregatedIntervalData::<WeatherConditionsData>::new(target);

        let high = DataPointSource::new("nws", "NWS", 1);
        let low = DataPointSource::new("backup", "Backup", 3);
        aggregate.add_source_data(
            &high,
            &numeric_contribution(target, 5.0, now - Duration::minutes(5)),
        );
        aggregate.add_source_data(
            &low,
            &numeric_contribution(target, 9.0, now - Duration::minutes(1)),
        );
        aggregate.reaggregate(now);

        let Some(DataPoint::Numeric(result)) =
            aggregate.interval_data.data.get_field("temperature")
        else {
            panic!("expected numeric");
        };
        assert_eq!(result.quantity_ave.magnitude, 5.0);
    }

    #[test]
    fn all_stale_picks_freshest() {
        let now = utc(10, 12, 0);
        let target = interval(utc(10, 11, 0), utc(10, 13, 0));
        let mut aggregate = AggregatedIntervalData::<WeatherConditionsData>::new(target);

        let high = DataPointSource::new("nws", "NWS", 1);
        let low = DataPointSource::new("backup", "Backup", 3);
        aggregate.add_source_data(
            &high,
            &numeric_contribution(target, 5.0, now - Duration::hours(6)),
        );
        aggregate.add_source_data(
            &low,
            &numeric_contribution(target, 9.0, now - Duration::hours(3)),
        );
        aggregate.reaggregate(now);

        let Some(DataPoint::Numeric(result)) =
            aggregate.interval_data.data.get_field("temperature")
        else {
            panic!("expected numeric");
        };
        assert_eq!(result.quantity_ave.magnitude, 9.0);
    }

    #[test]
    fn hourly_windows_align_to_utc_hours() {
        let now = utc(10, 14, 25);
        let windows = hourly_intervals(now, 1, 3, true);
        assert_eq!(windows[0].start, utc(10, 14, 0));
        assert_eq!(windows[0].end, utc(10, 15, 0));
        assert_eq!(windows[2].end, utc(10, 17, 0));

        let history = hourly_intervals(now, 1, 2, false);
        assert_eq!(history[0].end, utc(10, 14, 0));
        assert_eq!(history[0].start, utc(10, 13, 0));
        assert_eq!(history[1].end, utc(10, 13, 0));
    }

    #[test]
    fn descending_window_on_exact_boundary_excludes_current_hour() {
        let now = utc(10, 14, 0);
        let history = hourly_intervals(now, 1, 1, false);
        assert_eq!(history[0].end, utc(10, 13, 0));
    }

    #[test]
    fn daily_windows_align_to_local_midnight() {
        let tz: Tz = "America/Chicago".parse().unwrap();
        // 2026-03-10 02:00 UTC is still 2026-03-09 in Chicago (UTC-6/−5).
        let now = utc(10, 2, 0);
        let windows = daily_intervals(now, tz, 2, true);

        let local_start = windows[0].start.with_timezone(&tz);
        assert_eq!(local_start.hour(), 0);
        assert_eq!(
            local_start.date_naive(),
            tz.from_utc_datetime(&now.naive_utc()).date_naive()
        );

        let history = daily_intervals(now, tz, 1, false);
        assert_eq!(history[0].end, windows[0].start);
    }

    #[tokio::test]
    async fn window_roll_preserves_live_interval_data() {
        let tz: Tz = "UTC".parse().unwrap();
        let aggregator = IntervalAggregator::<WeatherConditionsData>::new(1, 4, true, tz);
        let source = DataPointSource::new("nws", "NWS", 1);
        let now = Utc::now();

        let current_hour = hourly_intervals(now, 1, 1, true)[0];
        aggregator
            .add_data_at(
                &source,
                &[numeric_contribution(current_hour, 12.0, now)],
                now,
            )
            .await;

        // A later add for a different field must not wipe the earlier one.
        let mut humidity = WeatherConditionsData::default();
        humidity.relative_humidity =
            Some(DataPoint::numeric(now, 55.0, UnitKind::Percent));
        aggregator
            .add_data_at(&source, &[IntervalData::new(current_hour, humidity)], now)
            .await;

        let snapshot = aggregator.snapshot().await;
        assert_eq!(snapshot.len(), 4);
        let first = &snapshot[0].data;
        assert!(first.get_field("temperature").is_some());
        assert!(first.get_field("relative_humidity").is_some());
    }

    #[tokio::test]
    async fn source_interval_distributes_into_every_overlapping_aggregate() {
        let tz: Tz = "UTC".parse().unwrap();
        let aggregator = IntervalAggregator::<WeatherConditionsData>::new(1, 3, true, tz);
        let source = DataPointSource::new("nws", "NWS", 1);
        let now = Utc::now();

        let window = hourly_intervals(now, 1, 3, true);
        let span = TimeInterval::new(window[0].start, window[2].end).unwrap();
        aggregator
            .add_data_at(&source, &[numeric_contribution(span, 7.5, now)], now)
            .await;

        let snapshot = aggregator.snapshot().await;
        for entry in &snapshot {
            let Some(DataPoint::Numeric(n)) = entry.data.get_field("temperature") else {
                panic!("expected contribution in {}", entry.interval);
            };
            assert_eq!(n.quantity_ave.magnitude, 7.5);
        }
    }
}
