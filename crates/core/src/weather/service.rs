//! Prioritized fan-in of weather and astronomical data: one aggregation
//! engine per data kind, fed by the registered data-source monitors and
//! read by the presentation layer.

use chrono::Utc;
use chrono_tz::Tz;

use super::aggregator::IntervalAggregator;
use super::interval::{DataPointSource, IntervalData};
use super::records::{
    AstronomicalData, WeatherConditionsData, WeatherForecastData, WeatherHistoryData,
};

/// Hours of hourly forecast retained.
const HOURLY_FORECAST_COUNT: usize = 24;
/// Days of daily forecast retained.
const DAILY_FORECAST_COUNT: usize = 7;
/// Days of astronomical data retained (today plus the next two).
const ASTRONOMICAL_COUNT: usize = 3;
/// Days of history retained, most recent first.
const DAILY_HISTORY_COUNT: usize = 7;

pub struct WeatherService {
    current_conditions: IntervalAggregator<WeatherConditionsData>,
    hourly_forecast: IntervalAggregator<WeatherForecastData>,
    daily_forecast: IntervalAggregator<WeatherForecastData>,
    astronomical: IntervalAggregator<AstronomicalData>,
    daily_history: IntervalAggregator<WeatherHistoryData>,
}

impl WeatherService {
    /// `timezone` drives the local-midnight alignment of the daily engines.
    pub fn new(timezone: Tz) -> Self {
        Self {
            current_conditions: IntervalAggregator::new(1, 1, true, timezone),
            hourly_forecast: IntervalAggregator::new(1, HOURLY_FORECAST_COUNT, true, timezone),
            daily_forecast: IntervalAggregator::new(24, DAILY_FORECAST_COUNT, true, timezone),
            astronomical: IntervalAggregator::new(24, ASTRONOMICAL_COUNT, true, timezone),
            daily_history: IntervalAggregator::new(24, DAILY_HISTORY_COUNT, false, timezone),
        }
    }

    pub async fn ensure_initialized(&self) {
        self.current_conditions.ensure_initialized().await;
        self.hourly_forecast.ensure_initialized().await;
        self.daily_forecast.ensure_initialized().await;
        self.astronomical.ensure_initialized().await;
        self.daily_history.ensure_initialized().await;
    }

    pub async fn update_current_conditions(
        &self,
        source: &DataPointSource,
        data: &[IntervalData<WeatherConditionsData>],
    ) {
        self.current_conditions.add_data(source, data).await;
    }

    pub async fn update_hourly_forecast(
        &self,
        source: &DataPointSource,
        data: &[IntervalData<WeatherForecastData>],
    ) {
        self.hourly_forecast.add_data(source, data).await;
    }

    pub async fn update_daily_forecast(
        &self,
        source: &DataPointSource,
        data: &[IntervalData<WeatherForecastData>],
    ) {
        self.daily_forecast.add_data(source, data).await;
    }

    pub async fn update_astronomical_data(
        &self,
        source: &DataPointSource,
        data: &[IntervalData<AstronomicalData>],
    ) {
        self.astronomical.add_data(source, data).await;
    }

    pub async fn update_daily_history(
        &self,
        source: &DataPointSource,
        data: &[IntervalData<WeatherHistoryData>],
    ) {
        self.daily_history.add_data(source, data).await;
    }

    /// Conditions for the interval containing now, if any source has fed it.
    pub async fn get_current_conditions(&self) -> Option<WeatherConditionsData> {
        self.current_conditions
            .data_at(Utc::now())
            .await
            .map(|entry| entry.data)
    }

    pub async fn get_hourly_forecast(&self) -> Vec<IntervalData<WeatherForecastData>> {
        self.hourly_forecast.snapshot().await
    }

    pub async fn get_daily_forecast(&self) -> Vec<IntervalData<WeatherForecastData>> {
        self.daily_forecast.snapshot().await
    }

    pub async fn get_todays_astronomical(&self) -> Option<AstronomicalData> {
        self.astronomical
            .data_at(Utc::now())
            .await
            .map(|entry| entry.data)
    }

    pub async fn get_astronomical(&self) -> Vec<IntervalData<AstronomicalData>> {
        self.astronomical.snapshot().await
    }

    pub async fn get_daily_history(&self) -> Vec<IntervalData<WeatherHistoryData>> {
        self.daily_history.snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weather::{DataPoint, EnvironmentalData, TimeInterval, UnitKind};
    use chrono::Duration;

    #[tokio::test]
    async fn current_conditions_round_trip() {
        let service = WeatherService::new(chrono_tz::UTC);
        service.ensure_initialized().await;
        assert!(service.get_current_conditions().await.is_none());

        let now = Utc::now();
        let source = DataPointSource::new("nws", "NWS", 1);
        let mut data = WeatherConditionsData::default();
        data.temperature = Some(DataPoint::numeric(now, 18.0, UnitKind::Celsius));
        let span = TimeInterval::new(now - Duration::minutes(30), now + Duration::minutes(30))
            .unwrap();
        service
            .update_current_conditions(&source, &[IntervalData::new(span, data)])
            .await;

        let conditions = service.get_current_conditions().await.expect("conditions");
        let Some(DataPoint::Numeric(temp)) = conditions.get_field("temperature") else {
            panic!("expected temperature");
        };
        assert_eq!(temp.quantity_ave.magnitude, 18.0);
    }

    #[tokio::test]
    async fn forecast_window_sizes() {
        let service = WeatherService::new(chrono_tz::UTC);
        service.ensure_initialized().await;
        assert_eq!(service.get_hourly_forecast().await.len(), 24);
        assert_eq!(service.get_daily_forecast().await.len(), 7);
        assert_eq!(service.get_daily_history().await.len(), 7);
    }

    #[tokio::test]
    async fn history_windows_are_most_recent_first() {
        let service = WeatherService::new(chrono_tz::UTC);
        service.ensure_initialized().await;
        let history = service.get_daily_history().await;
        assert!(history[0].interval.start > history[1].interval.start);
        assert!(history[0].interval.end <= Utc::now());
    }
}
