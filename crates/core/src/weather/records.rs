//! Environmental record types fed through the aggregation engine.

use super::interval::{DataPoint, EnvironmentalData};

macro_rules! environmental_record {
    (
        $(#[$doc:meta])*
        $name:ident { $($field:ident),+ $(,)? }
    ) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            $(pub $field: Option<DataPoint>,)+
        }

        impl EnvironmentalData for $name {
            fn field_names() -> &'static [&'static str] {
                &[$(stringify!($field)),+]
            }

            fn get_field(&self, name: &str) -> Option<&DataPoint> {
                match name {
                    $(stringify!($field) => self.$field.as_ref(),)+
                    _ => None,
                }
            }

            fn set_field(&mut self, name: &str, value: Option<DataPoint>) {
                match name {
                    $(stringify!($field) => self.$field = value,)+
                    _ => {}
                }
            }
        }
    };
}

environmental_record! {
    /// Current observed conditions.
    WeatherConditionsData {
        description,
        temperature,
        relative_humidity,
        dew_point,
        heat_index,
        wind_chill,
        windspeed_ave,
        windspeed_max,
        wind_direction,
        cloud_cover,
        cloud_ceiling,
        visibility,
        barometric_pressure,
        sea_level_pressure,
        precipitation_last_hour,
        notable_phenomena,
    }
}

environmental_record! {
    /// Forecast data for a specific period.
    WeatherForecastData {
        description,
        temperature_min,
        temperature_ave,
        temperature_max,
        precipitation,
        precipitation_probability,
        relative_humidity,
        windspeed_ave,
        windspeed_max,
        wind_direction,
        cloud_cover,
        is_daytime,
    }
}

environmental_record! {
    /// Historical observations for a past period.
    WeatherHistoryData {
        temperature_min,
        temperature_ave,
        temperature_max,
        precipitation,
        windspeed_ave,
        cloud_cover,
    }
}

environmental_record! {
    /// Sun and moon data for one day.
    AstronomicalData {
        sunrise,
        sunset,
        solar_noon,
        day_length,
        civil_twilight_begin,
        civil_twilight_end,
        nautical_twilight_begin,
        nautical_twilight_end,
        astronomical_twilight_begin,
        astronomical_twilight_end,
        moonrise,
        moonset,
        moon_illumination,
        moon_is_waxing,
        moon_phase,
    }
}

impl WeatherForecastData {
    /// Fallback chain for display when only part of the spread is known.
    pub fn temperature(&self) -> Option<&DataPoint> {
        self.temperature_ave
            .as_ref()
            .or(self.temperature_max.as_ref())
            .or(self.temperature_min.as_ref())
    }
}
