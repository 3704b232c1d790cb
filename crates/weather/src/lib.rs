//! Weather and astronomical data sources feeding the hub's interval
//! aggregation engines, each wrapped in a periodic monitor.

pub mod source;
pub mod sunrise_sunset_org;
pub mod usno;

pub use source::{GeographicLocation, WeatherDataSource, WeatherSourceMonitor};
pub use sunrise_sunset_org::SunriseSunsetOrgSource;
pub use usno::UsnoSource;
