//! Multi-source time-interval aggregation for weather and environmental
//! data, plus the prioritized fan-in service the data sources feed.

mod aggregator;
mod interval;
mod records;
mod service;

pub use aggregator::*;
pub use interval::*;
pub use records::*;
pub use service::*;
