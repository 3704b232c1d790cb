//! Integration contracts: keys, health, gateway capability records, the
//! registry of installed integrations, and the service consumed by the
//! presentation layer.

mod gateway;
mod model;
mod repository;
mod service;

pub use gateway::*;
pub use model::*;
pub use repository::*;
pub use service::*;
