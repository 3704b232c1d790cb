//! Home Assistant integration: the reference implementation of the hub's
//! integration contract. Discovers remote states, groups them into
//! devices, reconciles them against the local entity model, polls live
//! sensor values and bridges control commands back out.

pub mod client;
pub mod controller;
pub mod converter;
pub mod gateway;
pub mod manager;
pub mod models;
pub mod monitor;
pub mod sync;

pub use client::HassClient;
pub use controller::HassController;
pub use gateway::HassGateway;
pub use manager::{HassManager, HASS_INTEGRATION_ID};
pub use monitor::HassMonitor;
pub use sync::HassSynchronizer;
