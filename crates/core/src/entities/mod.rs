//! Entity domain: devices, their hidden states, attributes, geometry and
//! the delegation graph between entities.

mod delegation;
mod model;
mod repository;
mod service;

pub use delegation::*;
pub use model::*;
pub use repository::*;
pub use service::*;
