//! Core domain model and services for the hearth home-automation hub.
//!
//! This crate is storage- and transport-agnostic: repositories are traits
//! implemented by `hearth-storage-sqlite`, remote clients live in the
//! integration crates. Everything here is wired together by the server app
//! through constructor injection.

pub mod entities;
pub mod errors;
pub mod integrations;
pub mod monitors;
pub mod sensors;
pub mod weather;

pub use errors::{Error, Result};
