//! Integration enablement and configuration persistence.

mod repository;

pub use repository::IntegrationRepository;
