//! Gateway capability record each integration ships, plus the registry of
//! installed integrations.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::monitors::PeriodicMonitor;

use super::model::{
    ControlResult, IntegrationAttribute, IntegrationDetails, IntegrationHealthStatus,
    IntegrationMetadata, ProcessingResult, ValidationResult,
};

/// Maps a local control request to an integration-specific remote call.
#[async_trait]
pub trait IntegrationController: Send + Sync {
    async fn control(&self, details: &IntegrationDetails, control_value: &str) -> ControlResult;
}

/// Capability record exposed by each installed integration.
#[async_trait]
pub trait IntegrationGateway: Send + Sync + std::fmt::Debug {
    fn metadata(&self) -> &IntegrationMetadata;

    fn controller(&self) -> Arc<dyn IntegrationController>;

    fn monitor(&self) -> Arc<dyn PeriodicMonitor>;

    /// Called after settings were persisted: reload the manager (rebuild
    /// the remote client) and notify downstream listeners. Listeners must
    /// be idempotent and tolerate a missing client mid-rebuild.
    async fn notify_settings_changed(&self);

    async fn health_status(&self) -> IntegrationHealthStatus;

    /// Probe a candidate configuration without touching manager state.
    /// Requirements are relaxed so the UI can surface partial errors.
    async fn validate_configuration(&self, attributes: &[IntegrationAttribute])
        -> ValidationResult;

    /// Reconcile the remote model into the local entity model.
    async fn sync(&self) -> Result<ProcessingResult>;
}

/// Registry of installed integration gateways, keyed by integration id.
/// Gateways are registered once by the composition root.
#[derive(Default)]
pub struct IntegrationRegistry {
    gateways: BTreeMap<String, Arc<dyn IntegrationGateway>>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gateway: Arc<dyn IntegrationGateway>) {
        let id = gateway.metadata().integration_id.to_string();
        self.gateways.insert(id, gateway);
    }

    pub fn get(&self, integration_id: &str) -> Result<Arc<dyn IntegrationGateway>> {
        self.gateways
            .get(integration_id)
            .cloned()
            .ok_or_else(|| Error::integration(format!("Unknown integration: {integration_id}")))
    }

    pub fn all(&self) -> Vec<Arc<dyn IntegrationGateway>> {
        self.gateways.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.gateways.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_integration_is_an_error() {
        let registry = IntegrationRegistry::new();
        let err = registry.get("nope").unwrap_err();
        assert!(matches!(err, Error::Integration(_)));
    }
}
