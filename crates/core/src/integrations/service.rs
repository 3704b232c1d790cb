//! The in-process gateway surface consumed by the presentation layer.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

use crate::entities::{EntityService, Sensor};
use crate::errors::Result;
use crate::sensors::{SensorResponse, SensorResponseBus};

use super::gateway::{IntegrationController, IntegrationGateway, IntegrationRegistry};
use super::model::{
    ControlResult, IntegrationAttribute, IntegrationDetails, IntegrationHealthStatus,
    IntegrationKey, ProcessingResult, ValidationResult,
};
use super::repository::{IntegrationRepositoryTrait, NewIntegrationAttribute};

/// Row of the integration listing shown by the presentation layer.
#[derive(Debug, Clone)]
pub struct IntegrationSummary {
    pub integration_id: String,
    pub label: String,
    pub is_enabled: bool,
    pub health: IntegrationHealthStatus,
}

/// A sensor together with its recent responses, most-recent first.
#[derive(Debug, Clone)]
pub struct SensorStatus {
    pub sensor: Sensor,
    pub responses: Vec<SensorResponse>,
}

pub struct IntegrationService {
    registry: Arc<IntegrationRegistry>,
    repository: Arc<dyn IntegrationRepositoryTrait>,
    entity_service: Arc<EntityService>,
    sensor_bus: Arc<SensorResponseBus>,
}

impl IntegrationService {
    pub fn new(
        registry: Arc<IntegrationRegistry>,
        repository: Arc<dyn IntegrationRepositoryTrait>,
        entity_service: Arc<EntityService>,
        sensor_bus: Arc<SensorResponseBus>,
    ) -> Self {
        Self {
            registry,
            repository,
            entity_service,
            sensor_bus,
        }
    }

    pub async fn list_integrations(&self) -> Result<Vec<IntegrationSummary>> {
        let mut summaries = Vec::new();
        for gateway in self.registry.all() {
            let metadata = gateway.metadata();
            let is_enabled = self
                .repository
                .get_integration(metadata.integration_id)?
                .map(|row| row.is_enabled)
                .unwrap_or(false);
            summaries.push(IntegrationSummary {
                integration_id: metadata.integration_id.to_string(),
                label: metadata.label.to_string(),
                is_enabled,
                health: gateway.health_status().await,
            });
        }
        Ok(summaries)
    }

    /// Enable an integration with the given attribute values. The
    /// configuration is validated first; persistence and the settings
    /// broadcast only happen when validation passes.
    pub async fn enable(
        &self,
        integration_id: &str,
        attributes: HashMap<String, String>,
    ) -> Result<ValidationResult> {
        let gateway = self.registry.get(integration_id)?;
        let candidate = self.build_candidate_attributes(integration_id, &attributes)?;

        let validation = gateway.validate_configuration(&candidate).await;
        if !validation.is_valid {
            return Ok(validation);
        }

        self.persist_attributes(integration_id, &attributes).await?;
        self.repository.set_enabled(integration_id, true).await?;
        gateway.notify_settings_changed().await;
        self.sensor_bus.clear_overrides();
        info!("Integration {integration_id} enabled");
        Ok(validation)
    }

    pub async fn disable(&self, integration_id: &str) -> Result<()> {
        let gateway = self.registry.get(integration_id)?;
        self.repository.set_enabled(integration_id, false).await?;
        gateway.notify_settings_changed().await;
        self.sensor_bus.clear_overrides();
        info!("Integration {integration_id} disabled");
        Ok(())
    }

    /// Persist new settings, then reload the manager and notify listeners.
    /// Listeners are notified outside any lock held here; each may schedule
    /// its own reinitialization on its next cycle.
    pub async fn update_settings(
        &self,
        integration_id: &str,
        attributes: HashMap<String, String>,
    ) -> Result<ValidationResult> {
        let gateway = self.registry.get(integration_id)?;
        self.persist_attributes(integration_id, &attributes).await?;
        gateway.notify_settings_changed().await;
        self.sensor_bus.clear_overrides();

        let candidate = self.build_candidate_attributes(integration_id, &attributes)?;
        Ok(gateway.validate_configuration(&candidate).await)
    }

    pub async fn sync(&self, integration_id: &str) -> Result<ProcessingResult> {
        let gateway = self.registry.get(integration_id)?;
        gateway.sync().await
    }

    pub async fn health(&self, integration_id: &str) -> Result<IntegrationHealthStatus> {
        let gateway = self.registry.get(integration_id)?;
        Ok(gateway.health_status().await)
    }

    /// Dispatch a control request and, on success, install a short-lived
    /// override so reads reflect the command before the next poll lands.
    pub async fn control(
        &self,
        key: IntegrationKey,
        payload: Option<serde_json::Value>,
        control_value: &str,
    ) -> Result<ControlResult> {
        let gateway = self.registry.get(&key.integration_id)?;
        let details = IntegrationDetails::new(key.clone(), payload);
        let result = gateway.controller().control(&details, control_value).await;

        match &result.new_value {
            Some(new_value) if result.errors.is_empty() => {
                self.sensor_bus.add_override(key, new_value.clone());
            }
            _ => {
                debug!(
                    "Control of {key} did not succeed, no override installed: {:?}",
                    result.errors
                );
            }
        }
        Ok(result)
    }

    /// Latest responses grouped by sensor; the optional filter restricts
    /// the result to the given sensor integration keys.
    pub fn latest_sensor_responses(
        &self,
        filter: Option<&[IntegrationKey]>,
    ) -> Result<Vec<SensorStatus>> {
        let sensors = match filter {
            Some(keys) => self.entity_service.find_sensors_by_keys(keys)?,
            None => self.entity_service.list_sensors()?,
        };

        let keys: Vec<IntegrationKey> =
            sensors.iter().map(|s| s.integration_key.clone()).collect();
        let mut responses = self.sensor_bus.latest_for(&keys);

        Ok(sensors
            .into_iter()
            .filter_map(|sensor| {
                responses
                    .remove(&sensor.integration_key)
                    .map(|responses| SensorStatus { sensor, responses })
            })
            .collect())
    }

    fn build_candidate_attributes(
        &self,
        integration_id: &str,
        values: &HashMap<String, String>,
    ) -> Result<Vec<IntegrationAttribute>> {
        let gateway = self.registry.get(integration_id)?;
        let mut persisted: HashMap<IntegrationKey, IntegrationAttribute> = self
            .repository
            .load_attributes(integration_id)?
            .into_iter()
            .map(|attr| (attr.integration_key.clone(), attr))
            .collect();

        let mut candidate = Vec::new();
        for spec in gateway.metadata().attribute_specs {
            let key = IntegrationKey::new(integration_id, spec.name);
            let value = values
                .get(spec.name)
                .cloned()
                .or_else(|| persisted.remove(&key).map(|attr| attr.value));
            let Some(value) = value else { continue };
            candidate.push(IntegrationAttribute {
                id: 0,
                integration_key: key,
                value,
                value_type: spec.value_type,
                is_required: spec.is_required,
                is_secret: spec.is_secret,
            });
        }
        Ok(candidate)
    }

    async fn persist_attributes(
        &self,
        integration_id: &str,
        values: &HashMap<String, String>,
    ) -> Result<()> {
        let gateway = self.registry.get(integration_id)?;
        let mut rows = Vec::new();
        for spec in gateway.metadata().attribute_specs {
            let Some(value) = values.get(spec.name) else {
                continue;
            };
            rows.push(NewIntegrationAttribute {
                integration_key: IntegrationKey::new(integration_id, spec.name),
                value: value.clone(),
                value_type: spec.value_type,
                is_required: spec.is_required,
                is_secret: spec.is_secret,
            });
        }
        if rows.is_empty() {
            warn!("No recognized attributes to persist for {integration_id}");
            return Ok(());
        }
        self.repository.upsert_attributes(rows).await
    }
}
