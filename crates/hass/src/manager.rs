//! Per-integration manager: owns the configuration attributes, constructs
//! the remote client, validates connectivity and exposes health.

use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use hearth_core::errors::{Error, Result};
use hearth_core::integrations::{
    classify_probe_error, AttributeValueType, IntegrationAttribute, IntegrationAttributeSpec,
    IntegrationHealthStatus, IntegrationHealthStatusType, IntegrationMetadata,
    IntegrationRepositoryTrait, ValidationResult,
};

use crate::client::HassClient;

pub const HASS_INTEGRATION_ID: &str = "hass";

pub const API_BASE_URL_ATTR: &str = "api_base_url";
pub const API_TOKEN_ATTR: &str = "api_token";
pub const ADD_ALARM_EVENTS_ATTR: &str = "add_alarm_events";

pub const HASS_ATTRIBUTE_SPECS: [IntegrationAttributeSpec; 3] = [
    IntegrationAttributeSpec {
        name: API_BASE_URL_ATTR,
        label: "Server URL",
        description: "e.g., https://myhassserver:8123",
        value_type: AttributeValueType::Text,
        is_required: true,
        is_secret: true,
    },
    IntegrationAttributeSpec {
        name: API_TOKEN_ATTR,
        label: "API Token",
        description: "Long-lived access token",
        value_type: AttributeValueType::Text,
        is_required: true,
        is_secret: true,
    },
    IntegrationAttributeSpec {
        name: ADD_ALARM_EVENTS_ATTR,
        label: "Add Alarm Events",
        description: "Register alarm event hooks for discovered sensors",
        value_type: AttributeValueType::Boolean,
        is_required: false,
        is_secret: false,
    },
];

pub const HASS_METADATA: IntegrationMetadata = IntegrationMetadata {
    integration_id: HASS_INTEGRATION_ID,
    label: "Home Assistant",
    attribute_specs: &HASS_ATTRIBUTE_SPECS,
};

#[derive(Default)]
struct ManagerState {
    client: Option<Arc<HassClient>>,
    add_alarm_events: bool,
}

/// Listener invoked after a settings reload completes.
pub type SettingsListener = Arc<dyn Fn() + Send + Sync>;

pub struct HassManager {
    repository: Arc<dyn IntegrationRepositoryTrait>,
    state: RwLock<ManagerState>,
    health: Mutex<IntegrationHealthStatus>,
    change_listeners: Mutex<Vec<SettingsListener>>,
}

impl std::fmt::Debug for HassManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HassManager").finish_non_exhaustive()
    }
}

impl HassManager {
    pub fn new(repository: Arc<dyn IntegrationRepositoryTrait>) -> Self {
        Self {
            repository,
            state: RwLock::new(ManagerState::default()),
            health: Mutex::new(IntegrationHealthStatus::unknown()),
            change_listeners: Mutex::new(Vec::new()),
        }
    }

    /// The remote client, or None while disabled or mid-rebuild. Callers
    /// must tolerate the gap and retry on their next cycle.
    pub async fn client(&self) -> Option<Arc<HassClient>> {
        self.state.read().await.client.clone()
    }

    pub async fn should_add_alarm_events(&self) -> bool {
        self.state.read().await.add_alarm_events
    }

    pub fn register_change_listener(&self, listener: SettingsListener) {
        self.change_listeners.lock().unwrap().push(listener);
    }

    pub fn health_status(&self) -> IntegrationHealthStatus {
        self.health.lock().unwrap().clone()
    }

    fn update_health(&self, status: IntegrationHealthStatusType, message: Option<String>) {
        let mut health = self.health.lock().unwrap();
        let old_status = health.status;
        health.transition(status, message.clone());
        if old_status != status {
            match status {
                IntegrationHealthStatusType::Healthy => info!("HASS integration is now healthy"),
                IntegrationHealthStatusType::Disabled => info!("HASS integration is now disabled"),
                other => warn!(
                    "HASS integration health changed to {}: {}",
                    other.label(),
                    message.unwrap_or_default()
                ),
            }
        }
    }

    /// Rebuild the client from persisted settings and reclassify health.
    /// The write lock is held only while swapping manager state.
    pub async fn reload(&self) {
        match self.build_from_settings().await {
            Ok((client, add_alarm_events)) => {
                let mut state = self.state.write().await;
                state.client = Some(Arc::new(client));
                state.add_alarm_events = add_alarm_events;
                drop(state);
                self.update_health(IntegrationHealthStatusType::Healthy, None);
            }
            Err(err) => {
                let mut state = self.state.write().await;
                state.client = None;
                drop(state);
                let status = match &err {
                    Error::IntegrationDisabled(_) => IntegrationHealthStatusType::Disabled,
                    Error::Integration(_) | Error::IntegrationAttribute(_) => {
                        IntegrationHealthStatusType::ConfigError
                    }
                    Error::Connection(message) => classify_probe_error(message),
                    _ => IntegrationHealthStatusType::TemporaryError,
                };
                self.update_health(status, Some(err.to_string()));
            }
        }
    }

    /// Reload, then notify listeners outside the settings lock. Each
    /// listener schedules its own reinitialization on its next cycle.
    pub async fn notify_settings_changed(&self) {
        self.reload().await;
        let listeners = self.change_listeners.lock().unwrap().clone();
        debug!("Notifying {} HASS settings listeners", listeners.len());
        for listener in listeners {
            listener();
        }
    }

    async fn build_from_settings(&self) -> Result<(HassClient, bool)> {
        let integration = self
            .repository
            .get_integration(HASS_INTEGRATION_ID)?
            .ok_or_else(|| Error::integration("Home Assistant integration is not implemented"))?;
        if !integration.is_enabled {
            return Err(Error::IntegrationDisabled(
                "Home Assistant integration is not enabled".into(),
            ));
        }

        let attributes = self.repository.load_attributes(HASS_INTEGRATION_ID)?;
        let client = create_client(&attributes, true)?;

        // Probe so auth and connectivity problems surface at reload time
        // instead of on the first poll.
        if let Err(err) = client.states().await {
            return Err(Error::Connection(err.to_string()));
        }

        let add_alarm_events = attributes
            .iter()
            .find(|attr| attr.integration_key.integration_name == ADD_ALARM_EVENTS_ATTR)
            .map(IntegrationAttribute::bool_value)
            .unwrap_or(false);
        Ok((client, add_alarm_events))
    }

    /// Fetch the remote states keyed by entity id. Failures mark the
    /// integration's health and propagate to the caller.
    pub async fn fetch_states(&self) -> Result<BTreeMap<String, crate::models::HassState>> {
        let Some(client) = self.client().await else {
            return Err(Error::IntegrationDisabled(
                "Home Assistant client not available".into(),
            ));
        };
        match client.states().await {
            Ok(states) => Ok(states
                .into_iter()
                .map(|state| (state.entity_id.clone(), state))
                .collect()),
            Err(err) => {
                self.update_health(
                    IntegrationHealthStatusType::ConnectionError,
                    Some(format!("Failed to fetch states: {err}")),
                );
                Err(err)
            }
        }
    }

    /// Probe a candidate configuration without touching manager state.
    pub async fn validate_configuration(
        &self,
        attributes: &[IntegrationAttribute],
    ) -> ValidationResult {
        // Relaxed requirements so the UI can surface partial errors.
        let client = match create_client(attributes, false) {
            Ok(client) => client,
            Err(err) => {
                return ValidationResult::error(
                    IntegrationHealthStatusType::ConfigError,
                    err.to_string(),
                )
            }
        };
        match client.states().await {
            Ok(_) => ValidationResult::success(),
            Err(err) => {
                let message = err.to_string();
                ValidationResult::error(classify_probe_error(&message), message)
            }
        }
    }
}

fn attribute_value<'a>(
    attributes: &'a [IntegrationAttribute],
    name: &str,
) -> Option<&'a IntegrationAttribute> {
    attributes
        .iter()
        .find(|attr| attr.integration_key.integration_name == name)
}

/// Build a client from attribute rows. With `enforce_requirements`, a
/// missing or empty required attribute is an attribute error; without it,
/// missing values still fail but with a softer message, letting validation
/// pinpoint the gap.
pub fn create_client(
    attributes: &[IntegrationAttribute],
    enforce_requirements: bool,
) -> Result<HassClient> {
    for spec in &HASS_ATTRIBUTE_SPECS {
        if !spec.is_required {
            continue;
        }
        let present = attribute_value(attributes, spec.name)
            .map(|attr| !attr.value.trim().is_empty())
            .unwrap_or(false);
        if !present && enforce_requirements {
            return Err(Error::attribute(format!("Missing HASS attribute {}", spec.name)));
        }
    }

    let base_url = attribute_value(attributes, API_BASE_URL_ATTR)
        .map(|attr| attr.value.clone())
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| Error::attribute("Missing HASS attribute api_base_url"))?;
    let token = attribute_value(attributes, API_TOKEN_ATTR)
        .map(|attr| attr.value.clone())
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| Error::attribute("Missing HASS attribute api_token"))?;

    HassClient::new(&base_url, &token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::integrations::IntegrationKey;

    fn attr(name: &str, value: &str) -> IntegrationAttribute {
        IntegrationAttribute {
            id: 0,
            integration_key: IntegrationKey::new(HASS_INTEGRATION_ID, name),
            value: value.into(),
            value_type: AttributeValueType::Text,
            is_required: true,
            is_secret: true,
        }
    }

    #[test]
    fn missing_required_attribute_is_an_attribute_error() {
        let err = create_client(&[attr(API_BASE_URL_ATTR, "http://hass:8123")], true).unwrap_err();
        assert!(matches!(err, Error::IntegrationAttribute(_)));

        let err = create_client(&[attr(API_TOKEN_ATTR, "   ")], true).unwrap_err();
        assert!(matches!(err, Error::IntegrationAttribute(_)));
    }

    #[test]
    fn complete_attributes_build_a_client() {
        let attributes = [
            attr(API_BASE_URL_ATTR, "http://hass:8123/"),
            attr(API_TOKEN_ATTR, "token"),
        ];
        assert!(create_client(&attributes, true).is_ok());
    }

    #[test]
    fn metadata_declares_required_secret_attributes() {
        let required: Vec<&str> = HASS_METADATA
            .attribute_specs
            .iter()
            .filter(|spec| spec.is_required)
            .map(|spec| spec.name)
            .collect();
        assert_eq!(required, vec![API_BASE_URL_ATTR, API_TOKEN_ATTR]);
        assert!(HASS_METADATA.attribute_specs[0].is_secret);
    }
}
