//! Sync engine: reconciles the remote device graph against the local
//! entity graph, preserving user enrichment on removal.

use log::{debug, info};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use hearth_core::entities::{
    AttributeType, Entity, EntityService, NewEntity, PredefinedAttribute,
};
use hearth_core::errors::{Error, Result};
use hearth_core::integrations::{IntegrationKey, ProcessingResult};
use hearth_storage_sqlite::{DbPool, ExclusionLock};

use crate::converter;
use crate::manager::{HassManager, HASS_INTEGRATION_ID};
use crate::models::{HassDevice, HassState};

pub const SYNC_LOCK_NAME: &str = "hass_integration_sync";
const RESULT_TITLE: &str = "Home Assistant Import Result";

pub struct HassSynchronizer {
    entity_service: Arc<EntityService>,
    pool: DbPool,
}

impl std::fmt::Debug for HassSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HassSynchronizer").finish_non_exhaustive()
    }
}

impl HassSynchronizer {
    pub fn new(entity_service: Arc<EntityService>, pool: DbPool) -> Self {
        Self {
            entity_service,
            pool,
        }
    }

    /// One synchronization at a time per integration; a concurrent attempt
    /// is rejected, not queued.
    pub async fn sync(&self, manager: &HassManager) -> Result<ProcessingResult> {
        let _lock = match ExclusionLock::try_acquire(Arc::clone(&self.pool), SYNC_LOCK_NAME) {
            Ok(lock) => lock,
            Err(Error::Runtime(message)) => {
                let mut result = ProcessingResult::new(RESULT_TITLE);
                result.error(message);
                return Ok(result);
            }
            Err(other) => return Err(other),
        };
        debug!("HASS integration sync started");

        if manager.client().await.is_none() {
            let mut result = ProcessingResult::new(RESULT_TITLE);
            result.error("Sync problem. Home Assistant integration disabled?");
            return Ok(result);
        }

        let states = manager.fetch_states().await?;
        let add_alarm_events = manager.should_add_alarm_events().await;
        let result = self.apply_states(states, add_alarm_events).await;
        debug!("HASS integration sync ended");
        Ok(result)
    }

    /// Diff the remote snapshot against the local model and apply. Issues
    /// with individual devices accumulate as errors; the rest still lands.
    pub(crate) async fn apply_states(
        &self,
        states: BTreeMap<String, HassState>,
        add_alarm_events: bool,
    ) -> ProcessingResult {
        let mut result = ProcessingResult::new(RESULT_TITLE);
        result.message(format!("Found {} current Home Assistant states.", states.len()));

        let existing = match self.existing_entities(&mut result) {
            Ok(existing) => existing,
            Err(err) => {
                result.error(format!("Failed to load existing entities: {err}"));
                return result;
            }
        };
        result.message(format!(
            "Found {} existing Home Assistant entities.",
            existing.len()
        ));

        let devices = converter::group_states_into_devices(&states);
        result.message(format!(
            "Found {} current Home Assistant devices.",
            devices.len()
        ));

        let mut remote_keys: HashSet<IntegrationKey> = HashSet::new();
        for device in devices.values() {
            let key = converter::device_to_integration_key(device);
            remote_keys.insert(key.clone());

            let outcome = match existing.get(&key) {
                Some(entity) => {
                    self.update_entity(entity, device, &mut result).await
                }
                None => self.create_entity(device, add_alarm_events, &mut result).await,
            };
            if let Err(err) = outcome {
                result.error(format!("Problem processing device {}: {err}", device.device_id));
            }
        }

        for (key, entity) in &existing {
            if remote_keys.contains(key) {
                continue;
            }
            if let Err(err) = self.remove_entity(entity, &mut result).await {
                result.error(format!("Problem removing entity {entity}: {err}"));
            }
        }

        result
    }

    fn existing_entities(
        &self,
        result: &mut ProcessingResult,
    ) -> Result<HashMap<IntegrationKey, Entity>> {
        let mut existing = HashMap::new();
        for entity in self
            .entity_service
            .list_entities_for_integration(HASS_INTEGRATION_ID)?
        {
            let key = match &entity.integration_key {
                Some(key) => key.clone(),
                None => {
                    result.error(format!("Entity found without valid Home Assistant Id: {entity}"));
                    // Unique placeholder so the removal pass still sees it.
                    IntegrationKey::new(HASS_INTEGRATION_ID, format!("missing-{}", entity.id))
                }
            };
            existing.insert(key, entity);
        }
        Ok(existing)
    }

    async fn create_entity(
        &self,
        device: &HassDevice,
        add_alarm_events: bool,
        result: &mut ProcessingResult,
    ) -> Result<()> {
        let name = converter::device_to_entity_name(device);
        let entity_type = converter::device_to_entity_type(device);
        let specs = converter::device_state_specs(device, &name, add_alarm_events);

        let mut attributes = Vec::new();
        if let Some(address) = converter::device_to_insteon_address(device) {
            attributes.push(PredefinedAttribute {
                name: converter::INSTEON_ADDRESS_ATTR_NAME.to_string(),
                value: address,
            });
        }

        let entity = self
            .entity_service
            .create_device(
                NewEntity {
                    name,
                    entity_type,
                    can_user_delete: false,
                    has_video_stream: entity_type == hearth_core::entities::EntityType::Camera,
                    integration_key: Some(converter::device_to_integration_key(device)),
                },
                attributes,
                specs,
            )
            .await?;
        result.message(format!("Created Home Assistant entity: {entity}"));
        Ok(())
    }

    async fn update_entity(
        &self,
        entity: &Entity,
        device: &HassDevice,
        result: &mut ProcessingResult,
    ) -> Result<()> {
        let mut changed = false;
        let mut entity = entity.clone();

        let remote_name = converter::device_to_entity_name(device);
        if entity.name != remote_name {
            result.message(format!("Name changed for {entity}. Setting to \"{remote_name}\""));
            entity.name = remote_name.clone();
            changed = true;
        }

        let remote_type = converter::device_to_entity_type(device);
        if entity.entity_type != remote_type {
            result.message(format!("Type changed for {entity}. Setting to \"{remote_type}\""));
            entity.entity_type = remote_type;
            changed = true;
        }

        if changed {
            entity = self.entity_service.update_entity(entity).await?;
        }

        changed |= self.reconcile_insteon_address(&entity, device, result).await?;
        changed |= self.reconcile_states(&entity, device, &remote_name, result).await?;

        if !changed {
            result.message(format!("No changes found for {entity}."));
        }
        Ok(())
    }

    async fn reconcile_insteon_address(
        &self,
        entity: &Entity,
        device: &HassDevice,
        result: &mut ProcessingResult,
    ) -> Result<bool> {
        let remote_address = converter::device_to_insteon_address(device);
        let attributes = self.entity_service.load_attributes(entity.id)?;
        let existing = attributes
            .iter()
            .find(|attr| attr.name == converter::INSTEON_ADDRESS_ATTR_NAME);

        match (existing, remote_address) {
            (Some(attr), Some(address)) if attr.value == address => Ok(false),
            (Some(attr), Some(address)) => {
                result.message(format!("Insteon address changed for {entity}. Setting to {address}"));
                self.entity_service
                    .upsert_attribute(
                        entity.id,
                        &attr.name.clone(),
                        &address,
                        AttributeType::Predefined,
                        false,
                    )
                    .await?;
                Ok(true)
            }
            (Some(attr), None) => {
                result.message(format!("Insteon address removed for {entity}. Removing {}", attr.value));
                self.entity_service.delete_attribute(attr.id).await?;
                Ok(true)
            }
            (None, Some(address)) => {
                result.message(format!("No insteon address for {entity}. Adding {address}"));
                self.entity_service
                    .upsert_attribute(
                        entity.id,
                        converter::INSTEON_ADDRESS_ATTR_NAME,
                        &address,
                        AttributeType::Predefined,
                        false,
                    )
                    .await?;
                Ok(true)
            }
            (None, None) => Ok(false),
        }
    }

    /// Add missing sensors/controllers and remove those no longer
    /// reported. Elision is computed over the device's full state list so
    /// a suppressed duplicate never reappears as "missing".
    async fn reconcile_states(
        &self,
        entity: &Entity,
        device: &HassDevice,
        device_name: &str,
        result: &mut ProcessingResult,
    ) -> Result<bool> {
        let mut changed = false;

        let sensors = self.entity_service.load_sensors_for_entity(entity.id)?;
        let controllers = self.entity_service.load_controllers_for_entity(entity.id)?;
        let sensor_keys: HashMap<&IntegrationKey, i64> =
            sensors.iter().map(|s| (&s.integration_key, s.id)).collect();
        let controller_keys: HashMap<&IntegrationKey, i64> = controllers
            .iter()
            .map(|c| (&c.integration_key, c.id))
            .collect();

        // Alarm events are only registered at first discovery.
        let specs = converter::device_state_specs(device, device_name, false);
        let mut seen_keys: HashSet<IntegrationKey> = HashSet::new();
        let mut missing = Vec::new();
        for spec in specs {
            seen_keys.insert(spec.integration_key.clone());
            let known = sensor_keys.contains_key(&spec.integration_key)
                || controller_keys.contains_key(&spec.integration_key);
            if !known {
                result.message(format!(
                    "Missing sensors/controllers for {entity}. Adding {}",
                    spec.integration_key
                ));
                missing.push(spec);
            }
        }
        // Keys the elision rule suppressed still count as seen, so their
        // absence does not trigger removals of the surviving sibling.
        for state in &device.states {
            seen_keys.insert(converter::state_to_integration_key(state));
        }

        if !missing.is_empty() {
            self.entity_service.add_device_states(entity.id, missing).await?;
            changed = true;
        }

        for sensor in &sensors {
            if !seen_keys.contains(&sensor.integration_key) {
                result.message(format!("Removing sensor {} from {entity}", sensor.name));
                self.entity_service.delete_sensor(sensor.id).await?;
                // The state backing it is sync-owned; drop it too.
                self.entity_service.delete_state(sensor.entity_state_id).await?;
                changed = true;
            }
        }
        for controller in &controllers {
            if !seen_keys.contains(&controller.integration_key) {
                result.message(format!("Removing controller {} from {entity}", controller.name));
                self.entity_service.delete_controller(controller.id).await?;
                changed = true;
            }
        }

        Ok(changed)
    }

    /// Remove an entity that the remote no longer reports, unless the user
    /// has enriched it.
    async fn remove_entity(&self, entity: &Entity, result: &mut ProcessingResult) -> Result<()> {
        let deleted = self.entity_service.delete_entity_if_unenriched(entity).await?;
        if deleted {
            info!("Removed Home Assistant entity: {entity}");
            result.message(format!("Removing Home Assistant entity: {entity}"));
        } else {
            result.message(format!(
                "Preserving {entity}: user-added relationships exist."
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_storage_sqlite::{create_pool_with_size, run_migrations, EntityRepository, WriteHandle};
    use serde_json::json;

    fn test_setup() -> (Arc<EntityService>, Arc<EntityRepository>, DbPool) {
        let pool = create_pool_with_size(":memory:", 1).expect("pool");
        run_migrations(&pool).expect("migrations");
        let repository = Arc::new(EntityRepository::new(
            Arc::clone(&pool),
            WriteHandle::new(Arc::clone(&pool)),
        ));
        let service = Arc::new(EntityService::new(repository.clone()));
        (service, repository, pool)
    }

    fn states(raws: Vec<serde_json::Value>) -> BTreeMap<String, HassState> {
        raws.into_iter()
            .filter_map(HassState::from_api)
            .map(|s| (s.entity_id.clone(), s))
            .collect()
    }

    #[tokio::test]
    async fn sync_creates_then_removes_unenriched_entities() {
        let (service, _repo, pool) = test_setup();
        let synchronizer = HassSynchronizer::new(Arc::clone(&service), pool);

        let result = synchronizer
            .apply_states(
                states(vec![json!({"entity_id": "switch.foo", "state": "off"})]),
                false,
            )
            .await;
        assert!(result.errors.is_empty());
        assert!(result
            .messages
            .iter()
            .any(|m| m.starts_with("Created Home Assistant entity: foo")));

        let created = service.list_entities_for_integration(HASS_INTEGRATION_ID).unwrap();
        assert_eq!(created.len(), 1);
        assert!(!created[0].can_user_delete);

        // The remote stopped reporting the device; no user edges exist.
        let result = synchronizer.apply_states(states(vec![]), false).await;
        assert!(result.errors.is_empty());
        assert!(result.messages.iter().any(|m| m.starts_with("Removing")));
        assert!(service
            .list_entities_for_integration(HASS_INTEGRATION_ID)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn sync_preserves_entities_with_user_edits() {
        let (service, repo, pool) = test_setup();
        let synchronizer = HassSynchronizer::new(Arc::clone(&service), pool);

        synchronizer
            .apply_states(
                states(vec![json!({"entity_id": "switch.foo", "state": "off"})]),
                false,
            )
            .await;
        let entity = &service.list_entities_for_integration(HASS_INTEGRATION_ID).unwrap()[0];

        // The user placed it on a floorplan.
        repo.insert_position(entity.id, 1, 10.0, 20.0).await.unwrap();

        let result = synchronizer.apply_states(states(vec![]), false).await;
        assert!(result.messages.iter().any(|m| m.starts_with("Preserving")));
        assert_eq!(
            service
                .list_entities_for_integration(HASS_INTEGRATION_ID)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn second_sync_against_frozen_snapshot_is_empty_diff() {
        let (service, _repo, pool) = test_setup();
        let synchronizer = HassSynchronizer::new(Arc::clone(&service), pool);

        let snapshot = states(vec![
            json!({"entity_id": "switch.fan", "state": "off",
                "attributes": {"friendly_name": "Fan", "insteon_address": "aa.bb.cc"}}),
            json!({"entity_id": "light.fan_light", "state": "off",
                "attributes": {"insteon_address": "aa.bb.cc"}}),
            json!({"entity_id": "sensor.kitchen_temperature", "state": "21",
                "attributes": {"device_class": "temperature", "unit_of_measurement": "°C"}}),
        ]);

        let first = synchronizer.apply_states(snapshot.clone(), false).await;
        assert!(first.errors.is_empty());
        assert_eq!(
            first
                .messages
                .iter()
                .filter(|m| m.starts_with("Created"))
                .count(),
            2
        );

        let second = synchronizer.apply_states(snapshot, false).await;
        assert!(second.errors.is_empty());
        // Only per-device "no changes" notes; nothing created or removed.
        assert!(second
            .messages
            .iter()
            .all(|m| !m.starts_with("Created")
                && !m.starts_with("Removing")
                && !m.starts_with("Missing")));
    }

    #[tokio::test]
    async fn update_path_adds_and_removes_states() {
        let (service, _repo, pool) = test_setup();
        let synchronizer = HassSynchronizer::new(Arc::clone(&service), pool);

        synchronizer
            .apply_states(
                states(vec![
                    json!({"entity_id": "sensor.porch_temperature", "state": "10",
                        "attributes": {"device_class": "temperature"}}),
                    json!({"entity_id": "binary_sensor.porch_motion", "state": "off",
                        "attributes": {"device_class": "motion"}}),
                ]),
                false,
            )
            .await;
        let entity = &service.list_entities_for_integration(HASS_INTEGRATION_ID).unwrap()[0];
        assert_eq!(service.load_sensors_for_entity(entity.id).unwrap().len(), 2);

        // Motion disappears, humidity appears.
        let result = synchronizer
            .apply_states(
                states(vec![
                    json!({"entity_id": "sensor.porch_temperature", "state": "10",
                        "attributes": {"device_class": "temperature"}}),
                    json!({"entity_id": "sensor.porch_humidity", "state": "40",
                        "attributes": {"device_class": "humidity"}}),
                ]),
                false,
            )
            .await;
        assert!(result.errors.is_empty());

        let sensors = service.load_sensors_for_entity(entity.id).unwrap();
        let keys: Vec<String> = sensors
            .iter()
            .map(|s| s.integration_key.integration_name.clone())
            .collect();
        assert!(keys.contains(&"sensor.porch_temperature".to_string()));
        assert!(keys.contains(&"sensor.porch_humidity".to_string()));
        assert!(!keys.contains(&"binary_sensor.porch_motion".to_string()));
    }

    #[tokio::test]
    async fn rename_and_insteon_change_are_reported() {
        let (service, _repo, pool) = test_setup();
        let synchronizer = HassSynchronizer::new(Arc::clone(&service), pool);

        synchronizer
            .apply_states(
                states(vec![json!({"entity_id": "light.den", "state": "off",
                    "attributes": {"friendly_name": "Den", "insteon_address": "11.22.33"}})]),
                false,
            )
            .await;

        let result = synchronizer
            .apply_states(
                states(vec![json!({"entity_id": "light.den", "state": "off",
                    "attributes": {"friendly_name": "Den Lamp", "insteon_address": "44.55.66"}})]),
                false,
            )
            .await;
        assert!(result.errors.is_empty());
        assert!(result.messages.iter().any(|m| m.contains("Name changed")));
        assert!(result
            .messages
            .iter()
            .any(|m| m.contains("Insteon address changed")));

        let entity = &service.list_entities_for_integration(HASS_INTEGRATION_ID).unwrap()[0];
        assert_eq!(entity.name, "Den Lamp");
        let attributes = service.load_attributes(entity.id).unwrap();
        assert_eq!(attributes[0].value, "44.55.66");
    }

    #[tokio::test]
    async fn alarm_events_registered_only_when_configured() {
        use diesel::prelude::*;

        let (service, _repo, pool) = test_setup();
        let synchronizer = HassSynchronizer::new(Arc::clone(&service), Arc::clone(&pool));

        synchronizer
            .apply_states(
                states(vec![json!({"entity_id": "binary_sensor.gate_motion", "state": "off",
                    "attributes": {"device_class": "motion"}})]),
                true,
            )
            .await;
        assert_eq!(
            service.list_entities_for_integration(HASS_INTEGRATION_ID).unwrap().len(),
            1
        );

        let mut conn = hearth_storage_sqlite::get_connection(&pool).unwrap();
        let events: i64 = hearth_storage_sqlite::schema::event_definitions::table
            .count()
            .get_result(&mut conn)
            .unwrap();
        assert_eq!(events, 1);

        // Without the flag, a fresh motion sensor gets no event hook.
        synchronizer
            .apply_states(
                states(vec![
                    json!({"entity_id": "binary_sensor.gate_motion", "state": "off",
                        "attributes": {"device_class": "motion"}}),
                    json!({"entity_id": "binary_sensor.shed_motion", "state": "off",
                        "attributes": {"device_class": "motion"}}),
                ]),
                false,
            )
            .await;
        let events: i64 = hearth_storage_sqlite::schema::event_definitions::table
            .count()
            .get_result(&mut conn)
            .unwrap();
        assert_eq!(events, 1);
    }
}
