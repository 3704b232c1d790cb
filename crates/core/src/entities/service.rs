//! Entity service: repository facade that fires the change broadcast
//! exactly once after each committed mutation, no matter how many rows the
//! mutation touched.

use log::{debug, warn};
use std::sync::{Arc, Mutex};

use crate::errors::Result;
use crate::integrations::IntegrationKey;

use super::model::{
    AttributeType, Controller, Entity, EntityAttribute, EntityState, EntityView, NewEntity,
    NewEntityState, Sensor, UserRelationshipSummary,
};
use super::repository::{DeviceStateSpec, EntityRepositoryTrait, PredefinedAttribute};

/// Callback invoked after a mutation commits, so in-memory caches reload.
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

pub struct EntityService {
    repository: Arc<dyn EntityRepositoryTrait>,
    change_listeners: Mutex<Vec<ChangeListener>>,
}

impl EntityService {
    pub fn new(repository: Arc<dyn EntityRepositoryTrait>) -> Self {
        Self {
            repository,
            change_listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn repository(&self) -> Arc<dyn EntityRepositoryTrait> {
        Arc::clone(&self.repository)
    }

    pub fn register_change_listener(&self, listener: ChangeListener) {
        self.change_listeners.lock().unwrap().push(listener);
    }

    /// Fires after commit, never inside a transaction, so listeners cannot
    /// observe values that might roll back.
    fn notify_change_listeners(&self) {
        let listeners = self.change_listeners.lock().unwrap().clone();
        debug!("Notifying {} entity change listeners", listeners.len());
        for listener in listeners {
            listener();
        }
    }

    // Reads delegate straight to the repository.

    pub fn get_entity(&self, entity_id: i64) -> Result<Entity> {
        self.repository.get_entity(entity_id)
    }

    pub fn list_entities_for_integration(&self, integration_id: &str) -> Result<Vec<Entity>> {
        self.repository.list_entities_for_integration(integration_id)
    }

    pub fn find_entity_by_integration_key(&self, key: &IntegrationKey) -> Result<Option<Entity>> {
        self.repository.find_entity_by_integration_key(key)
    }

    pub fn load_states(&self, entity_id: i64) -> Result<Vec<EntityState>> {
        self.repository.load_states(entity_id)
    }

    pub fn load_attributes(&self, entity_id: i64) -> Result<Vec<EntityAttribute>> {
        self.repository.load_attributes(entity_id)
    }

    pub fn load_sensors_for_entity(&self, entity_id: i64) -> Result<Vec<Sensor>> {
        self.repository.load_sensors_for_entity(entity_id)
    }

    pub fn load_controllers_for_entity(&self, entity_id: i64) -> Result<Vec<Controller>> {
        self.repository.load_controllers_for_entity(entity_id)
    }

    pub fn list_sensors(&self) -> Result<Vec<Sensor>> {
        self.repository.list_sensors()
    }

    pub fn find_sensors_by_keys(&self, keys: &[IntegrationKey]) -> Result<Vec<Sensor>> {
        self.repository.find_sensors_by_keys(keys)
    }

    pub fn find_controller_by_key(&self, key: &IntegrationKey) -> Result<Option<Controller>> {
        self.repository.find_controller_by_key(key)
    }

    pub fn user_relationship_summary(&self, entity_id: i64) -> Result<UserRelationshipSummary> {
        self.repository.user_relationship_summary(entity_id)
    }

    // Writes commit first, then broadcast once.

    pub async fn insert_entity(&self, new_entity: NewEntity) -> Result<Entity> {
        let entity = self.repository.insert_entity(new_entity).await?;
        self.notify_change_listeners();
        Ok(entity)
    }

    pub async fn update_entity(&self, entity: Entity) -> Result<Entity> {
        let entity = self.repository.update_entity(entity).await?;
        self.notify_change_listeners();
        Ok(entity)
    }

    pub async fn delete_entity(&self, entity_id: i64) -> Result<usize> {
        let affected = self.repository.delete_entity(entity_id).await?;
        self.notify_change_listeners();
        Ok(affected)
    }

    pub async fn create_device(
        &self,
        new_entity: NewEntity,
        attributes: Vec<PredefinedAttribute>,
        states: Vec<DeviceStateSpec>,
    ) -> Result<Entity> {
        let entity = self
            .repository
            .create_device(new_entity, attributes, states)
            .await?;
        self.notify_change_listeners();
        Ok(entity)
    }

    pub async fn add_device_states(
        &self,
        entity_id: i64,
        states: Vec<DeviceStateSpec>,
    ) -> Result<()> {
        self.repository.add_device_states(entity_id, states).await?;
        self.notify_change_listeners();
        Ok(())
    }

    pub async fn insert_state(&self, new_state: NewEntityState) -> Result<EntityState> {
        let state = self.repository.insert_state(new_state).await?;
        self.notify_change_listeners();
        Ok(state)
    }

    pub async fn delete_state(&self, state_id: i64) -> Result<usize> {
        let affected = self.repository.delete_state(state_id).await?;
        self.notify_change_listeners();
        Ok(affected)
    }

    pub async fn upsert_attribute(
        &self,
        entity_id: i64,
        name: &str,
        value: &str,
        attribute_type: AttributeType,
        is_editable: bool,
    ) -> Result<EntityAttribute> {
        let attribute = self
            .repository
            .upsert_attribute(entity_id, name, value, attribute_type, is_editable)
            .await?;
        self.notify_change_listeners();
        Ok(attribute)
    }

    pub async fn delete_attribute(&self, attribute_id: i64) -> Result<usize> {
        let affected = self.repository.delete_attribute(attribute_id).await?;
        self.notify_change_listeners();
        Ok(affected)
    }

    pub async fn delete_sensor(&self, sensor_id: i64) -> Result<usize> {
        let affected = self.repository.delete_sensor(sensor_id).await?;
        self.notify_change_listeners();
        Ok(affected)
    }

    pub async fn delete_controller(&self, controller_id: i64) -> Result<usize> {
        let affected = self.repository.delete_controller(controller_id).await?;
        self.notify_change_listeners();
        Ok(affected)
    }

    pub async fn insert_entity_view(
        &self,
        entity_id: i64,
        location_view_id: i64,
    ) -> Result<EntityView> {
        let view = self
            .repository
            .insert_entity_view(entity_id, location_view_id)
            .await?;
        self.notify_change_listeners();
        Ok(view)
    }

    pub async fn delete_entity_view(&self, entity_view_id: i64) -> Result<usize> {
        let affected = self.repository.delete_entity_view(entity_view_id).await?;
        self.notify_change_listeners();
        Ok(affected)
    }

    /// Remove a discovered entity unless the user has enriched it.
    ///
    /// The asymmetric policy that distinguishes discovered data from
    /// enriched data: geometry, view memberships, collection memberships or
    /// delegation edges on either side all preserve the entity.
    pub async fn delete_entity_if_unenriched(&self, entity: &Entity) -> Result<bool> {
        let summary = self.repository.user_relationship_summary(entity.id)?;
        if summary.has_any() {
            warn!(
                "Preserving entity {entity}: user relationships exist ({summary:?})"
            );
            return Ok(false);
        }
        self.delete_entity(entity.id).await?;
        Ok(true)
    }
}
