//! Repository contract for the entity aggregate: entities, states,
//! attributes, geometry, view memberships, sensors and controllers.

use async_trait::async_trait;

use crate::errors::Result;
use crate::integrations::IntegrationKey;

use super::model::{
    Controller, Entity, EntityAttribute, EntityState, EntityStateDelegation, EntityView,
    EventKind, NewEntity, NewEntityState, Sensor, UserRelationshipSummary,
};

/// Specification for one state of a discovered device, including the
/// sensor/controller/event rows hanging off it. Used by the sync engine to
/// materialize a whole device graph in one transaction.
#[derive(Debug, Clone)]
pub struct DeviceStateSpec {
    pub state_type: super::model::EntityStateType,
    pub name: String,
    pub value_range: Option<String>,
    pub units: Option<String>,
    pub integration_key: IntegrationKey,
    pub create_sensor: bool,
    pub create_controller: bool,
    pub controller_payload: Option<serde_json::Value>,
    pub event_kind: Option<EventKind>,
}

impl DeviceStateSpec {
    pub fn sensor_only(
        state_type: super::model::EntityStateType,
        name: impl Into<String>,
        integration_key: IntegrationKey,
    ) -> Self {
        Self {
            state_type,
            name: name.into(),
            value_range: None,
            units: None,
            integration_key,
            create_sensor: true,
            create_controller: false,
            controller_payload: None,
            event_kind: None,
        }
    }
}

/// Predefined (non-editable) attribute added during device discovery.
#[derive(Debug, Clone)]
pub struct PredefinedAttribute {
    pub name: String,
    pub value: String,
}

#[async_trait]
pub trait EntityRepositoryTrait: Send + Sync {
    // Entities

    fn get_entity(&self, entity_id: i64) -> Result<Entity>;

    fn list_entities_for_integration(&self, integration_id: &str) -> Result<Vec<Entity>>;

    fn find_entity_by_integration_key(&self, key: &IntegrationKey) -> Result<Option<Entity>>;

    async fn insert_entity(&self, new_entity: NewEntity) -> Result<Entity>;

    async fn update_entity(&self, entity: Entity) -> Result<Entity>;

    /// Cascade-delete the entity with everything it owns: attributes,
    /// states, sensors, controllers, geometry, view memberships and the
    /// delegation edges touching it on either side.
    async fn delete_entity(&self, entity_id: i64) -> Result<usize>;

    /// Materialize a discovered device: entity + predefined attributes +
    /// one state per spec with its sensor/controller/event rows, all in a
    /// single transaction.
    async fn create_device(
        &self,
        new_entity: NewEntity,
        attributes: Vec<PredefinedAttribute>,
        states: Vec<DeviceStateSpec>,
    ) -> Result<Entity>;

    /// Add further states (with their sensor/controller/event rows) to an
    /// existing entity in one transaction.
    async fn add_device_states(&self, entity_id: i64, states: Vec<DeviceStateSpec>) -> Result<()>;

    /// Counts of user-added relationships, feeding intelligent deletion.
    fn user_relationship_summary(&self, entity_id: i64) -> Result<UserRelationshipSummary>;

    // States

    fn get_state(&self, state_id: i64) -> Result<EntityState>;

    fn load_states(&self, entity_id: i64) -> Result<Vec<EntityState>>;

    async fn insert_state(&self, new_state: NewEntityState) -> Result<EntityState>;

    async fn delete_state(&self, state_id: i64) -> Result<usize>;

    // Attributes

    fn load_attributes(&self, entity_id: i64) -> Result<Vec<EntityAttribute>>;

    /// Insert or update by (entity, name); each value change appends an
    /// attribute-history row rather than rewriting the old one.
    async fn upsert_attribute(
        &self,
        entity_id: i64,
        name: &str,
        value: &str,
        attribute_type: super::model::AttributeType,
        is_editable: bool,
    ) -> Result<EntityAttribute>;

    async fn delete_attribute(&self, attribute_id: i64) -> Result<usize>;

    // Sensors and controllers

    fn load_sensors_for_entity(&self, entity_id: i64) -> Result<Vec<Sensor>>;

    fn load_controllers_for_entity(&self, entity_id: i64) -> Result<Vec<Controller>>;

    fn list_sensors(&self) -> Result<Vec<Sensor>>;

    fn find_sensors_by_keys(&self, keys: &[IntegrationKey]) -> Result<Vec<Sensor>>;

    fn find_controller_by_key(&self, key: &IntegrationKey) -> Result<Option<Controller>>;

    async fn delete_sensor(&self, sensor_id: i64) -> Result<usize>;

    async fn delete_controller(&self, controller_id: i64) -> Result<usize>;

    // Delegations

    fn load_delegations_for_entity_states(&self, entity_id: i64)
        -> Result<Vec<EntityStateDelegation>>;

    fn load_delegations_where_delegate(&self, entity_id: i64)
        -> Result<Vec<EntityStateDelegation>>;

    async fn insert_delegation(
        &self,
        entity_state_id: i64,
        delegate_entity_id: i64,
    ) -> Result<EntityStateDelegation>;

    /// Create a delegate entity and wire the given states to it in a
    /// single transaction.
    async fn create_delegate_with_delegations(
        &self,
        new_entity: NewEntity,
        entity_state_ids: Vec<i64>,
    ) -> Result<Entity>;

    // View memberships

    fn find_entity_view(&self, entity_id: i64, location_view_id: i64) -> Result<Option<EntityView>>;

    async fn insert_entity_view(&self, entity_id: i64, location_view_id: i64) -> Result<EntityView>;

    async fn delete_entity_view(&self, entity_view_id: i64) -> Result<usize>;
}
