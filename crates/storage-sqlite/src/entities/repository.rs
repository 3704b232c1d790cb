//! Diesel implementation of the entity repository.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use hearth_core::entities::{
    AttributeType, Controller, Entity, EntityAttribute, EntityRepositoryTrait, EntityState,
    EntityStateDelegation, EntityView, NewEntity, NewEntityState, Sensor,
    UserRelationshipSummary,
};
use hearth_core::entities::{DeviceStateSpec, PredefinedAttribute};
use hearth_core::errors::Result;
use hearth_core::integrations::IntegrationKey;

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::map_diesel_error;
use crate::schema::{
    collection_entities, controllers, entities, entity_attribute_history, entity_attributes,
    entity_paths, entity_positions, entity_state_delegations, entity_states, entity_views,
    event_definitions, sensors,
};

use super::model::{
    ControllerDB, EntityAttributeDB, EntityDB, EntityStateDB, EntityStateDelegationDB,
    EntityViewDB, NewEntityDB, NewEntityStateDB, SensorDB,
};

pub struct EntityRepository {
    pool: DbPool,
    writer: WriteHandle,
}

impl EntityRepository {
    pub fn new(pool: DbPool, writer: WriteHandle) -> Self {
        EntityRepository { pool, writer }
    }
}

fn insert_entity_row(conn: &mut SqliteConnection, row: NewEntityDB) -> Result<EntityDB> {
    diesel::insert_into(entities::table)
        .values(&row)
        .returning(EntityDB::as_returning())
        .get_result(conn)
        .map_err(map_diesel_error)
}

fn insert_state_row(conn: &mut SqliteConnection, row: NewEntityStateDB) -> Result<EntityStateDB> {
    diesel::insert_into(entity_states::table)
        .values(&row)
        .returning(EntityStateDB::as_returning())
        .get_result(conn)
        .map_err(map_diesel_error)
}

fn insert_sensor_row(
    conn: &mut SqliteConnection,
    state_id: i64,
    sensor_name: &str,
    key: &IntegrationKey,
) -> Result<()> {
    diesel::insert_into(sensors::table)
        .values((
            sensors::entity_state_id.eq(state_id),
            sensors::name.eq(sensor_name),
            sensors::integration_id.eq(&key.integration_id),
            sensors::integration_name.eq(&key.integration_name),
        ))
        .execute(conn)
        .map_err(map_diesel_error)?;
    Ok(())
}

fn insert_controller_row(
    conn: &mut SqliteConnection,
    state_id: i64,
    controller_name: &str,
    key: &IntegrationKey,
    payload: Option<&serde_json::Value>,
) -> Result<()> {
    let payload_text = payload.map(|p| p.to_string());
    diesel::insert_into(controllers::table)
        .values((
            controllers::entity_state_id.eq(state_id),
            controllers::name.eq(controller_name),
            controllers::integration_id.eq(&key.integration_id),
            controllers::integration_name.eq(&key.integration_name),
            controllers::payload.eq(payload_text),
        ))
        .execute(conn)
        .map_err(map_diesel_error)?;
    Ok(())
}

fn insert_event_row(
    conn: &mut SqliteConnection,
    state_id: i64,
    event_name: &str,
    event_kind: hearth_core::entities::EventKind,
    key: &IntegrationKey,
) -> Result<()> {
    diesel::insert_into(event_definitions::table)
        .values((
            event_definitions::entity_state_id.eq(state_id),
            event_definitions::name.eq(event_name),
            event_definitions::event_kind.eq(event_kind.as_str()),
            event_definitions::integration_id.eq(&key.integration_id),
            event_definitions::integration_name.eq(&key.integration_name),
        ))
        .execute(conn)
        .map_err(map_diesel_error)?;
    Ok(())
}

/// Create the state row plus whatever the spec hangs off it.
fn apply_state_spec(conn: &mut SqliteConnection, entity_id: i64, spec: &DeviceStateSpec) -> Result<()> {
    let state = insert_state_row(
        conn,
        NewEntityStateDB {
            entity_id,
            state_type: spec.state_type.as_str().to_string(),
            name: spec.name.clone(),
            value_range: spec.value_range.clone(),
            units: spec.units.clone(),
            created_at: Utc::now(),
        },
    )?;

    if spec.create_sensor {
        insert_sensor_row(conn, state.id, &spec.name, &spec.integration_key)?;
    }
    if spec.create_controller {
        insert_controller_row(
            conn,
            state.id,
            &spec.name,
            &spec.integration_key,
            spec.controller_payload.as_ref(),
        )?;
    }
    if let Some(kind) = spec.event_kind {
        let event_name = format!("{} Alarm", spec.name);
        insert_event_row(conn, state.id, &event_name, kind, &spec.integration_key)?;
    }
    Ok(())
}

fn upsert_attribute_row(
    conn: &mut SqliteConnection,
    target_entity_id: i64,
    attr_name: &str,
    attr_value: &str,
    attr_type: AttributeType,
    editable: bool,
) -> Result<EntityAttributeDB> {
    let existing: Option<EntityAttributeDB> = entity_attributes::table
        .filter(entity_attributes::entity_id.eq(target_entity_id))
        .filter(entity_attributes::name.eq(attr_name))
        .first(conn)
        .optional()
        .map_err(map_diesel_error)?;

    let row = match existing {
        Some(row) if row.value == attr_value => row,
        Some(row) => {
            diesel::update(entity_attributes::table.find(row.id))
                .set(entity_attributes::value.eq(attr_value))
                .execute(conn)
                .map_err(map_diesel_error)?;
            // Value changes append a history row; the old one is immutable.
            diesel::insert_into(entity_attribute_history::table)
                .values((
                    entity_attribute_history::attribute_id.eq(row.id),
                    entity_attribute_history::value.eq(attr_value),
                    entity_attribute_history::changed_at.eq(Utc::now()),
                ))
                .execute(conn)
                .map_err(map_diesel_error)?;
            entity_attributes::table
                .find(row.id)
                .first(conn)
                .map_err(map_diesel_error)?
        }
        None => {
            let row: EntityAttributeDB = diesel::insert_into(entity_attributes::table)
                .values((
                    entity_attributes::entity_id.eq(target_entity_id),
                    entity_attributes::name.eq(attr_name),
                    entity_attributes::value.eq(attr_value),
                    entity_attributes::attribute_type.eq(attr_type.as_str()),
                    entity_attributes::is_editable.eq(editable),
                ))
                .returning(EntityAttributeDB::as_returning())
                .get_result(conn)
                .map_err(map_diesel_error)?;
            diesel::insert_into(entity_attribute_history::table)
                .values((
                    entity_attribute_history::attribute_id.eq(row.id),
                    entity_attribute_history::value.eq(attr_value),
                    entity_attribute_history::changed_at.eq(Utc::now()),
                ))
                .execute(conn)
                .map_err(map_diesel_error)?;
            row
        }
    };
    Ok(row)
}

#[async_trait]
impl EntityRepositoryTrait for EntityRepository {
    fn get_entity(&self, entity_id: i64) -> Result<Entity> {
        let mut conn = get_connection(&self.pool)?;
        entities::table
            .find(entity_id)
            .first::<EntityDB>(&mut conn)
            .map(Entity::from)
            .map_err(map_diesel_error)
    }

    fn list_entities_for_integration(&self, integration_id: &str) -> Result<Vec<Entity>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = entities::table
            .filter(entities::integration_id.eq(integration_id))
            .order(entities::id.asc())
            .load::<EntityDB>(&mut conn)
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(Entity::from).collect())
    }

    fn find_entity_by_integration_key(&self, key: &IntegrationKey) -> Result<Option<Entity>> {
        let mut conn = get_connection(&self.pool)?;
        entities::table
            .filter(entities::integration_id.eq(&key.integration_id))
            .filter(entities::integration_name.eq(&key.integration_name))
            .first::<EntityDB>(&mut conn)
            .optional()
            .map(|row| row.map(Entity::from))
            .map_err(map_diesel_error)
    }

    async fn insert_entity(&self, new_entity: NewEntity) -> Result<Entity> {
        self.writer
            .exec(move |conn| insert_entity_row(conn, new_entity.into()).map(Entity::from))
            .await
    }

    async fn update_entity(&self, entity: Entity) -> Result<Entity> {
        self.writer
            .exec(move |conn| {
                let (integration_id, integration_name) = match &entity.integration_key {
                    Some(key) => (
                        Some(key.integration_id.clone()),
                        Some(key.integration_name.clone()),
                    ),
                    None => (None, None),
                };
                diesel::update(entities::table.find(entity.id))
                    .set((
                        entities::name.eq(&entity.name),
                        entities::entity_type.eq(entity.entity_type.as_str()),
                        entities::can_user_delete.eq(entity.can_user_delete),
                        entities::has_video_stream.eq(entity.has_video_stream),
                        entities::integration_id.eq(integration_id),
                        entities::integration_name.eq(integration_name),
                    ))
                    .execute(conn)
                    .map_err(map_diesel_error)?;
                entities::table
                    .find(entity.id)
                    .first::<EntityDB>(conn)
                    .map(Entity::from)
                    .map_err(map_diesel_error)
            })
            .await
    }

    async fn delete_entity(&self, entity_id: i64) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                // Owned rows and delegation edges go with it via cascades.
                diesel::delete(entities::table.find(entity_id))
                    .execute(conn)
                    .map_err(map_diesel_error)
            })
            .await
    }

    async fn create_device(
        &self,
        new_entity: NewEntity,
        attributes: Vec<PredefinedAttribute>,
        states: Vec<DeviceStateSpec>,
    ) -> Result<Entity> {
        self.writer
            .exec(move |conn| {
                let entity_row = insert_entity_row(conn, new_entity.into())?;
                for attribute in &attributes {
                    upsert_attribute_row(
                        conn,
                        entity_row.id,
                        &attribute.name,
                        &attribute.value,
                        AttributeType::Predefined,
                        false,
                    )?;
                }
                for spec in &states {
                    apply_state_spec(conn, entity_row.id, spec)?;
                }
                Ok(Entity::from(entity_row))
            })
            .await
    }

    async fn add_device_states(&self, entity_id: i64, states: Vec<DeviceStateSpec>) -> Result<()> {
        self.writer
            .exec(move |conn| {
                for spec in &states {
                    apply_state_spec(conn, entity_id, spec)?;
                }
                Ok(())
            })
            .await
    }

    fn user_relationship_summary(&self, entity_id: i64) -> Result<UserRelationshipSummary> {
        let mut conn = get_connection(&self.pool)?;

        let positions: i64 = entity_positions::table
            .filter(entity_positions::entity_id.eq(entity_id))
            .count()
            .get_result(&mut conn)
            .map_err(map_diesel_error)?;
        let paths: i64 = entity_paths::table
            .filter(entity_paths::entity_id.eq(entity_id))
            .count()
            .get_result(&mut conn)
            .map_err(map_diesel_error)?;
        let views: i64 = entity_views::table
            .filter(entity_views::entity_id.eq(entity_id))
            .count()
            .get_result(&mut conn)
            .map_err(map_diesel_error)?;
        let collections: i64 = collection_entities::table
            .filter(collection_entities::entity_id.eq(entity_id))
            .count()
            .get_result(&mut conn)
            .map_err(map_diesel_error)?;
        let as_delegate: i64 = entity_state_delegations::table
            .filter(entity_state_delegations::delegate_entity_id.eq(entity_id))
            .count()
            .get_result(&mut conn)
            .map_err(map_diesel_error)?;
        let as_principal: i64 = entity_state_delegations::table
            .inner_join(entity_states::table)
            .filter(entity_states::entity_id.eq(entity_id))
            .count()
            .get_result(&mut conn)
            .map_err(map_diesel_error)?;

        Ok(UserRelationshipSummary {
            positions: positions as usize,
            paths: paths as usize,
            views: views as usize,
            collections: collections as usize,
            delegations_as_principal: as_principal as usize,
            delegations_as_delegate: as_delegate as usize,
        })
    }

    fn get_state(&self, state_id: i64) -> Result<EntityState> {
        let mut conn = get_connection(&self.pool)?;
        entity_states::table
            .find(state_id)
            .first::<EntityStateDB>(&mut conn)
            .map(EntityState::from)
            .map_err(map_diesel_error)
    }

    fn load_states(&self, entity_id: i64) -> Result<Vec<EntityState>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = entity_states::table
            .filter(entity_states::entity_id.eq(entity_id))
            .order(entity_states::id.asc())
            .load::<EntityStateDB>(&mut conn)
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(EntityState::from).collect())
    }

    async fn insert_state(&self, new_state: NewEntityState) -> Result<EntityState> {
        self.writer
            .exec(move |conn| {
                insert_state_row(
                    conn,
                    NewEntityStateDB {
                        entity_id: new_state.entity_id,
                        state_type: new_state.state_type.as_str().to_string(),
                        name: new_state.name,
                        value_range: new_state.value_range,
                        units: new_state.units,
                        created_at: Utc::now(),
                    },
                )
                .map(EntityState::from)
            })
            .await
    }

    async fn delete_state(&self, state_id: i64) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                diesel::delete(entity_states::table.find(state_id))
                    .execute(conn)
                    .map_err(map_diesel_error)
            })
            .await
    }

    fn load_attributes(&self, entity_id: i64) -> Result<Vec<EntityAttribute>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = entity_attributes::table
            .filter(entity_attributes::entity_id.eq(entity_id))
            .order(entity_attributes::name.asc())
            .load::<EntityAttributeDB>(&mut conn)
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(EntityAttribute::from).collect())
    }

    async fn upsert_attribute(
        &self,
        entity_id: i64,
        name: &str,
        value: &str,
        attribute_type: AttributeType,
        is_editable: bool,
    ) -> Result<EntityAttribute> {
        let name = name.to_string();
        let value = value.to_string();
        self.writer
            .exec(move |conn| {
                upsert_attribute_row(conn, entity_id, &name, &value, attribute_type, is_editable)
                    .map(EntityAttribute::from)
            })
            .await
    }

    async fn delete_attribute(&self, attribute_id: i64) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                diesel::delete(entity_attributes::table.find(attribute_id))
                    .execute(conn)
                    .map_err(map_diesel_error)
            })
            .await
    }

    fn load_sensors_for_entity(&self, entity_id: i64) -> Result<Vec<Sensor>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = sensors::table
            .inner_join(entity_states::table)
            .filter(entity_states::entity_id.eq(entity_id))
            .select(SensorDB::as_select())
            .load::<SensorDB>(&mut conn)
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(Sensor::from).collect())
    }

    fn load_controllers_for_entity(&self, entity_id: i64) -> Result<Vec<Controller>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = controllers::table
            .inner_join(entity_states::table)
            .filter(entity_states::entity_id.eq(entity_id))
            .select(ControllerDB::as_select())
            .load::<ControllerDB>(&mut conn)
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(Controller::from).collect())
    }

    fn list_sensors(&self) -> Result<Vec<Sensor>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = sensors::table
            .order(sensors::id.asc())
            .load::<SensorDB>(&mut conn)
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(Sensor::from).collect())
    }

    fn find_sensors_by_keys(&self, keys: &[IntegrationKey]) -> Result<Vec<Sensor>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = get_connection(&self.pool)?;
        let mut query = sensors::table.into_boxed();
        for key in keys {
            query = query.or_filter(
                sensors::integration_id
                    .eq(key.integration_id.clone())
                    .and(sensors::integration_name.eq(key.integration_name.clone())),
            );
        }
        let rows = query
            .load::<SensorDB>(&mut conn)
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(Sensor::from).collect())
    }

    fn find_controller_by_key(&self, key: &IntegrationKey) -> Result<Option<Controller>> {
        let mut conn = get_connection(&self.pool)?;
        controllers::table
            .filter(controllers::integration_id.eq(&key.integration_id))
            .filter(controllers::integration_name.eq(&key.integration_name))
            .first::<ControllerDB>(&mut conn)
            .optional()
            .map(|row| row.map(Controller::from))
            .map_err(map_diesel_error)
    }

    async fn delete_sensor(&self, sensor_id: i64) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                diesel::delete(sensors::table.find(sensor_id))
                    .execute(conn)
                    .map_err(map_diesel_error)
            })
            .await
    }

    async fn delete_controller(&self, controller_id: i64) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                diesel::delete(controllers::table.find(controller_id))
                    .execute(conn)
                    .map_err(map_diesel_error)
            })
            .await
    }

    fn load_delegations_for_entity_states(
        &self,
        entity_id: i64,
    ) -> Result<Vec<EntityStateDelegation>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = entity_state_delegations::table
            .inner_join(entity_states::table)
            .filter(entity_states::entity_id.eq(entity_id))
            .select(EntityStateDelegationDB::as_select())
            .load::<EntityStateDelegationDB>(&mut conn)
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(EntityStateDelegation::from).collect())
    }

    fn load_delegations_where_delegate(
        &self,
        entity_id: i64,
    ) -> Result<Vec<EntityStateDelegation>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = entity_state_delegations::table
            .filter(entity_state_delegations::delegate_entity_id.eq(entity_id))
            .load::<EntityStateDelegationDB>(&mut conn)
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(EntityStateDelegation::from).collect())
    }

    async fn insert_delegation(
        &self,
        entity_state_id: i64,
        delegate_entity_id: i64,
    ) -> Result<EntityStateDelegation> {
        self.writer
            .exec(move |conn| {
                diesel::insert_into(entity_state_delegations::table)
                    .values((
                        entity_state_delegations::entity_state_id.eq(entity_state_id),
                        entity_state_delegations::delegate_entity_id.eq(delegate_entity_id),
                    ))
                    .returning(EntityStateDelegationDB::as_returning())
                    .get_result(conn)
                    .map(EntityStateDelegation::from)
                    .map_err(map_diesel_error)
            })
            .await
    }

    async fn create_delegate_with_delegations(
        &self,
        new_entity: NewEntity,
        entity_state_ids: Vec<i64>,
    ) -> Result<Entity> {
        self.writer
            .exec(move |conn| {
                let entity_row = insert_entity_row(conn, new_entity.into())?;
                for state_id in entity_state_ids {
                    diesel::insert_into(entity_state_delegations::table)
                        .values((
                            entity_state_delegations::entity_state_id.eq(state_id),
                            entity_state_delegations::delegate_entity_id.eq(entity_row.id),
                        ))
                        .execute(conn)
                        .map_err(map_diesel_error)?;
                }
                Ok(Entity::from(entity_row))
            })
            .await
    }

    fn find_entity_view(
        &self,
        entity_id: i64,
        location_view_id: i64,
    ) -> Result<Option<EntityView>> {
        let mut conn = get_connection(&self.pool)?;
        entity_views::table
            .filter(entity_views::entity_id.eq(entity_id))
            .filter(entity_views::location_view_id.eq(location_view_id))
            .first::<EntityViewDB>(&mut conn)
            .optional()
            .map(|row| row.map(EntityView::from))
            .map_err(map_diesel_error)
    }

    async fn insert_entity_view(
        &self,
        entity_id: i64,
        location_view_id: i64,
    ) -> Result<EntityView> {
        self.writer
            .exec(move |conn| {
                diesel::insert_into(entity_views::table)
                    .values((
                        entity_views::entity_id.eq(entity_id),
                        entity_views::location_view_id.eq(location_view_id),
                    ))
                    .returning(EntityViewDB::as_returning())
                    .get_result(conn)
                    .map(EntityView::from)
                    .map_err(map_diesel_error)
            })
            .await
    }

    async fn delete_entity_view(&self, entity_view_id: i64) -> Result<usize> {
        self.writer
            .exec(move |conn| {
                diesel::delete(entity_views::table.find(entity_view_id))
                    .execute(conn)
                    .map_err(map_diesel_error)
            })
            .await
    }
}

impl EntityRepository {
    /// Place an entity on a floorplan. Exposed for the presentation layer's
    /// edit flows and for the intelligent-deletion tests.
    pub async fn insert_position(
        &self,
        entity_id: i64,
        location_id: i64,
        svg_x: f64,
        svg_y: f64,
    ) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::insert_into(entity_positions::table)
                    .values((
                        entity_positions::entity_id.eq(entity_id),
                        entity_positions::location_id.eq(location_id),
                        entity_positions::svg_x.eq(svg_x),
                        entity_positions::svg_y.eq(svg_y),
                        entity_positions::svg_scale.eq(1.0),
                        entity_positions::svg_rotate.eq(0.0),
                    ))
                    .execute(conn)
                    .map_err(map_diesel_error)?;
                Ok(())
            })
            .await
    }

    pub async fn insert_collection_membership(
        &self,
        entity_id: i64,
        collection_id: i64,
    ) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::insert_into(collection_entities::table)
                    .values((
                        collection_entities::entity_id.eq(entity_id),
                        collection_entities::collection_id.eq(collection_id),
                    ))
                    .execute(conn)
                    .map_err(map_diesel_error)?;
                Ok(())
            })
            .await
    }
}
