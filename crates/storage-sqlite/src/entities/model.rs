//! Database row structs for the entity aggregate with conversions to the
//! domain types.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use hearth_core::entities::{
    AttributeType, Controller, Entity, EntityAttribute, EntityPath, EntityPosition, EntityState,
    EntityStateDelegation, EntityStateType, EntityType, EntityView, EventDefinition, EventKind,
    Sensor,
};
use hearth_core::integrations::IntegrationKey;

fn integration_key_from_columns(
    integration_id: Option<String>,
    integration_name: Option<String>,
) -> Option<IntegrationKey> {
    match (integration_id, integration_name) {
        (Some(id), Some(name)) => Some(IntegrationKey::new(id, name)),
        _ => None,
    }
}

#[derive(Queryable, Identifiable, Selectable, AsChangeset, Debug, Clone)]
#[diesel(table_name = crate::schema::entities)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EntityDB {
    pub id: i64,
    pub name: String,
    pub entity_type: String,
    pub can_user_delete: bool,
    pub has_video_stream: bool,
    pub integration_id: Option<String>,
    pub integration_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<EntityDB> for Entity {
    fn from(row: EntityDB) -> Self {
        Entity {
            id: row.id,
            name: row.name,
            entity_type: EntityType::from_str_safe(&row.entity_type),
            can_user_delete: row.can_user_delete,
            has_video_stream: row.has_video_stream,
            integration_key: integration_key_from_columns(
                row.integration_id,
                row.integration_name,
            ),
            created_at: row.created_at,
        }
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::entities)]
pub struct NewEntityDB {
    pub name: String,
    pub entity_type: String,
    pub can_user_delete: bool,
    pub has_video_stream: bool,
    pub integration_id: Option<String>,
    pub integration_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<hearth_core::entities::NewEntity> for NewEntityDB {
    fn from(new_entity: hearth_core::entities::NewEntity) -> Self {
        let (integration_id, integration_name) = match new_entity.integration_key {
            Some(key) => (Some(key.integration_id), Some(key.integration_name)),
            None => (None, None),
        };
        NewEntityDB {
            name: new_entity.name,
            entity_type: new_entity.entity_type.as_str().to_string(),
            can_user_delete: new_entity.can_user_delete,
            has_video_stream: new_entity.has_video_stream,
            integration_id,
            integration_name,
            created_at: Utc::now(),
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::entity_states)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EntityStateDB {
    pub id: i64,
    pub entity_id: i64,
    pub state_type: String,
    pub name: String,
    pub value_range: Option<String>,
    pub units: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<EntityStateDB> for EntityState {
    fn from(row: EntityStateDB) -> Self {
        EntityState {
            id: row.id,
            entity_id: row.entity_id,
            state_type: EntityStateType::from_str_safe(&row.state_type),
            name: row.name,
            value_range: row.value_range,
            units: row.units,
            created_at: row.created_at,
        }
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::entity_states)]
pub struct NewEntityStateDB {
    pub entity_id: i64,
    pub state_type: String,
    pub name: String,
    pub value_range: Option<String>,
    pub units: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::entity_attributes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EntityAttributeDB {
    pub id: i64,
    pub entity_id: i64,
    pub name: String,
    pub value: String,
    pub attribute_type: String,
    pub is_editable: bool,
}

impl From<EntityAttributeDB> for EntityAttribute {
    fn from(row: EntityAttributeDB) -> Self {
        EntityAttribute {
            id: row.id,
            entity_id: row.entity_id,
            name: row.name,
            value: row.value,
            attribute_type: AttributeType::from_str_safe(&row.attribute_type),
            is_editable: row.is_editable,
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::entity_state_delegations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EntityStateDelegationDB {
    pub id: i64,
    pub entity_state_id: i64,
    pub delegate_entity_id: i64,
}

impl From<EntityStateDelegationDB> for EntityStateDelegation {
    fn from(row: EntityStateDelegationDB) -> Self {
        EntityStateDelegation {
            id: row.id,
            entity_state_id: row.entity_state_id,
            delegate_entity_id: row.delegate_entity_id,
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::entity_positions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EntityPositionDB {
    pub id: i64,
    pub entity_id: i64,
    pub location_id: i64,
    pub svg_x: f64,
    pub svg_y: f64,
    pub svg_scale: f64,
    pub svg_rotate: f64,
}

impl From<EntityPositionDB> for EntityPosition {
    fn from(row: EntityPositionDB) -> Self {
        EntityPosition {
            id: row.id,
            entity_id: row.entity_id,
            location_id: row.location_id,
            svg_x: row.svg_x,
            svg_y: row.svg_y,
            svg_scale: row.svg_scale,
            svg_rotate: row.svg_rotate,
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::entity_paths)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EntityPathDB {
    pub id: i64,
    pub entity_id: i64,
    pub location_id: i64,
    pub svg_path: String,
}

impl From<EntityPathDB> for EntityPath {
    fn from(row: EntityPathDB) -> Self {
        EntityPath {
            id: row.id,
            entity_id: row.entity_id,
            location_id: row.location_id,
            svg_path: row.svg_path,
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::entity_views)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EntityViewDB {
    pub id: i64,
    pub entity_id: i64,
    pub location_view_id: i64,
}

impl From<EntityViewDB> for EntityView {
    fn from(row: EntityViewDB) -> Self {
        EntityView {
            id: row.id,
            entity_id: row.entity_id,
            location_view_id: row.location_view_id,
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::sensors)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SensorDB {
    pub id: i64,
    pub entity_state_id: i64,
    pub name: String,
    pub integration_id: String,
    pub integration_name: String,
}

impl From<SensorDB> for Sensor {
    fn from(row: SensorDB) -> Self {
        Sensor {
            id: row.id,
            entity_state_id: row.entity_state_id,
            name: row.name,
            integration_key: IntegrationKey::new(row.integration_id, row.integration_name),
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::controllers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ControllerDB {
    pub id: i64,
    pub entity_state_id: i64,
    pub name: String,
    pub integration_id: String,
    pub integration_name: String,
    pub payload: Option<String>,
}

impl From<ControllerDB> for Controller {
    fn from(row: ControllerDB) -> Self {
        Controller {
            id: row.id,
            entity_state_id: row.entity_state_id,
            name: row.name,
            integration_key: IntegrationKey::new(row.integration_id, row.integration_name),
            payload: row
                .payload
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::event_definitions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventDefinitionDB {
    pub id: i64,
    pub entity_state_id: i64,
    pub name: String,
    pub event_kind: String,
    pub integration_id: String,
    pub integration_name: String,
}

impl EventDefinitionDB {
    pub fn into_domain(self) -> Option<EventDefinition> {
        Some(EventDefinition {
            id: self.id,
            entity_state_id: self.entity_state_id,
            name: self.name,
            event_kind: EventKind::from_str_safe(&self.event_kind)?,
            integration_key: IntegrationKey::new(self.integration_id, self.integration_name),
        })
    }
}
