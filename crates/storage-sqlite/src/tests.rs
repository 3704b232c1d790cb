//! Repository tests against an in-memory database.

use std::sync::Arc;

use hearth_core::entities::{
    AttributeType, DelegationService, DeviceStateSpec, EntityRepositoryTrait, EntityService,
    EntityStateType, EntityType, NewEntity, PredefinedAttribute,
};
use hearth_core::errors::Error;
use hearth_core::integrations::{
    IntegrationKey, IntegrationRepositoryTrait, NewIntegrationAttribute,
};

use crate::db::{create_pool_with_size, run_migrations, DbPool, WriteHandle};
use crate::entities::EntityRepository;
use crate::integrations::IntegrationRepository;
use crate::locks::ExclusionLock;

fn test_pool() -> DbPool {
    // A single connection keeps the in-memory database alive and shared.
    let pool = create_pool_with_size(":memory:", 1).expect("pool");
    run_migrations(&pool).expect("migrations");
    pool
}

fn entity_repository(pool: &DbPool) -> Arc<EntityRepository> {
    Arc::new(EntityRepository::new(
        Arc::clone(pool),
        WriteHandle::new(Arc::clone(pool)),
    ))
}

fn discovered_entity(name: &str, key_name: &str) -> NewEntity {
    NewEntity {
        name: name.to_string(),
        entity_type: EntityType::Light,
        can_user_delete: false,
        has_video_stream: false,
        integration_key: Some(IntegrationKey::new("hass", key_name)),
    }
}

#[tokio::test]
async fn integration_key_uniqueness_is_enforced() {
    let pool = test_pool();
    let repo = entity_repository(&pool);

    repo.insert_entity(discovered_entity("Kitchen Light", "light.kitchen"))
        .await
        .unwrap();
    let err = repo
        .insert_entity(discovered_entity("Duplicate", "light.kitchen"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    // A different name under the same integration is fine.
    repo.insert_entity(discovered_entity("Porch Light", "light.porch"))
        .await
        .unwrap();
}

#[tokio::test]
async fn create_device_materializes_the_whole_graph() {
    let pool = test_pool();
    let repo = entity_repository(&pool);

    let key = IntegrationKey::new("hass", "switch.fan");
    let mut spec = DeviceStateSpec::sensor_only(EntityStateType::OnOff, "Fan", key.clone());
    spec.create_controller = true;
    spec.controller_payload = Some(serde_json::json!({"domain": "switch"}));

    let entity = repo
        .create_device(
            discovered_entity("Fan", "fan-device"),
            vec![PredefinedAttribute {
                name: "Insteon Address".into(),
                value: "aa.bb.cc".into(),
            }],
            vec![spec],
        )
        .await
        .unwrap();

    let states = repo.load_states(entity.id).unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].state_type, EntityStateType::OnOff);

    let sensors = repo.load_sensors_for_entity(entity.id).unwrap();
    assert_eq!(sensors.len(), 1);
    assert_eq!(sensors[0].integration_key, key);

    let controllers = repo.load_controllers_for_entity(entity.id).unwrap();
    assert_eq!(controllers.len(), 1);
    assert_eq!(
        controllers[0].payload.as_ref().unwrap()["domain"],
        serde_json::json!("switch")
    );

    let attributes = repo.load_attributes(entity.id).unwrap();
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes[0].attribute_type, AttributeType::Predefined);
    assert!(!attributes[0].is_editable);
}

#[tokio::test]
async fn attribute_value_changes_append_history() {
    let pool = test_pool();
    let repo = entity_repository(&pool);
    let entity = repo
        .insert_entity(discovered_entity("Sensor", "sensor.x"))
        .await
        .unwrap();

    repo.upsert_attribute(entity.id, "Firmware", "1.0", AttributeType::Predefined, false)
        .await
        .unwrap();
    repo.upsert_attribute(entity.id, "Firmware", "1.1", AttributeType::Predefined, false)
        .await
        .unwrap();
    // Unchanged value is a no-op.
    repo.upsert_attribute(entity.id, "Firmware", "1.1", AttributeType::Predefined, false)
        .await
        .unwrap();

    let attributes = repo.load_attributes(entity.id).unwrap();
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes[0].value, "1.1");

    use diesel::prelude::*;
    let mut conn = crate::db::get_connection(&pool).unwrap();
    let history_count: i64 = crate::schema::entity_attribute_history::table
        .count()
        .get_result(&mut conn)
        .unwrap();
    assert_eq!(history_count, 2);
}

#[tokio::test]
async fn cascade_delete_removes_owned_rows_and_edges() {
    let pool = test_pool();
    let repo = entity_repository(&pool);

    let key = IntegrationKey::new("hass", "binary_sensor.door");
    let entity = repo
        .create_device(
            discovered_entity("Door", "door-device"),
            vec![],
            vec![DeviceStateSpec::sensor_only(
                EntityStateType::OpenClose,
                "Door",
                key,
            )],
        )
        .await
        .unwrap();
    let state = &repo.load_states(entity.id).unwrap()[0];

    let delegate = repo
        .insert_entity(NewEntity::user_created("Front Door", EntityType::Door))
        .await
        .unwrap();
    repo.insert_delegation(state.id, delegate.id).await.unwrap();

    repo.delete_entity(entity.id).await.unwrap();

    assert!(repo.load_states(entity.id).unwrap().is_empty());
    assert!(repo
        .load_delegations_where_delegate(delegate.id)
        .unwrap()
        .is_empty());
    // The delegate itself survives; only the edge is dropped.
    assert!(repo.get_entity(delegate.id).is_ok());
}

#[tokio::test]
async fn relationship_summary_reflects_user_enrichment() {
    let pool = test_pool();
    let repo = entity_repository(&pool);
    let entity = repo
        .insert_entity(discovered_entity("Cam", "camera.front"))
        .await
        .unwrap();

    assert!(!repo.user_relationship_summary(entity.id).unwrap().has_any());

    repo.insert_position(entity.id, 1, 100.0, 200.0).await.unwrap();
    let summary = repo.user_relationship_summary(entity.id).unwrap();
    assert_eq!(summary.positions, 1);
    assert!(summary.has_any());
}

#[tokio::test]
async fn default_delegate_creation_is_idempotent() {
    let pool = test_pool();
    let repo = entity_repository(&pool);

    let camera_key = IntegrationKey::new("hass", "camera.yard");
    let motion_key = IntegrationKey::new("hass", "binary_sensor.yard_motion");
    let entity = repo
        .create_device(
            discovered_entity("Yard Camera", "yard-camera"),
            vec![],
            vec![
                DeviceStateSpec::sensor_only(
                    EntityStateType::VideoStream,
                    "Yard Video",
                    camera_key,
                ),
                DeviceStateSpec::sensor_only(EntityStateType::Movement, "Yard Motion", motion_key),
            ],
        )
        .await
        .unwrap();

    let delegation_service = DelegationService::new(repo.clone());
    let delegates = delegation_service
        .ensure_default_delegates(entity.id)
        .await
        .unwrap();
    // Both area-proxied states share a single Area delegate.
    assert_eq!(delegates.len(), 1);
    assert_eq!(delegates[0].entity_type, EntityType::Area);
    assert_eq!(delegates[0].name, "Yard Camera - Area");
    assert!(delegates[0].integration_key.is_none());

    let before = repo.load_delegations_for_entity_states(entity.id).unwrap();
    assert_eq!(before.len(), 2);

    // Second run produces no additional rows.
    delegation_service
        .ensure_default_delegates(entity.id)
        .await
        .unwrap();
    let after = repo.load_delegations_for_entity_states(entity.id).unwrap();
    assert_eq!(after.len(), before.len());
}

#[tokio::test]
async fn orphaned_delegates_leave_the_view_but_survive() {
    let pool = test_pool();
    let repo = entity_repository(&pool);

    let motion_key = IntegrationKey::new("hass", "binary_sensor.hall_motion");
    let entity = repo
        .create_device(
            discovered_entity("Hall Motion", "hall-motion"),
            vec![],
            vec![DeviceStateSpec::sensor_only(
                EntityStateType::Movement,
                "Hall Motion",
                motion_key,
            )],
        )
        .await
        .unwrap();

    let delegation_service = DelegationService::new(repo.clone());
    let delegates = delegation_service
        .ensure_default_delegates(entity.id)
        .await
        .unwrap();
    let delegate = &delegates[0];

    let view_id = 7;
    repo.insert_entity_view(delegate.id, view_id).await.unwrap();
    delegation_service
        .remove_delegates_from_view_if_orphaned(entity.id, view_id)
        .await
        .unwrap();

    assert!(repo.find_entity_view(delegate.id, view_id).unwrap().is_none());
    assert!(repo.get_entity(delegate.id).is_ok());
}

#[tokio::test]
async fn entity_service_broadcasts_once_per_mutation() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let pool = test_pool();
    let repo = entity_repository(&pool);
    let service = EntityService::new(repo);

    let broadcasts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&broadcasts);
    service.register_change_listener(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    // A multi-row device creation is still a single broadcast.
    let key = IntegrationKey::new("hass", "light.den");
    service
        .create_device(
            discovered_entity("Den Light", "den-light"),
            vec![],
            vec![DeviceStateSpec::sensor_only(
                EntityStateType::OnOff,
                "Den Light",
                key,
            )],
        )
        .await
        .unwrap();
    assert_eq!(broadcasts.load(Ordering::SeqCst), 1);

    // A failed write does not broadcast.
    let _ = service
        .insert_entity(discovered_entity("Dup", "den-light"))
        .await
        .unwrap_err();
    assert_eq!(broadcasts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn integration_attributes_round_trip() {
    let pool = test_pool();
    let repo = IntegrationRepository::new(Arc::clone(&pool), WriteHandle::new(Arc::clone(&pool)));

    assert!(repo.get_integration("hass").unwrap().is_none());
    let row = repo.set_enabled("hass", true).await.unwrap();
    assert!(row.is_enabled);

    repo.upsert_attributes(vec![NewIntegrationAttribute {
        integration_key: IntegrationKey::new("hass", "api_base_url"),
        value: "http://hass:8123".into(),
        value_type: hearth_core::integrations::AttributeValueType::Text,
        is_required: true,
        is_secret: true,
    }])
    .await
    .unwrap();

    // Re-upsert replaces the value, not the row.
    repo.upsert_attributes(vec![NewIntegrationAttribute {
        integration_key: IntegrationKey::new("hass", "api_base_url"),
        value: "http://hass:8124".into(),
        value_type: hearth_core::integrations::AttributeValueType::Text,
        is_required: true,
        is_secret: true,
    }])
    .await
    .unwrap();

    let attributes = repo.load_attributes("hass").unwrap();
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes[0].value, "http://hass:8124");
    assert!(attributes[0].is_secret);
}

#[tokio::test]
async fn exclusion_lock_rejects_concurrent_holders() {
    let pool = test_pool();

    let lock = ExclusionLock::try_acquire(Arc::clone(&pool), "hass_integration_sync").unwrap();
    let contended = ExclusionLock::try_acquire(Arc::clone(&pool), "hass_integration_sync");
    assert!(matches!(contended, Err(Error::Runtime(_))));

    drop(lock);
    ExclusionLock::try_acquire(Arc::clone(&pool), "hass_integration_sync").unwrap();
}

#[tokio::test]
async fn sensors_are_addressable_by_integration_key() {
    let pool = test_pool();
    let repo = entity_repository(&pool);

    let key_a = IntegrationKey::new("hass", "sensor.temp_a");
    let key_b = IntegrationKey::new("hass", "sensor.temp_b");
    for (device, key) in [("a-device", &key_a), ("b-device", &key_b)] {
        repo.create_device(
            discovered_entity(device, device),
            vec![],
            vec![DeviceStateSpec::sensor_only(
                EntityStateType::Temperature,
                "Temp",
                key.clone(),
            )],
        )
        .await
        .unwrap();
    }

    assert_eq!(repo.list_sensors().unwrap().len(), 2);
    let filtered = repo.find_sensors_by_keys(&[key_a.clone()]).unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].integration_key, key_a);
}
