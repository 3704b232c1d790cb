//! Diesel table definitions for the hub's relational layout.

diesel::table! {
    entities (id) {
        id -> BigInt,
        name -> Text,
        entity_type -> Text,
        can_user_delete -> Bool,
        has_video_stream -> Bool,
        integration_id -> Nullable<Text>,
        integration_name -> Nullable<Text>,
        created_at -> TimestamptzSqlite,
    }
}

diesel::table! {
    entity_states (id) {
        id -> BigInt,
        entity_id -> BigInt,
        state_type -> Text,
        name -> Text,
        value_range -> Nullable<Text>,
        units -> Nullable<Text>,
        created_at -> TimestamptzSqlite,
    }
}

diesel::table! {
    entity_attributes (id) {
        id -> BigInt,
        entity_id -> BigInt,
        name -> Text,
        value -> Text,
        attribute_type -> Text,
        is_editable -> Bool,
    }
}

diesel::table! {
    entity_attribute_history (id) {
        id -> BigInt,
        attribute_id -> BigInt,
        value -> Text,
        changed_at -> TimestamptzSqlite,
    }
}

diesel::table! {
    entity_state_delegations (id) {
        id -> BigInt,
        entity_state_id -> BigInt,
        delegate_entity_id -> BigInt,
    }
}

diesel::table! {
    entity_positions (id) {
        id -> BigInt,
        entity_id -> BigInt,
        location_id -> BigInt,
        svg_x -> Double,
        svg_y -> Double,
        svg_scale -> Double,
        svg_rotate -> Double,
    }
}

diesel::table! {
    entity_paths (id) {
        id -> BigInt,
        entity_id -> BigInt,
        location_id -> BigInt,
        svg_path -> Text,
    }
}

diesel::table! {
    entity_views (id) {
        id -> BigInt,
        entity_id -> BigInt,
        location_view_id -> BigInt,
    }
}

diesel::table! {
    collection_entities (id) {
        id -> BigInt,
        entity_id -> BigInt,
        collection_id -> BigInt,
    }
}

diesel::table! {
    sensors (id) {
        id -> BigInt,
        entity_state_id -> BigInt,
        name -> Text,
        integration_id -> Text,
        integration_name -> Text,
    }
}

diesel::table! {
    controllers (id) {
        id -> BigInt,
        entity_state_id -> BigInt,
        name -> Text,
        integration_id -> Text,
        integration_name -> Text,
        payload -> Nullable<Text>,
    }
}

diesel::table! {
    event_definitions (id) {
        id -> BigInt,
        entity_state_id -> BigInt,
        name -> Text,
        event_kind -> Text,
        integration_id -> Text,
        integration_name -> Text,
    }
}

diesel::table! {
    integrations (id) {
        id -> BigInt,
        integration_id -> Text,
        is_enabled -> Bool,
    }
}

diesel::table! {
    integration_attributes (id) {
        id -> BigInt,
        integration_id -> Text,
        name -> Text,
        value -> Text,
        value_type -> Text,
        is_required -> Bool,
        is_secret -> Bool,
    }
}

diesel::table! {
    database_locks (id) {
        id -> BigInt,
        name -> Text,
        acquired_at -> TimestamptzSqlite,
    }
}

diesel::joinable!(entity_states -> entities (entity_id));
diesel::joinable!(entity_attributes -> entities (entity_id));
diesel::joinable!(entity_attribute_history -> entity_attributes (attribute_id));
diesel::joinable!(entity_state_delegations -> entity_states (entity_state_id));
diesel::joinable!(sensors -> entity_states (entity_state_id));
diesel::joinable!(controllers -> entity_states (entity_state_id));
diesel::joinable!(event_definitions -> entity_states (entity_state_id));

diesel::allow_tables_to_appear_in_same_query!(
    entities,
    entity_states,
    entity_attributes,
    entity_attribute_history,
    entity_state_delegations,
    entity_positions,
    entity_paths,
    entity_views,
    collection_entities,
    sensors,
    controllers,
    event_definitions,
    integrations,
    integration_attributes,
    database_locks,
);
