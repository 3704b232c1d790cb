//! Domain structs and closed enums for entities and their states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::integrations::IntegrationKey;

/// Kind of thing an entity is. Drives default visuals and the delegate
/// creation rules; stored as its snake_case string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Area,
    Camera,
    Light,
    WallSwitch,
    Thermostat,
    MotionSensor,
    OpenCloseSensor,
    Healthcheck,
    TimeSource,
    WeatherStation,
    Sprinkler,
    Door,
    Window,
    Appliance,
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Area => "area",
            Self::Camera => "camera",
            Self::Light => "light",
            Self::WallSwitch => "wall_switch",
            Self::Thermostat => "thermostat",
            Self::MotionSensor => "motion_sensor",
            Self::OpenCloseSensor => "open_close_sensor",
            Self::Healthcheck => "healthcheck",
            Self::TimeSource => "time_source",
            Self::WeatherStation => "weather_station",
            Self::Sprinkler => "sprinkler",
            Self::Door => "door",
            Self::Window => "window",
            Self::Appliance => "appliance",
            Self::Other => "other",
        }
    }

    /// Human label used when naming auto-created delegate entities.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Area => "Area",
            Self::Camera => "Camera",
            Self::Light => "Light",
            Self::WallSwitch => "Wall Switch",
            Self::Thermostat => "Thermostat",
            Self::MotionSensor => "Motion Sensor",
            Self::OpenCloseSensor => "Open/Close Sensor",
            Self::Healthcheck => "Healthcheck",
            Self::TimeSource => "Time Source",
            Self::WeatherStation => "Weather Station",
            Self::Sprinkler => "Sprinkler",
            Self::Door => "Door",
            Self::Window => "Window",
            Self::Appliance => "Appliance",
            Self::Other => "Other",
        }
    }

    /// Parse a stored string, falling back to `Other` for unknown values so
    /// schema drift never breaks reads.
    pub fn from_str_safe(value: &str) -> Self {
        match value {
            "area" => Self::Area,
            "camera" => Self::Camera,
            "light" => Self::Light,
            "wall_switch" => Self::WallSwitch,
            "thermostat" => Self::Thermostat,
            "motion_sensor" => Self::MotionSensor,
            "open_close_sensor" => Self::OpenCloseSensor,
            "healthcheck" => Self::Healthcheck,
            "time_source" => Self::TimeSource,
            "weather_station" => Self::WeatherStation,
            "sprinkler" => Self::Sprinkler,
            "door" => Self::Door,
            "window" => Self::Window,
            "appliance" => Self::Appliance,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of observable/controllable fact an entity state represents.
/// Determines rendering and aggregation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStateType {
    OnOff,
    OpenClose,
    Movement,
    Presence,
    SoundLevel,
    VideoStream,
    Temperature,
    Humidity,
    Connectivity,
    HighLow,
    DateTime,
    Discrete,
    MultiValued,
    Blob,
}

impl EntityStateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnOff => "on_off",
            Self::OpenClose => "open_close",
            Self::Movement => "movement",
            Self::Presence => "presence",
            Self::SoundLevel => "sound_level",
            Self::VideoStream => "video_stream",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Connectivity => "connectivity",
            Self::HighLow => "high_low",
            Self::DateTime => "datetime",
            Self::Discrete => "discrete",
            Self::MultiValued => "multi_valued",
            Self::Blob => "blob",
        }
    }

    pub fn from_str_safe(value: &str) -> Self {
        match value {
            "on_off" => Self::OnOff,
            "open_close" => Self::OpenClose,
            "movement" => Self::Movement,
            "presence" => Self::Presence,
            "sound_level" => Self::SoundLevel,
            "video_stream" => Self::VideoStream,
            "temperature" => Self::Temperature,
            "humidity" => Self::Humidity,
            "connectivity" => Self::Connectivity,
            "high_low" => Self::HighLow,
            "datetime" => Self::DateTime,
            "discrete" => Self::Discrete,
            "multi_valued" => Self::MultiValued,
            _ => Self::Blob,
        }
    }

    /// The delegate entity type auto-created when an entity with this state
    /// type first enters a view, or None when no default delegate applies.
    pub fn default_delegate_type(&self) -> Option<EntityType> {
        match self {
            Self::Movement | Self::Presence | Self::SoundLevel | Self::VideoStream => {
                Some(EntityType::Area)
            }
            _ => None,
        }
    }
}

impl fmt::Display for EntityStateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical state values used across integrations, so sensors from
/// different providers report comparable strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStateValue {
    On,
    Off,
    Open,
    Closed,
    Active,
    Idle,
    High,
    Low,
    Connected,
    Disconnected,
}

impl EntityStateValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Active => "active",
            Self::Idle => "idle",
            Self::High => "high",
            Self::Low => "low",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for EntityStateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value-range descriptor for an entity state: a discrete list, a
/// value-to-label map, or free-form. Persisted as JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValueRange {
    #[default]
    FreeForm,
    Discrete(Vec<String>),
    Labeled(BTreeMap<String, String>),
}

impl ValueRange {
    pub fn from_json_str(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::FreeForm;
        };
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Array(items)) => Self::Discrete(
                items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            Ok(serde_json::Value::Object(map)) => Self::Labeled(
                map.into_iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                    .collect(),
            ),
            _ => Self::FreeForm,
        }
    }

    pub fn to_json_str(&self) -> Option<String> {
        match self {
            Self::FreeForm => None,
            Self::Discrete(items) => serde_json::to_string(items).ok(),
            Self::Labeled(map) => serde_json::to_string(map).ok(),
        }
    }

    /// (value, label) choices for UI rendering.
    pub fn choices(&self) -> Vec<(String, String)> {
        match self {
            Self::FreeForm => Vec::new(),
            Self::Discrete(items) => items.iter().map(|v| (v.clone(), v.clone())).collect(),
            Self::Labeled(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

/// A physical feature, device, software artifact, or abstract region.
///
/// An entity may have zero or more hidden [`EntityState`]s; sensors report
/// state values and controllers write them. The entity type determines its
/// visual appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    pub entity_type: EntityType,
    pub can_user_delete: bool,
    pub has_video_stream: bool,
    pub integration_key: Option<IntegrationKey>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) [{}]", self.name, self.entity_type, self.id)
    }
}

/// Insert payload for a new entity.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub can_user_delete: bool,
    pub has_video_stream: bool,
    pub integration_key: Option<IntegrationKey>,
}

impl NewEntity {
    pub fn user_created(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
            can_user_delete: true,
            has_video_stream: false,
            integration_key: None,
        }
    }
}

/// A hidden observable/controllable fact about an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: i64,
    pub entity_id: i64,
    pub state_type: EntityStateType,
    pub name: String,
    pub value_range: Option<String>,
    pub units: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EntityState {
    pub fn value_range(&self) -> ValueRange {
        ValueRange::from_json_str(self.value_range.as_deref())
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] ({})", self.name, self.id, self.state_type)
    }
}

/// Insert payload for a new entity state.
#[derive(Debug, Clone)]
pub struct NewEntityState {
    pub entity_id: i64,
    pub state_type: EntityStateType,
    pub name: String,
    pub value_range: Option<String>,
    pub units: Option<String>,
}

/// How an attribute value may be edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// Added by the user; freely editable.
    Custom,
    /// Materialized by an integration; not user-editable.
    Predefined,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Predefined => "predefined",
        }
    }

    pub fn from_str_safe(value: &str) -> Self {
        match value {
            "predefined" => Self::Predefined,
            _ => Self::Custom,
        }
    }
}

/// Typed name/value pair attached to an entity (specs, docs, configs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAttribute {
    pub id: i64,
    pub entity_id: i64,
    pub name: String,
    pub value: String,
    pub attribute_type: AttributeType,
    pub is_editable: bool,
}

/// Append-only history row; restoration creates a new row rather than
/// mutating an old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAttributeHistory {
    pub id: i64,
    pub attribute_id: i64,
    pub value: String,
    pub changed_at: DateTime<Utc>,
}

/// Directed edge: the delegate entity visually stands in for the principal
/// entity state. Unique on (entity_state, delegate_entity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStateDelegation {
    pub id: i64,
    pub entity_state_id: i64,
    pub delegate_entity_id: i64,
}

/// Point placement of an entity inside one location's floorplan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPosition {
    pub id: i64,
    pub entity_id: i64,
    pub location_id: i64,
    pub svg_x: f64,
    pub svg_y: f64,
    pub svg_scale: f64,
    pub svg_rotate: f64,
}

/// Arbitrary SVG path placement, e.g. a wire or pipe run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPath {
    pub id: i64,
    pub entity_id: i64,
    pub location_id: i64,
    pub svg_path: String,
}

/// Membership of an entity in a location view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityView {
    pub id: i64,
    pub entity_id: i64,
    pub location_view_id: i64,
}

/// Reports values for exactly one entity state. Carries its own
/// integration key so the response bus can address it without joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: i64,
    pub entity_state_id: i64,
    pub name: String,
    pub integration_key: IntegrationKey,
}

/// Writes values to exactly one entity state. The opaque payload guides the
/// dispatcher toward the right remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    pub id: i64,
    pub entity_state_id: i64,
    pub name: String,
    pub integration_key: IntegrationKey,
    pub payload: Option<serde_json::Value>,
}

/// Counts of user-added relationships attached to an entity. Sync removal
/// preserves an entity when any of these are non-zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserRelationshipSummary {
    pub positions: usize,
    pub paths: usize,
    pub views: usize,
    pub collections: usize,
    pub delegations_as_principal: usize,
    pub delegations_as_delegate: usize,
}

impl UserRelationshipSummary {
    pub fn has_any(&self) -> bool {
        self.positions > 0
            || self.paths > 0
            || self.views > 0
            || self.collections > 0
            || self.delegations_as_principal > 0
            || self.delegations_as_delegate > 0
    }
}

/// Hook row consumed by the (external) automation layer; created during
/// sync for alarm-capable binary sensors when the integration asks for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub id: i64,
    pub entity_state_id: i64,
    pub name: String,
    pub event_kind: EventKind,
    pub integration_key: IntegrationKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Movement,
    OpenClose,
    Connectivity,
    Battery,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movement => "movement",
            Self::OpenClose => "open_close",
            Self::Connectivity => "connectivity",
            Self::Battery => "battery",
        }
    }

    pub fn from_str_safe(value: &str) -> Option<Self> {
        match value {
            "movement" => Some(Self::Movement),
            "open_close" => Some(Self::OpenClose),
            "connectivity" => Some(Self::Connectivity),
            "battery" => Some(Self::Battery),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_round_trips_through_storage_string() {
        for et in [
            EntityType::Area,
            EntityType::Camera,
            EntityType::OpenCloseSensor,
            EntityType::WeatherStation,
        ] {
            assert_eq!(EntityType::from_str_safe(et.as_str()), et);
        }
        assert_eq!(EntityType::from_str_safe("no_such_type"), EntityType::Other);
    }

    #[test]
    fn default_delegate_map_covers_area_proxied_states() {
        assert_eq!(
            EntityStateType::Movement.default_delegate_type(),
            Some(EntityType::Area)
        );
        assert_eq!(
            EntityStateType::VideoStream.default_delegate_type(),
            Some(EntityType::Area)
        );
        assert_eq!(EntityStateType::Temperature.default_delegate_type(), None);
        assert_eq!(EntityStateType::OnOff.default_delegate_type(), None);
    }

    #[test]
    fn value_range_parses_list_and_map_forms() {
        let discrete = ValueRange::from_json_str(Some(r#"["on","off"]"#));
        assert_eq!(
            discrete,
            ValueRange::Discrete(vec!["on".into(), "off".into()])
        );
        assert_eq!(discrete.choices().len(), 2);

        let labeled = ValueRange::from_json_str(Some(r#"{"on":"On","off":"Off"}"#));
        assert!(matches!(labeled, ValueRange::Labeled(_)));

        assert_eq!(ValueRange::from_json_str(Some("not json")), ValueRange::FreeForm);
        assert_eq!(ValueRange::from_json_str(None), ValueRange::FreeForm);
    }

    #[test]
    fn relationship_summary_detects_user_edits() {
        let mut summary = UserRelationshipSummary::default();
        assert!(!summary.has_any());
        summary.views = 1;
        assert!(summary.has_any());
    }
}
