//! Wire-level models for the Home Assistant REST API.

use serde_json::Value;
use std::collections::BTreeSet;

/// Central place for the API's field names, domains, suffixes and device
/// classes.
pub struct HassApi;

impl HassApi {
    pub const ATTRIBUTES_FIELD: &'static str = "attributes";
    pub const ENTITY_ID_FIELD: &'static str = "entity_id";
    pub const STATE_FIELD: &'static str = "state";

    pub const AUTOMATION_DOMAIN: &'static str = "automation";
    pub const BINARY_SENSOR_DOMAIN: &'static str = "binary_sensor";
    pub const CALENDAR_DOMAIN: &'static str = "calendar";
    pub const CAMERA_DOMAIN: &'static str = "camera";
    pub const CLIMATE_DOMAIN: &'static str = "climate";
    pub const CONVERSATION_DOMAIN: &'static str = "conversation";
    pub const COVER_DOMAIN: &'static str = "cover";
    pub const LIGHT_DOMAIN: &'static str = "light";
    pub const LOCK_DOMAIN: &'static str = "lock";
    pub const MEDIA_PLAYER_DOMAIN: &'static str = "media_player";
    pub const PERSON_DOMAIN: &'static str = "person";
    pub const SCRIPT_DOMAIN: &'static str = "script";
    pub const SENSOR_DOMAIN: &'static str = "sensor";
    pub const SUN_DOMAIN: &'static str = "sun";
    pub const SWITCH_DOMAIN: &'static str = "switch";
    pub const TODO_DOMAIN: &'static str = "todo";
    pub const TTS_DOMAIN: &'static str = "tts";
    pub const WEATHER_DOMAIN: &'static str = "weather";
    pub const ZONE_DOMAIN: &'static str = "zone";

    /// Domains excluded from device discovery entirely.
    pub const IGNORE_DOMAINS: [&'static str; 8] = [
        Self::AUTOMATION_DOMAIN,
        Self::CALENDAR_DOMAIN,
        Self::CONVERSATION_DOMAIN,
        Self::PERSON_DOMAIN,
        Self::SCRIPT_DOMAIN,
        Self::TODO_DOMAIN,
        Self::TTS_DOMAIN,
        Self::ZONE_DOMAIN,
    ];

    /// Suffixes suggesting a state belongs to another device whose name
    /// precedes the suffix.
    pub const STATE_SUFFIXES: [&'static str; 15] = [
        "_battery",
        "_events_last_hour",
        "_humidity",
        "_light",
        "_motion",
        "_state",
        "_status",
        "_temperature",
        "_next_setting",
        "_next_rising",
        "_next_noon",
        "_next_midnight",
        "_next_dusk",
        "_next_dawn",
        "_black_cartridge",
    ];

    pub const DEVICE_CLASS_ATTR: &'static str = "device_class";
    pub const FRIENDLY_NAME_ATTR: &'static str = "friendly_name";
    pub const INSTEON_ADDRESS_ATTR: &'static str = "insteon_address";
    pub const OPTIONS_ATTR: &'static str = "options";
    pub const UNIT_OF_MEASUREMENT_ATTR: &'static str = "unit_of_measurement";

    pub const BATTERY_DEVICE_CLASS: &'static str = "battery";
    pub const CONNECTIVITY_DEVICE_CLASS: &'static str = "connectivity";
    pub const DOOR_DEVICE_CLASS: &'static str = "door";
    pub const ENUM_DEVICE_CLASS: &'static str = "enum";
    pub const GARAGE_DOOR_DEVICE_CLASS: &'static str = "garage_door";
    pub const HUMIDITY_DEVICE_CLASS: &'static str = "humidity";
    pub const LIGHT_DEVICE_CLASS: &'static str = "light";
    pub const MOTION_DEVICE_CLASS: &'static str = "motion";
    pub const OUTLET_DEVICE_CLASS: &'static str = "outlet";
    pub const TEMPERATURE_DEVICE_CLASS: &'static str = "temperature";
    pub const TIMESTAMP_DEVICE_CLASS: &'static str = "timestamp";
    pub const WINDOW_DEVICE_CLASS: &'static str = "window";

    pub const OPEN_CLOSE_DEVICE_CLASSES: [&'static str; 3] = [
        Self::DOOR_DEVICE_CLASS,
        Self::GARAGE_DOOR_DEVICE_CLASS,
        Self::WINDOW_DEVICE_CLASS,
    ];

    pub const ON_VALUE: &'static str = "on";
    pub const OFF_VALUE: &'static str = "off";
}

/// One state object from `/api/states`, pre-split into the name parts the
/// device-grouping heuristics work on.
#[derive(Debug, Clone, PartialEq)]
pub struct HassState {
    pub entity_id: String,
    pub domain: String,
    /// Entity id with the domain prefix removed.
    pub name_sans_domain: String,
    /// `name_sans_domain` with any known suffix removed.
    pub name_sans_suffix: String,
    pub api: Value,
}

impl HassState {
    /// Parse one raw API object; returns None when `entity_id` is missing.
    pub fn from_api(api: Value) -> Option<Self> {
        let entity_id = api.get(HassApi::ENTITY_ID_FIELD)?.as_str()?.to_string();
        let (domain, name_sans_domain) = match entity_id.split_once('.') {
            Some((domain, rest)) => (domain.to_string(), rest.to_string()),
            None => (entity_id.clone(), entity_id.clone()),
        };

        let mut name_sans_suffix = name_sans_domain.clone();
        for suffix in HassApi::STATE_SUFFIXES {
            if let Some(stripped) = name_sans_domain.strip_suffix(suffix) {
                name_sans_suffix = stripped.to_string();
            }
        }

        Some(Self {
            entity_id,
            domain,
            name_sans_domain,
            name_sans_suffix,
            api,
        })
    }

    fn attributes(&self) -> Option<&serde_json::Map<String, Value>> {
        self.api.get(HassApi::ATTRIBUTES_FIELD)?.as_object()
    }

    fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes()?.get(name)?.as_str()
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.attribute_str(HassApi::FRIENDLY_NAME_ATTR)
    }

    pub fn state_value(&self) -> Option<&str> {
        self.api.get(HassApi::STATE_FIELD)?.as_str()
    }

    pub fn device_class(&self) -> Option<&str> {
        self.attribute_str(HassApi::DEVICE_CLASS_ATTR)
    }

    pub fn insteon_address(&self) -> Option<&str> {
        self.attribute_str(HassApi::INSTEON_ADDRESS_ATTR)
    }

    pub fn unit_of_measurement(&self) -> Option<&str> {
        self.attribute_str(HassApi::UNIT_OF_MEASUREMENT_ATTR)
    }

    pub fn options(&self) -> Vec<String> {
        self.attributes()
            .and_then(|attrs| attrs.get(HassApi::OPTIONS_ATTR))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stable grouping id when some attribute uniquely identifies the
    /// owning device across states, e.g. an Insteon address.
    pub fn device_group_id(&self) -> Option<String> {
        self.insteon_address()
            .map(|address| format!("insteon:{address}"))
    }
}

/// One or more states collated into a single logical device.
#[derive(Debug, Clone)]
pub struct HassDevice {
    pub device_id: String,
    pub states: Vec<HassState>,
}

impl HassDevice {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            states: Vec::new(),
        }
    }

    pub fn add_state(&mut self, state: HassState) {
        self.states.push(state);
    }

    pub fn domain_set(&self) -> BTreeSet<&str> {
        self.states.iter().map(|s| s.domain.as_str()).collect()
    }

    pub fn device_class_set(&self) -> BTreeSet<&str> {
        self.states.iter().filter_map(|s| s.device_class()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_parsing_splits_domain_and_strips_suffixes() {
        let state = HassState::from_api(json!({
            "entity_id": "sensor.kitchen_temperature",
            "state": "21.5",
            "attributes": {"friendly_name": "Kitchen Temperature", "unit_of_measurement": "°C"}
        }))
        .unwrap();

        assert_eq!(state.domain, "sensor");
        assert_eq!(state.name_sans_domain, "kitchen_temperature");
        assert_eq!(state.name_sans_suffix, "kitchen");
        assert_eq!(state.friendly_name(), Some("Kitchen Temperature"));
        assert_eq!(state.state_value(), Some("21.5"));
    }

    #[test]
    fn state_without_known_suffix_keeps_full_name() {
        let state = HassState::from_api(json!({"entity_id": "light.porch", "state": "off"})).unwrap();
        assert_eq!(state.name_sans_domain, "porch");
        assert_eq!(state.name_sans_suffix, "porch");
    }

    #[test]
    fn insteon_address_produces_group_id() {
        let state = HassState::from_api(json!({
            "entity_id": "switch.fan",
            "state": "off",
            "attributes": {"insteon_address": "12.34.56"}
        }))
        .unwrap();
        assert_eq!(state.device_group_id(), Some("insteon:12.34.56".into()));
    }

    #[test]
    fn missing_entity_id_is_rejected() {
        assert!(HassState::from_api(json!({"state": "on"})).is_none());
    }

    #[test]
    fn device_collects_domain_and_class_sets() {
        let mut device = HassDevice::new("fan");
        device.add_state(
            HassState::from_api(json!({"entity_id": "switch.fan", "state": "off"})).unwrap(),
        );
        device.add_state(
            HassState::from_api(json!({
                "entity_id": "sensor.fan_temperature",
                "state": "30",
                "attributes": {"device_class": "temperature"}
            }))
            .unwrap(),
        );

        assert_eq!(device.domain_set(), BTreeSet::from(["switch", "sensor"]));
        assert_eq!(device.device_class_set(), BTreeSet::from(["temperature"]));
    }
}
