//! Translation between the remote's flat state list and the hub's entity
//! model: device grouping heuristics, entity typing, sensor/controller
//! specifications and value mapping.

use log::warn;
use serde_json::json;
use std::collections::BTreeMap;

use hearth_core::entities::{DeviceStateSpec, EntityStateType, EntityType, EventKind};
use hearth_core::integrations::IntegrationKey;

use crate::manager::HASS_INTEGRATION_ID;
use crate::models::{HassApi, HassDevice, HassState};

pub const INSTEON_ADDRESS_ATTR_NAME: &str = "Insteon Address";

/// Domains whose friendly name best describes the whole device.
const PREFERRED_NAME_DOMAINS: [&str; 4] = [
    HassApi::CAMERA_DOMAIN,
    HassApi::CLIMATE_DOMAIN,
    HassApi::LIGHT_DOMAIN,
    HassApi::SUN_DOMAIN,
];
const PREFERRED_NAME_DEVICE_CLASSES: [&str; 1] = [HassApi::MOTION_DEVICE_CLASS];

pub fn device_to_integration_key(device: &HassDevice) -> IntegrationKey {
    IntegrationKey::new(HASS_INTEGRATION_ID, &device.device_id)
}

pub fn state_to_integration_key(state: &HassState) -> IntegrationKey {
    IntegrationKey::new(HASS_INTEGRATION_ID, &state.entity_id)
}

/// Heuristically collate flat states into devices.
///
/// The remote protocol does not make the state-to-device relationship
/// explicit, so grouping runs in order of confidence: a stable
/// device-group id first, then the full name ignoring domain, then the
/// suffix-stripped short name. Ignored domains never participate.
pub fn group_states_into_devices(
    states: &BTreeMap<String, HassState>,
) -> BTreeMap<String, HassDevice> {
    let mut devices: BTreeMap<String, HassDevice> = BTreeMap::new();
    // Key under which each device was filed, tried in confidence order.
    let mut aliases: BTreeMap<String, String> = BTreeMap::new();

    for state in states.values() {
        if HassApi::IGNORE_DOMAINS.contains(&state.domain.as_str()) {
            continue;
        }

        let candidate_keys = [
            state.device_group_id(),
            Some(state.name_sans_domain.clone()),
            Some(state.name_sans_suffix.clone()),
        ];
        let existing = candidate_keys
            .iter()
            .flatten()
            .find_map(|key| aliases.get(key))
            .cloned();

        if let Some(device_id) = existing {
            if let Some(device) = devices.get_mut(&device_id) {
                register_aliases(&mut aliases, state, &device_id);
                device.add_state(state.clone());
                continue;
            }
        }

        let device_id = state
            .device_group_id()
            .unwrap_or_else(|| state.name_sans_suffix.clone());
        let mut device = HassDevice::new(&device_id);
        register_aliases(&mut aliases, state, &device_id);
        device.add_state(state.clone());
        devices.insert(device_id, device);
    }

    devices
}

fn register_aliases(aliases: &mut BTreeMap<String, String>, state: &HassState, device_id: &str) {
    if let Some(group_id) = state.device_group_id() {
        aliases.entry(group_id).or_insert_with(|| device_id.to_string());
    }
    aliases
        .entry(state.name_sans_domain.clone())
        .or_insert_with(|| device_id.to_string());
    aliases
        .entry(state.name_sans_suffix.clone())
        .or_insert_with(|| device_id.to_string());
}

/// Pick the device's display name: a friendly name from a preferred
/// domain/device-class if one exists, otherwise the friendly name of the
/// state with the shortest entity id, otherwise the device id.
pub fn device_to_entity_name(device: &HassDevice) -> String {
    let mut shortest: Option<&HassState> = None;
    for state in &device.states {
        let Some(friendly_name) = state.friendly_name() else {
            continue;
        };
        if PREFERRED_NAME_DOMAINS.contains(&state.domain.as_str()) {
            return friendly_name.to_string();
        }
        if state
            .device_class()
            .is_some_and(|dc| PREFERRED_NAME_DEVICE_CLASSES.contains(&dc))
        {
            return friendly_name.to_string();
        }
        if shortest.is_none_or(|s| state.entity_id.len() < s.entity_id.len()) {
            shortest = Some(state);
        }
    }

    shortest
        .and_then(|s| s.friendly_name())
        .map(str::to_string)
        .unwrap_or_else(|| device.device_id.clone())
}

/// Priority table over (domain set, device-class set).
pub fn device_to_entity_type(device: &HassDevice) -> EntityType {
    let domains = device.domain_set();
    let device_classes = device.device_class_set();

    if domains.contains(HassApi::CAMERA_DOMAIN) {
        return EntityType::Camera;
    }
    if domains.contains(HassApi::WEATHER_DOMAIN) {
        return EntityType::WeatherStation;
    }
    if device_classes.contains(HassApi::TIMESTAMP_DEVICE_CLASS) {
        return EntityType::TimeSource;
    }
    if domains.contains(HassApi::BINARY_SENSOR_DOMAIN)
        && HassApi::OPEN_CLOSE_DEVICE_CLASSES
            .iter()
            .any(|dc| device_classes.contains(dc))
    {
        return EntityType::OpenCloseSensor;
    }
    if device_classes.contains(HassApi::MOTION_DEVICE_CLASS) {
        return EntityType::MotionSensor;
    }
    if domains.contains(HassApi::LIGHT_DOMAIN)
        || device_classes.contains(HassApi::LIGHT_DEVICE_CLASS)
    {
        return EntityType::Light;
    }
    if device_classes.contains(HassApi::OUTLET_DEVICE_CLASS) {
        return EntityType::WallSwitch;
    }
    if device_classes.contains(HassApi::TEMPERATURE_DEVICE_CLASS) {
        return EntityType::Thermostat;
    }
    if device_classes.contains(HassApi::CONNECTIVITY_DEVICE_CLASS) {
        return EntityType::Healthcheck;
    }
    EntityType::Other
}

pub fn device_to_insteon_address(device: &HassDevice) -> Option<String> {
    device
        .states
        .iter()
        .find_map(|s| s.insteon_address().map(str::to_string))
}

fn state_display_name(state: &HassState, device_name: &str) -> String {
    if let Some(friendly_name) = state.friendly_name() {
        return friendly_name.to_string();
    }
    if let Some(device_class) = state.device_class() {
        return format!("{device_name} ({device_class})");
    }
    format!("{device_name} ({})", state.domain)
}

/// States suppressed by the switch/light duplicate elision rule.
///
/// Some remote switches expose both a `switch.<x>` and a `light.<x>` state
/// for one underlying device state; only one local state is created. When
/// both are present the switch-backed one wins and the light variant is
/// suppressed (logged, since the friendly names may differ).
fn elided_light_entity_ids(states: &[HassState]) -> Vec<String> {
    let has_switch = states.iter().any(|s| s.domain == HassApi::SWITCH_DOMAIN);
    if !has_switch {
        return Vec::new();
    }
    states
        .iter()
        .filter(|s| s.domain == HassApi::LIGHT_DOMAIN)
        .map(|light| {
            if let Some(switch) = states.iter().find(|s| s.domain == HassApi::SWITCH_DOMAIN) {
                if switch.friendly_name() != light.friendly_name() {
                    warn!(
                        "Suppressing duplicate light state {} (friendly name {:?} differs from switch {:?})",
                        light.entity_id,
                        light.friendly_name(),
                        switch.friendly_name()
                    );
                }
            }
            light.entity_id.clone()
        })
        .collect()
}

/// Build the on/off controller payload the dispatcher routes on.
fn on_off_controller_payload(state: &HassState) -> serde_json::Value {
    let supports_brightness = state.domain == HassApi::LIGHT_DOMAIN;
    json!({
        "is_controllable": true,
        "domain": state.domain,
        "on_service": "turn_on",
        "off_service": "turn_off",
        "supports_brightness": supports_brightness,
    })
}

/// Map one device's states to the local state/sensor/controller specs the
/// sync engine materializes. Handles duplicate-state elision and the
/// optional alarm event-definition hooks.
pub fn device_state_specs(
    device: &HassDevice,
    device_name: &str,
    add_alarm_events: bool,
) -> Vec<DeviceStateSpec> {
    let elided = elided_light_entity_ids(&device.states);

    device
        .states
        .iter()
        .filter(|state| !elided.contains(&state.entity_id))
        .map(|state| state_to_spec(state, device_name, add_alarm_events))
        .collect()
}

fn state_to_spec(state: &HassState, device_name: &str, add_alarm_events: bool) -> DeviceStateSpec {
    let key = state_to_integration_key(state);
    let name = state_display_name(state, device_name);
    let device_class = state.device_class();

    // Controllers only for states we explicitly know are controllable.
    if state.domain == HassApi::SWITCH_DOMAIN || state.domain == HassApi::LIGHT_DOMAIN {
        let mut spec = DeviceStateSpec::sensor_only(EntityStateType::OnOff, name, key);
        spec.value_range = serde_json::to_string(&["on", "off"]).ok();
        spec.create_controller = true;
        spec.controller_payload = Some(on_off_controller_payload(state));
        return spec;
    }

    if state.domain == HassApi::SUN_DOMAIN || state.domain == HassApi::WEATHER_DOMAIN {
        return DeviceStateSpec::sensor_only(EntityStateType::MultiValued, name, key);
    }

    if state.domain == HassApi::BINARY_SENSOR_DOMAIN {
        return binary_sensor_spec(state, name, key, add_alarm_events);
    }

    match device_class {
        Some(HassApi::TEMPERATURE_DEVICE_CLASS) => {
            let units = state.unit_of_measurement().map(|unit| {
                if unit.to_lowercase().contains('c') {
                    "°C".to_string()
                } else {
                    "°F".to_string()
                }
            });
            let mut spec = DeviceStateSpec::sensor_only(EntityStateType::Temperature, name, key);
            spec.units = units;
            spec
        }
        Some(HassApi::HUMIDITY_DEVICE_CLASS) => {
            let unit_raw = state.unit_of_measurement().unwrap_or("%").to_lowercase();
            let units = if unit_raw.contains("kg") {
                "g/kg".to_string()
            } else if unit_raw.contains('g') {
                "g/m³".to_string()
            } else {
                "%".to_string()
            };
            let mut spec = DeviceStateSpec::sensor_only(EntityStateType::Humidity, name, key);
            spec.units = Some(units);
            spec
        }
        Some(HassApi::TIMESTAMP_DEVICE_CLASS) => {
            DeviceStateSpec::sensor_only(EntityStateType::DateTime, name, key)
        }
        Some(HassApi::ENUM_DEVICE_CLASS) => {
            let mut spec = DeviceStateSpec::sensor_only(EntityStateType::Discrete, name, key);
            spec.value_range = serde_json::to_string(&state.options()).ok();
            spec
        }
        _ => DeviceStateSpec::sensor_only(EntityStateType::Blob, name, key),
    }
}

fn binary_sensor_spec(
    state: &HassState,
    name: String,
    key: IntegrationKey,
    add_alarm_events: bool,
) -> DeviceStateSpec {
    let (state_type, event_kind) = match state.device_class() {
        Some(HassApi::CONNECTIVITY_DEVICE_CLASS) => {
            (EntityStateType::Connectivity, Some(EventKind::Connectivity))
        }
        Some(dc) if HassApi::OPEN_CLOSE_DEVICE_CLASSES.contains(&dc) => {
            (EntityStateType::OpenClose, Some(EventKind::OpenClose))
        }
        Some(HassApi::MOTION_DEVICE_CLASS) => (EntityStateType::Movement, Some(EventKind::Movement)),
        Some(HassApi::BATTERY_DEVICE_CLASS) => (EntityStateType::HighLow, Some(EventKind::Battery)),
        Some(HassApi::LIGHT_DEVICE_CLASS) => (EntityStateType::OnOff, None),
        _ => (EntityStateType::OnOff, None),
    };

    let mut spec = DeviceStateSpec::sensor_only(state_type, name, key);
    if add_alarm_events {
        spec.event_kind = event_kind;
    }
    spec
}

/// Translate a remote state value into the canonical sensor value string.
pub fn sensor_value_str(state: &HassState) -> Option<String> {
    let raw = state.state_value()?;

    if state.domain != HassApi::BINARY_SENSOR_DOMAIN {
        return Some(raw.to_string());
    }

    let device_class = state.device_class();
    let canonical = match raw.to_lowercase().as_str() {
        HassApi::ON_VALUE => match device_class {
            Some(HassApi::MOTION_DEVICE_CLASS) => "active",
            Some(HassApi::BATTERY_DEVICE_CLASS) => "low",
            Some(dc) if HassApi::OPEN_CLOSE_DEVICE_CLASSES.contains(&dc) => "open",
            Some(HassApi::CONNECTIVITY_DEVICE_CLASS) => "connected",
            _ => "on",
        },
        HassApi::OFF_VALUE => match device_class {
            Some(HassApi::MOTION_DEVICE_CLASS) => "idle",
            Some(HassApi::BATTERY_DEVICE_CLASS) => "high",
            Some(dc) if HassApi::OPEN_CLOSE_DEVICE_CLASSES.contains(&dc) => "closed",
            Some(HassApi::CONNECTIVITY_DEVICE_CLASS) => "disconnected",
            _ => "off",
        },
        other => {
            warn!("Unknown binary state value '{other}' for {}", state.entity_id);
            return None;
        }
    };
    Some(canonical.to_string())
}

/// Translate a canonical control value into the remote's representation.
pub fn canonical_to_hass_value(value: &str) -> String {
    match value.to_lowercase().as_str() {
        "open" | "on" => HassApi::ON_VALUE.to_string(),
        "closed" | "off" => HassApi::OFF_VALUE.to_string(),
        _ => value.to_string(),
    }
}
