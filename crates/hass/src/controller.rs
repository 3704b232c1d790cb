//! Control dispatch: maps a local control request to a remote service
//! call, preferring the controller payload's declared services and falling
//! back to a best-effort table keyed on the remote domain.

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{json, Value};
use std::sync::Arc;

use hearth_core::integrations::{ControlResult, IntegrationController, IntegrationDetails};

use crate::manager::HassManager;

/// A fully resolved remote service call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ControlPlan {
    pub domain: String,
    pub service: String,
    pub service_data: Option<Value>,
    pub new_value: String,
}

fn is_on_value(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "on" | "true" | "1")
}

fn is_off_value(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "off" | "false" | "0")
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn payload_flag(payload: &Value, key: &str) -> bool {
    payload.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn payload_parameter(payload: &Value, name: &str) -> bool {
    payload
        .get("parameters")
        .and_then(Value::as_object)
        .is_some_and(|params| params.contains_key(name))
}

/// Resolve the service call for a control request. Range errors and
/// unknown control values fail locally, before any remote call.
pub(crate) fn plan_control(
    entity_id: &str,
    payload: Option<&Value>,
    control_value: &str,
) -> Result<ControlPlan, String> {
    let domain = payload
        .and_then(|p| payload_str(p, "domain"))
        .map(str::to_string)
        .or_else(|| entity_id.split_once('.').map(|(d, _)| d.to_string()))
        .ok_or_else(|| format!("Invalid entity_id format: {entity_id}"))?;

    match payload {
        Some(payload) if payload_flag(payload, "is_controllable") => {
            plan_with_payload(&domain, entity_id, control_value, payload)
        }
        _ => plan_best_effort(&domain, control_value),
    }
}

fn is_numeric_control(control_value: &str, payload: &Value) -> bool {
    if control_value.parse::<f64>().is_err() {
        return false;
    }
    payload_flag(payload, "supports_brightness") || payload.get("set_service").is_some()
        || payload.get("parameters").is_some()
}

fn plan_with_payload(
    domain: &str,
    entity_id: &str,
    control_value: &str,
    payload: &Value,
) -> Result<ControlPlan, String> {
    if is_numeric_control(control_value, payload) {
        return plan_numeric_with_payload(domain, control_value, payload);
    }

    let service_key = if is_on_value(control_value) {
        "on_service"
    } else if is_off_value(control_value) {
        "off_service"
    } else if control_value.eq_ignore_ascii_case("open") {
        "open_service"
    } else if control_value.eq_ignore_ascii_case("close") {
        "close_service"
    } else {
        return Err(format!("Unknown control value: {control_value}"));
    };

    match payload_str(payload, service_key) {
        Some(service) => Ok(ControlPlan {
            domain: domain.to_string(),
            service: service.to_string(),
            service_data: None,
            new_value: control_value.to_string(),
        }),
        None => {
            // Payload declares the device controllable but not this verb;
            // fall through to the standard patterns.
            warn!("No {service_key} declared for {entity_id}, using best-effort control");
            plan_best_effort(domain, control_value)
        }
    }
}

fn plan_numeric_with_payload(
    domain: &str,
    control_value: &str,
    payload: &Value,
) -> Result<ControlPlan, String> {
    let numeric: f64 = control_value
        .parse()
        .map_err(|_| format!("Invalid numeric value: {control_value}"))?;

    if payload_flag(payload, "supports_brightness") {
        let brightness = numeric as i64;
        if !(0..=100).contains(&brightness) {
            return Err(format!("Invalid brightness value: {brightness} (must be 0-100)"));
        }
        let (service_key, service_data) = if brightness == 0 {
            ("off_service", None)
        } else {
            ("on_service", Some(json!({ "brightness_pct": brightness })))
        };
        let service = payload_str(payload, service_key)
            .ok_or("No service defined for brightness control")?;
        return Ok(ControlPlan {
            domain: domain.to_string(),
            service: service.to_string(),
            service_data,
            new_value: brightness.to_string(),
        });
    }

    if payload_parameter(payload, "temperature") {
        let service = payload_str(payload, "set_service")
            .ok_or("No temperature service defined")?;
        return Ok(ControlPlan {
            domain: domain.to_string(),
            service: service.to_string(),
            service_data: Some(json!({ "temperature": numeric })),
            new_value: numeric.to_string(),
        });
    }

    if payload_parameter(payload, "volume_level") {
        if !(0.0..=1.0).contains(&numeric) {
            return Err(format!("Invalid volume value: {numeric} (must be 0.0-1.0)"));
        }
        let service = payload_str(payload, "set_service").unwrap_or("volume_set");
        return Ok(ControlPlan {
            domain: domain.to_string(),
            service: service.to_string(),
            service_data: Some(json!({ "volume_level": numeric })),
            new_value: numeric.to_string(),
        });
    }

    if payload_parameter(payload, "position") {
        let position = numeric as i64;
        if !(0..=100).contains(&position) {
            return Err(format!("Invalid position value: {position} (must be 0-100)"));
        }
        let service = payload_str(payload, "set_service").unwrap_or("set_cover_position");
        return Ok(ControlPlan {
            domain: domain.to_string(),
            service: service.to_string(),
            service_data: Some(json!({ "position": position })),
            new_value: position.to_string(),
        });
    }

    if let Some(service) = payload_str(payload, "set_service") {
        // Generic numeric set: the parameter name follows the domain,
        // e.g. climate -> temperature-style singular.
        let parameter = domain.trim_end_matches('s');
        return Ok(ControlPlan {
            domain: domain.to_string(),
            service: service.to_string(),
            service_data: Some(json!({ parameter: numeric })),
            new_value: control_value.to_string(),
        });
    }

    Err("No numeric parameter handling defined".to_string())
}

/// Standard service patterns by domain, used when no payload guides us.
fn plan_best_effort(domain: &str, control_value: &str) -> Result<ControlPlan, String> {
    if control_value.parse::<f64>().is_ok() {
        return plan_numeric_best_effort(domain, control_value);
    }

    let service = if is_on_value(control_value) {
        "turn_on"
    } else if is_off_value(control_value) {
        "turn_off"
    } else if control_value.eq_ignore_ascii_case("open") {
        match domain {
            "cover" => "open_cover",
            "lock" => "unlock",
            _ => "turn_on",
        }
    } else if control_value.eq_ignore_ascii_case("close") {
        match domain {
            "cover" => "close_cover",
            "lock" => "lock",
            _ => "turn_off",
        }
    } else {
        return Err(format!("Unknown control value: {control_value}"));
    };

    Ok(ControlPlan {
        domain: domain.to_string(),
        service: service.to_string(),
        service_data: None,
        new_value: control_value.to_string(),
    })
}

fn plan_numeric_best_effort(domain: &str, control_value: &str) -> Result<ControlPlan, String> {
    let numeric: f64 = control_value
        .parse()
        .map_err(|_| format!("Invalid numeric value: {control_value}"))?;

    match domain {
        "light" => {
            let brightness = numeric as i64;
            if !(0..=100).contains(&brightness) {
                return Err(format!("Invalid brightness value: {brightness} (must be 0-100)"));
            }
            let (service, service_data) = if brightness == 0 {
                ("turn_off", None)
            } else {
                ("turn_on", Some(json!({ "brightness_pct": brightness })))
            };
            Ok(ControlPlan {
                domain: domain.to_string(),
                service: service.to_string(),
                service_data,
                new_value: brightness.to_string(),
            })
        }
        "climate" => Ok(ControlPlan {
            domain: domain.to_string(),
            service: "set_temperature".to_string(),
            service_data: Some(json!({ "temperature": numeric })),
            new_value: numeric.to_string(),
        }),
        "cover" => {
            let position = numeric as i64;
            if !(0..=100).contains(&position) {
                return Err(format!("Invalid position value: {position} (must be 0-100)"));
            }
            Ok(ControlPlan {
                domain: domain.to_string(),
                service: "set_cover_position".to_string(),
                service_data: Some(json!({ "position": position })),
                new_value: position.to_string(),
            })
        }
        "media_player" => {
            if !(0.0..=1.0).contains(&numeric) {
                return Err(format!("Invalid volume value: {numeric} (must be 0.0-1.0)"));
            }
            Ok(ControlPlan {
                domain: domain.to_string(),
                service: "volume_set".to_string(),
                service_data: Some(json!({ "volume_level": numeric })),
                new_value: numeric.to_string(),
            })
        }
        other => Err(format!("No numeric control pattern for domain: {other}")),
    }
}

pub struct HassController {
    manager: Arc<HassManager>,
}

impl std::fmt::Debug for HassController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HassController").finish_non_exhaustive()
    }
}

impl HassController {
    pub fn new(manager: Arc<HassManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl IntegrationController for HassController {
    async fn control(&self, details: &IntegrationDetails, control_value: &str) -> ControlResult {
        let entity_id = details.key.integration_name.as_str();
        debug!("HASS control: {entity_id}={control_value}");

        let plan = match plan_control(entity_id, details.payload.as_ref(), control_value) {
            Ok(plan) => plan,
            Err(message) => return ControlResult::error(message),
        };

        let Some(client) = self.manager.client().await else {
            return ControlResult::error("Home Assistant client not available");
        };

        match client
            .call_service(&plan.domain, &plan.service, entity_id, plan.service_data.clone())
            .await
        {
            Ok(_) => {
                debug!(
                    "HASS service call succeeded: {}.{} for {entity_id}",
                    plan.domain, plan.service
                );
                ControlResult::ok(plan.new_value)
            }
            Err(err) => ControlResult::error(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light_payload() -> Value {
        json!({
            "is_controllable": true,
            "domain": "light",
            "on_service": "turn_on",
            "off_service": "turn_off",
            "supports_brightness": false,
        })
    }

    #[test]
    fn light_turn_on_uses_declared_service() {
        let payload = light_payload();
        let plan = plan_control("light.kitchen", Some(&payload), "on").unwrap();
        assert_eq!(plan.domain, "light");
        assert_eq!(plan.service, "turn_on");
        assert_eq!(plan.service_data, None);
        assert_eq!(plan.new_value, "on");

        let plan = plan_control("light.kitchen", Some(&payload), "off").unwrap();
        assert_eq!(plan.service, "turn_off");
    }

    #[test]
    fn dimmer_brightness_routes_through_on_service() {
        let mut payload = light_payload();
        payload["supports_brightness"] = json!(true);

        let plan = plan_control("light.kitchen", Some(&payload), "40").unwrap();
        assert_eq!(plan.service, "turn_on");
        assert_eq!(plan.service_data, Some(json!({"brightness_pct": 40})));
        assert_eq!(plan.new_value, "40");

        // Zero percent turns the light off instead.
        let plan = plan_control("light.kitchen", Some(&payload), "0").unwrap();
        assert_eq!(plan.service, "turn_off");
        assert_eq!(plan.service_data, None);
    }

    #[test]
    fn out_of_range_brightness_fails_locally() {
        let mut payload = light_payload();
        payload["supports_brightness"] = json!(true);
        let err = plan_control("light.kitchen", Some(&payload), "150").unwrap_err();
        assert!(err.contains("brightness"));
    }

    #[test]
    fn volume_and_position_parameters_are_range_checked() {
        let volume_payload = json!({
            "is_controllable": true,
            "domain": "media_player",
            "set_service": "volume_set",
            "parameters": {"volume_level": {}},
        });
        let plan = plan_control("media_player.den", Some(&volume_payload), "0.4").unwrap();
        assert_eq!(plan.service_data, Some(json!({"volume_level": 0.4})));
        assert!(plan_control("media_player.den", Some(&volume_payload), "1.5").is_err());

        let position_payload = json!({
            "is_controllable": true,
            "domain": "cover",
            "parameters": {"position": {}},
        });
        let plan = plan_control("cover.garage", Some(&position_payload), "75").unwrap();
        assert_eq!(plan.service, "set_cover_position");
        assert_eq!(plan.service_data, Some(json!({"position": 75})));
    }

    #[test]
    fn temperature_parameter_uses_set_service() {
        let payload = json!({
            "is_controllable": true,
            "domain": "climate",
            "set_service": "set_temperature",
            "parameters": {"temperature": {}},
        });
        let plan = plan_control("climate.hall", Some(&payload), "21.5").unwrap();
        assert_eq!(plan.service, "set_temperature");
        assert_eq!(plan.service_data, Some(json!({"temperature": 21.5})));
    }

    #[test]
    fn best_effort_domain_table() {
        let plan = plan_control("cover.garage", None, "open").unwrap();
        assert_eq!(plan.service, "open_cover");
        let plan = plan_control("cover.garage", None, "close").unwrap();
        assert_eq!(plan.service, "close_cover");
        let plan = plan_control("lock.front", None, "open").unwrap();
        assert_eq!(plan.service, "unlock");
        let plan = plan_control("lock.front", None, "close").unwrap();
        assert_eq!(plan.service, "lock");
        let plan = plan_control("switch.fan", None, "on").unwrap();
        assert_eq!(plan.service, "turn_on");
        let plan = plan_control("light.hall", None, "40").unwrap();
        assert_eq!(plan.service, "turn_on");
        assert_eq!(plan.service_data, Some(json!({"brightness_pct": 40})));
        let plan = plan_control("climate.hall", None, "19").unwrap();
        assert_eq!(plan.service, "set_temperature");
    }

    #[test]
    fn unknown_values_and_domains_fail_locally() {
        assert!(plan_control("light.kitchen", None, "sparkle").is_err());
        assert!(plan_control("vacuum.robo", None, "42").is_err());
        assert!(plan_control("no-dot-entity", None, "on").is_err());
    }

    #[test]
    fn non_controllable_payload_falls_back_to_best_effort() {
        let payload = json!({ "is_controllable": false, "domain": "switch" });
        let plan = plan_control("switch.fan", Some(&payload), "on").unwrap();
        assert_eq!(plan.service, "turn_on");
    }
}
