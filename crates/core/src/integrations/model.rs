//! Transient models shared by all integrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::Error;

/// Cross-reference between a local model row and an external object.
/// Opaque to the core; stable for the lifetime of the remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntegrationKey {
    pub integration_id: String,
    pub integration_name: String,
}

impl IntegrationKey {
    pub fn new(integration_id: impl Into<String>, integration_name: impl Into<String>) -> Self {
        Self {
            integration_id: integration_id.into(),
            integration_name: integration_name.into(),
        }
    }
}

impl fmt::Display for IntegrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.integration_id, self.integration_name)
    }
}

impl FromStr for IntegrationKey {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (id, name) = raw
            .split_once(':')
            .ok_or_else(|| Error::bad_input(format!("Malformed integration key: {raw}")))?;
        if id.is_empty() || name.is_empty() {
            return Err(Error::bad_input(format!("Malformed integration key: {raw}")));
        }
        Ok(Self::new(id, name))
    }
}

/// Control target: the key plus the controller's opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationDetails {
    pub key: IntegrationKey,
    pub payload: Option<serde_json::Value>,
}

impl IntegrationDetails {
    pub fn new(key: IntegrationKey, payload: Option<serde_json::Value>) -> Self {
        Self { key, payload }
    }
}

/// Outcome of a control dispatch. `new_value` is the value the UI should
/// reflect; failures populate `errors` and leave it unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlResult {
    pub new_value: Option<String>,
    pub errors: Vec<String>,
}

impl ControlResult {
    pub fn ok(new_value: impl Into<String>) -> Self {
        Self {
            new_value: Some(new_value.into()),
            errors: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            new_value: None,
            errors: vec![message.into()],
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.new_value.is_some()
    }
}

/// Accumulated outcome of a batch operation such as a sync run. Per-item
/// issues land in `errors` instead of aborting the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub title: String,
    pub messages: Vec<String>,
    pub errors: Vec<String>,
}

impl ProcessingResult {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            messages: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// Health classification of one integration's manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationHealthStatusType {
    Healthy,
    Disabled,
    ConfigError,
    ConnectionError,
    TemporaryError,
    Unknown,
}

impl IntegrationHealthStatusType {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigError | Self::ConnectionError | Self::TemporaryError
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Disabled => "Disabled",
            Self::ConfigError => "Configuration Error",
            Self::ConnectionError => "Connection Error",
            Self::TemporaryError => "Temporary Error",
            Self::Unknown => "Unknown",
        }
    }
}

/// Health snapshot exposed by an integration manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationHealthStatus {
    pub status: IntegrationHealthStatusType,
    pub last_check: DateTime<Utc>,
    pub error_message: Option<String>,
    pub error_count: u32,
}

impl IntegrationHealthStatus {
    pub fn unknown() -> Self {
        Self {
            status: IntegrationHealthStatusType::Unknown,
            last_check: Utc::now(),
            error_message: None,
            error_count: 0,
        }
    }

    /// Transition to a new status, counting consecutive errors and
    /// resetting the count on any non-error status.
    pub fn transition(&mut self, status: IntegrationHealthStatusType, error_message: Option<String>) {
        self.error_count = if status.is_error() {
            self.error_count + 1
        } else {
            0
        };
        self.status = status;
        self.last_check = Utc::now();
        self.error_message = error_message;
    }
}

/// Result of validating a candidate integration configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub status: IntegrationHealthStatusType,
    pub error_message: Option<String>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            is_valid: true,
            status: IntegrationHealthStatusType::Healthy,
            error_message: None,
        }
    }

    pub fn error(status: IntegrationHealthStatusType, message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            status,
            error_message: Some(message.into()),
        }
    }
}

/// Categorize a remote-probe failure message into a health status using
/// keyword symptoms. Auth and connectivity symptoms both surface as
/// connection errors; anything else is treated as temporary.
pub fn classify_probe_error(message: &str) -> IntegrationHealthStatusType {
    const AUTH_KEYWORDS: [&str; 5] = ["auth", "unauthorized", "forbidden", "token", "credential"];
    const NETWORK_KEYWORDS: [&str; 5] = ["connect", "network", "timeout", "unreachable", "resolve"];

    let lowered = message.to_lowercase();
    if AUTH_KEYWORDS.iter().any(|kw| lowered.contains(kw))
        || NETWORK_KEYWORDS.iter().any(|kw| lowered.contains(kw))
    {
        IntegrationHealthStatusType::ConnectionError
    } else {
        IntegrationHealthStatusType::TemporaryError
    }
}

/// Value kinds an integration configuration attribute can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValueType {
    Text,
    Boolean,
    Integer,
}

impl AttributeValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
        }
    }

    pub fn from_str_safe(value: &str) -> Self {
        match value {
            "boolean" => Self::Boolean,
            "integer" => Self::Integer,
            _ => Self::Text,
        }
    }
}

/// Declaration of one configuration attribute an integration accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationAttributeSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub value_type: AttributeValueType,
    pub is_required: bool,
    pub is_secret: bool,
}

/// Persisted configuration attribute value for an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationAttribute {
    pub id: i64,
    pub integration_key: IntegrationKey,
    pub value: String,
    pub value_type: AttributeValueType,
    pub is_required: bool,
    pub is_secret: bool,
}

impl IntegrationAttribute {
    pub fn bool_value(&self) -> bool {
        matches!(
            self.value.trim().to_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        )
    }
}

/// Persisted enablement row for an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub id: i64,
    pub integration_id: String,
    pub is_enabled: bool,
}

/// Static descriptor an integration publishes about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationMetadata {
    pub integration_id: &'static str,
    pub label: &'static str,
    pub attribute_specs: &'static [IntegrationAttributeSpec],
}
