//! REST client for the Home Assistant API.
//!
//! Docs: <https://developers.home-assistant.io/docs/api/rest/>

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;

use hearth_core::errors::{Error, Result};

use crate::models::HassState;

/// Short timeout appropriate for 2-second polling.
pub const HASS_API_TIMEOUT_SECS: u64 = 10;

fn map_reqwest_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Connection(format!("Request timeout: {err}"))
    } else if err.is_connect() {
        Error::Connection(format!("Cannot connect: {err}"))
    } else {
        Error::Temporary(format!("Request failed: {err}"))
    }
}

fn map_status_error(status: reqwest::StatusCode, body: &str) -> Error {
    let preview: String = body.chars().take(256).collect();
    match status.as_u16() {
        401 | 403 => Error::Connection(format!("Unauthorized ({status}): {preview}")),
        _ => Error::Temporary(format!("HTTP {status}: {preview}")),
    }
}

#[derive(Debug)]
pub struct HassClient {
    client: reqwest::Client,
    base_url: String,
}

impl HassClient {
    /// Build a client for `base_url` with the given long-lived token. The
    /// trailing slash is normalized off.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::attribute("API token contains invalid header characters"))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HASS_API_TIMEOUT_SECS))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the flat list of remote states.
    pub async fn states(&self) -> Result<Vec<HassState>> {
        let url = format!("{}/api/states", self.base_url);
        let response = self.client.get(&url).send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, &body));
        }

        let raw: Vec<Value> = response.json().await.map_err(map_reqwest_error)?;
        debug!("Fetched {} states from Home Assistant", raw.len());
        Ok(raw.into_iter().filter_map(HassState::from_api).collect())
    }

    /// Set a state directly. Updates the remote's internal state but may
    /// not control physical devices; prefer `call_service`.
    pub async fn set_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}/api/states/{entity_id}", self.base_url);
        let mut body = serde_json::json!({ "state": state });
        if let Some(attributes) = attributes {
            body["attributes"] = attributes;
        }

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, &body));
        }
        response.json().await.map_err(map_reqwest_error)
    }

    /// Invoke a service against one entity, the recommended control path.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        entity_id: &str,
        service_data: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}/api/services/{domain}/{service}", self.base_url);
        let mut body = serde_json::json!({ "entity_id": entity_id });
        if let Some(Value::Object(extra)) = service_data {
            for (key, value) in extra {
                body[key] = value;
            }
        }
        debug!("Calling service {domain}.{service} for {entity_id}");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, &body));
        }
        response.json().await.map_err(map_reqwest_error)
    }
}
