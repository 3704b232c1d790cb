//! Process-wide sensor response bus: latest + short-history map keyed by
//! sensor integration key, with push fan-out and short-lived control
//! overrides so the UI reflects a just-issued command before the next poll.

use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use crate::integrations::IntegrationKey;

/// How many recent responses are retained per key. At least two are needed
/// for transition UI.
pub const RESPONSE_HISTORY_LEN: usize = 5;

/// How long a control override masks the last polled value.
pub const OVERRIDE_TTL_SECS: i64 = 11;

/// Maximum number of live overrides.
pub const OVERRIDE_CAPACITY: usize = 100;

/// One reported value for one sensor. Values are always strings at the
/// bus; semantics live in the entity state's type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorResponse {
    pub integration_key: IntegrationKey,
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

/// Listener invoked with each batch of accepted responses.
pub type ResponseListener = Arc<dyn Fn(&[SensorResponse]) + Send + Sync>;

#[derive(Debug, Clone)]
struct ValueOverride {
    value: String,
    expires_at: DateTime<Utc>,
}

/// The bus itself. Cheap to clone behind an `Arc`; all methods take `&self`.
#[derive(Default)]
pub struct SensorResponseBus {
    latest: RwLock<HashMap<IntegrationKey, VecDeque<SensorResponse>>>,
    overrides: RwLock<HashMap<IntegrationKey, ValueOverride>>,
    listeners: RwLock<Vec<ResponseListener>>,
}

impl SensorResponseBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_listener(&self, listener: ResponseListener) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Replace the latest slot per key. Per-key last-write-wins by
    /// timestamp: an arrival older than the current latest is discarded, so
    /// observers always see a non-decreasing timestamp sequence per key.
    pub fn update_latest(&self, responses: HashMap<IntegrationKey, SensorResponse>) {
        let mut accepted = Vec::with_capacity(responses.len());
        {
            let mut latest = self.latest.write().unwrap();
            for (key, response) in responses {
                let ring = latest.entry(key).or_default();
                if let Some(front) = ring.front() {
                    if response.timestamp < front.timestamp {
                        debug!(
                            "Discarding stale response for {} ({} < {})",
                            response.integration_key, response.timestamp, front.timestamp
                        );
                        continue;
                    }
                }
                ring.push_front(response.clone());
                ring.truncate(RESPONSE_HISTORY_LEN);
                accepted.push(response);
            }
        }

        if accepted.is_empty() {
            return;
        }
        let listeners = self.listeners.read().unwrap().clone();
        for listener in listeners {
            listener(&accepted);
        }
    }

    /// Snapshot of all keys, most-recent first, with overrides substituted.
    pub fn latest_all(&self) -> HashMap<IntegrationKey, Vec<SensorResponse>> {
        let latest = self.latest.read().unwrap();
        let keys: Vec<IntegrationKey> = latest.keys().cloned().collect();
        drop(latest);
        self.snapshot_for(&keys)
    }

    /// Filtered snapshot for the given keys, most-recent first.
    pub fn latest_for(&self, keys: &[IntegrationKey]) -> HashMap<IntegrationKey, Vec<SensorResponse>> {
        self.snapshot_for(keys)
    }

    fn snapshot_for(&self, keys: &[IntegrationKey]) -> HashMap<IntegrationKey, Vec<SensorResponse>> {
        let now = Utc::now();
        let latest = self.latest.read().unwrap();
        let overrides = self.overrides.read().unwrap();

        let mut result = HashMap::with_capacity(keys.len());
        for key in keys {
            let mut responses: Vec<SensorResponse> =
                latest.get(key).map(|ring| ring.iter().cloned().collect()).unwrap_or_default();

            if let Some(value_override) = overrides.get(key) {
                if value_override.expires_at > now {
                    match responses.first_mut() {
                        // Timestamp and key preserved: only the value is masked.
                        Some(front) => front.value = value_override.value.clone(),
                        None => responses.push(SensorResponse {
                            integration_key: key.clone(),
                            value: value_override.value.clone(),
                            timestamp: value_override.expires_at
                                - Duration::seconds(OVERRIDE_TTL_SECS),
                        }),
                    }
                }
            }

            if !responses.is_empty() {
                result.insert(key.clone(), responses);
            }
        }
        result
    }

    /// Install a short-lived override so reads reflect a just-issued
    /// control command before the next poll arrives.
    pub fn add_override(&self, key: IntegrationKey, value: impl Into<String>) {
        let now = Utc::now();
        let mut overrides = self.overrides.write().unwrap();

        overrides.retain(|_, v| v.expires_at > now);
        if overrides.len() >= OVERRIDE_CAPACITY {
            // Evict the override closest to expiry to stay within capacity.
            if let Some(oldest) = overrides
                .iter()
                .min_by_key(|(_, v)| v.expires_at)
                .map(|(k, _)| k.clone())
            {
                overrides.remove(&oldest);
            }
        }
        overrides.insert(
            key,
            ValueOverride {
                value: value.into(),
                expires_at: now + Duration::seconds(OVERRIDE_TTL_SECS),
            },
        );
    }

    /// Drop all overrides. Called on integration manager reload.
    pub fn clear_overrides(&self) {
        self.overrides.write().unwrap().clear();
    }

    #[cfg(test)]
    fn expire_override_now(&self, key: &IntegrationKey) {
        if let Some(v) = self.overrides.write().unwrap().get_mut(key) {
            v.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(name: &str) -> IntegrationKey {
        IntegrationKey::new("hass", name)
    }

    fn response(name: &str, value: &str, offset_secs: i64) -> SensorResponse {
        SensorResponse {
            integration_key: key(name),
            value: value.to_string(),
            timestamp: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn latest_is_most_recent_first_and_ring_is_bounded() {
        let bus = SensorResponseBus::new();
        for i in 0..8 {
            bus.update_latest(HashMap::from([(
                key("sensor.temp"),
                response("sensor.temp", &format!("{i}"), i),
            )]));
        }
        let snapshot = bus.latest_for(&[key("sensor.temp")]);
        let responses = &snapshot[&key("sensor.temp")];
        assert_eq!(responses.len(), RESPONSE_HISTORY_LEN);
        assert_eq!(responses[0].value, "7");
        assert_eq!(responses[1].value, "6");
    }

    #[test]
    fn stale_arrivals_are_discarded_keeping_timestamps_monotonic() {
        let bus = SensorResponseBus::new();
        bus.update_latest(HashMap::from([(
            key("s"),
            response("s", "new", 10),
        )]));
        bus.update_latest(HashMap::from([(key("s"), response("s", "old", 0))]));

        let snapshot = bus.latest_for(&[key("s")]);
        let responses = &snapshot[&key("s")];
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].value, "new");
    }

    #[test]
    fn override_masks_latest_value_until_expiry() {
        let bus = SensorResponseBus::new();
        bus.update_latest(HashMap::from([(key("light"), response("light", "off", 0))]));
        let polled_at = bus.latest_for(&[key("light")])[&key("light")][0].timestamp;

        bus.add_override(key("light"), "on");
        let masked = bus.latest_for(&[key("light")]);
        assert_eq!(masked[&key("light")][0].value, "on");
        assert_eq!(masked[&key("light")][0].timestamp, polled_at);

        bus.expire_override_now(&key("light"));
        let unmasked = bus.latest_for(&[key("light")]);
        assert_eq!(unmasked[&key("light")][0].value, "off");
    }

    #[test]
    fn clear_overrides_restores_polled_values() {
        let bus = SensorResponseBus::new();
        bus.update_latest(HashMap::from([(key("sw"), response("sw", "off", 0))]));
        bus.add_override(key("sw"), "on");
        bus.clear_overrides();
        assert_eq!(bus.latest_for(&[key("sw")])[&key("sw")][0].value, "off");
    }

    #[test]
    fn override_capacity_evicts_oldest() {
        let bus = SensorResponseBus::new();
        for i in 0..OVERRIDE_CAPACITY + 1 {
            bus.add_override(key(&format!("k{i}")), "v");
        }
        assert!(bus.overrides.read().unwrap().len() <= OVERRIDE_CAPACITY);
    }

    #[test]
    fn listeners_receive_accepted_responses() {
        let bus = SensorResponseBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.register_listener(Arc::new(move |batch| {
            seen_clone.fetch_add(batch.len(), Ordering::SeqCst);
        }));

        bus.update_latest(HashMap::from([
            (key("a"), response("a", "1", 0)),
            (key("b"), response("b", "2", 0)),
        ]));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
