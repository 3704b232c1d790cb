//! Polling monitor: fetches the remote state list every cycle and pushes
//! the values onto the sensor response bus.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hearth_core::errors::Result;
use hearth_core::monitors::{HealthTracker, PeriodicMonitor};
use hearth_core::sensors::{SensorResponse, SensorResponseBus};

use crate::converter;
use crate::manager::HassManager;
use crate::models::HassApi;

pub const HASS_MONITOR_ID: &str = "hass-monitor";
pub const HASS_POLLING_INTERVAL_SECS: u64 = 2;
const API_SOURCE_ID: &str = "hass-api";

pub struct HassMonitor {
    manager: Arc<HassManager>,
    sensor_bus: Arc<SensorResponseBus>,
    health: HealthTracker,
    needs_reinit: AtomicBool,
}

impl std::fmt::Debug for HassMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HassMonitor").finish_non_exhaustive()
    }
}

impl HassMonitor {
    pub fn new(manager: Arc<HassManager>, sensor_bus: Arc<SensorResponseBus>) -> Arc<Self> {
        let monitor = Arc::new(Self {
            manager,
            sensor_bus,
            health: HealthTracker::new(),
            needs_reinit: AtomicBool::new(true),
        });

        // Settings changes mark the monitor for reinitialization on its
        // next cycle; the manager reload already happened by then.
        let flag = Arc::downgrade(&monitor);
        monitor.manager.register_change_listener(Arc::new(move || {
            if let Some(monitor) = flag.upgrade() {
                monitor.needs_reinit.store(true, Ordering::SeqCst);
                debug!("HassMonitor will reinitialize with new settings on next cycle");
            }
        }));
        monitor
    }
}

#[async_trait]
impl PeriodicMonitor for HassMonitor {
    fn id(&self) -> &str {
        HASS_MONITOR_ID
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(HASS_POLLING_INTERVAL_SECS)
    }

    fn health(&self) -> &HealthTracker {
        &self.health
    }

    async fn initialize(&self) -> Result<()> {
        self.health
            .register_api_source(API_SOURCE_ID, "Home Assistant API");
        Ok(())
    }

    async fn do_work(&self) -> Result<()> {
        if self.needs_reinit.swap(false, Ordering::SeqCst) {
            self.manager.reload().await;
        }

        if self.manager.client().await.is_none() {
            // Disabled or mid-rebuild; nothing to poll this cycle.
            debug!("Home Assistant client not available, skipping poll cycle");
            return Ok(());
        }

        let started = Instant::now();
        let states = match self.manager.fetch_states().await {
            Ok(states) => {
                self.health.track_api_call(
                    API_SOURCE_ID,
                    true,
                    Some(started.elapsed().as_secs_f64()),
                );
                states
            }
            Err(err) => {
                self.health.track_api_call(
                    API_SOURCE_ID,
                    false,
                    Some(started.elapsed().as_secs_f64()),
                );
                return Err(err);
            }
        };
        debug!("Fetched {} Home Assistant states", states.len());

        let now = Utc::now();
        let mut responses = HashMap::new();
        for state in states.values() {
            if HassApi::IGNORE_DOMAINS.contains(&state.domain.as_str()) {
                continue;
            }
            let Some(value) = converter::sensor_value_str(state) else {
                continue;
            };
            let key = converter::state_to_integration_key(state);
            responses.insert(
                key.clone(),
                SensorResponse {
                    integration_key: key,
                    value,
                    timestamp: now,
                },
            );
        }

        if responses.is_empty() {
            warn!("Poll produced no sensor responses");
        }
        self.sensor_bus.update_latest(responses);
        Ok(())
    }
}
