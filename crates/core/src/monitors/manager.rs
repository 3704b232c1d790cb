//! Lifecycle owner for all periodic monitors in the process.

use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::health::MonitorHealthStatus;
use super::periodic::{spawn_monitor, MonitorHandle, PeriodicMonitor};

struct RegisteredMonitor {
    monitor: Arc<dyn PeriodicMonitor>,
    handle: Option<MonitorHandle>,
}

/// Instantiates and starts each integration's monitor exactly once and
/// exposes read-only health snapshots. When the suppress flag is set
/// (tests/dev), monitors are registered but never started.
pub struct MonitorManager {
    monitors: Mutex<HashMap<String, RegisteredMonitor>>,
    suppress_monitors: bool,
}

impl MonitorManager {
    pub fn new(suppress_monitors: bool) -> Self {
        Self {
            monitors: Mutex::new(HashMap::new()),
            suppress_monitors,
        }
    }

    /// Register and (unless suppressed) start a monitor. Registering the
    /// same monitor id twice is a no-op.
    pub fn register(&self, monitor: Arc<dyn PeriodicMonitor>) {
        let id = monitor.id().to_string();
        let mut monitors = self.monitors.lock().unwrap();
        if monitors.contains_key(&id) {
            debug!("Monitor {id} already registered, skipping");
            return;
        }

        let handle = if self.suppress_monitors {
            debug!("Monitor suppression enabled, not starting {id}");
            None
        } else {
            info!("Starting monitor: {id}");
            Some(spawn_monitor(Arc::clone(&monitor)))
        };

        monitors.insert(id, RegisteredMonitor { monitor, handle });
    }

    /// Health snapshots for every registered monitor, keyed by monitor id.
    pub fn health_snapshots(&self) -> Vec<(String, MonitorHealthStatus)> {
        let monitors = self.monitors.lock().unwrap();
        monitors
            .iter()
            .map(|(id, reg)| (id.clone(), reg.monitor.health().snapshot()))
            .collect()
    }

    pub fn health_for(&self, monitor_id: &str) -> Option<MonitorHealthStatus> {
        let monitors = self.monitors.lock().unwrap();
        monitors
            .get(monitor_id)
            .map(|reg| reg.monitor.health().snapshot())
    }

    /// Request cancellation of all running monitors. Each honors it within
    /// one interval plus one in-flight remote call.
    pub fn shutdown(&self) {
        info!("Stopping all registered monitors");
        let monitors = self.monitors.lock().unwrap();
        for (id, reg) in monitors.iter() {
            if let Some(handle) = &reg.handle {
                debug!("Cancelling monitor: {id}");
                handle.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;
    use crate::monitors::HealthTracker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct NoopMonitor {
        id: String,
        health: HealthTracker,
        starts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl PeriodicMonitor for NoopMonitor {
        fn id(&self) -> &str {
            &self.id
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        fn health(&self) -> &HealthTracker {
            &self.health
        }

        async fn do_work(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn suppressed_manager_registers_without_starting() {
        let manager = MonitorManager::new(true);
        let starts = Arc::new(AtomicU32::new(0));
        manager.register(Arc::new(NoopMonitor {
            id: "m1".into(),
            health: HealthTracker::new(),
            starts: Arc::clone(&starts),
        }));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 0);
        assert_eq!(manager.health_snapshots().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_registration_starts_once() {
        let manager = MonitorManager::new(false);
        let starts = Arc::new(AtomicU32::new(0));
        let make = |starts: Arc<AtomicU32>| {
            Arc::new(NoopMonitor {
                id: "m1".into(),
                health: HealthTracker::new(),
                starts,
            })
        };
        manager.register(make(Arc::clone(&starts)));
        manager.register(make(Arc::clone(&starts)));

        tokio::time::sleep(Duration::from_millis(40)).await;
        manager.shutdown();
        let after_shutdown = starts.load(Ordering::SeqCst);
        assert!(after_shutdown >= 1);

        // Only one task was driving work: a second registration would have
        // roughly doubled the cycle count.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(starts.load(Ordering::SeqCst) <= after_shutdown + 1);
    }
}
