//! Process-wide service wiring: every long-lived service is constructed
//! here once and injected into the tasks that use it.

use std::sync::Arc;

use hearth_core::entities::{DelegationService, EntityService};
use hearth_core::integrations::{IntegrationGateway, IntegrationRegistry, IntegrationService};
use hearth_core::monitors::MonitorManager;
use hearth_core::sensors::SensorResponseBus;
use hearth_core::weather::WeatherService;
use hearth_hass::HassGateway;
use hearth_storage_sqlite::{
    create_pool, run_migrations, DbPool, EntityRepository, IntegrationRepository, WriteHandle,
};
use hearth_weather::{SunriseSunsetOrgSource, UsnoSource, WeatherSourceMonitor};

use crate::config::ServerConfig;

/// Several services exist solely for the presentation handlers, which a
/// separate crate mounts on top of this context.
pub struct ServiceContext {
    #[allow(dead_code)]
    pub pool: DbPool,
    #[allow(dead_code)]
    pub entity_service: Arc<EntityService>,
    #[allow(dead_code)]
    pub delegation_service: Arc<DelegationService>,
    #[allow(dead_code)]
    pub sensor_bus: Arc<SensorResponseBus>,
    pub weather_service: Arc<WeatherService>,
    pub integration_registry: Arc<IntegrationRegistry>,
    #[allow(dead_code)]
    pub integration_service: Arc<IntegrationService>,
    pub monitor_manager: Arc<MonitorManager>,
}

impl ServiceContext {
    pub fn build(config: &ServerConfig) -> anyhow::Result<Self> {
        let pool = create_pool(&config.database_url)?;
        run_migrations(&pool)?;
        let writer = WriteHandle::new(Arc::clone(&pool));

        let entity_repository = Arc::new(EntityRepository::new(
            Arc::clone(&pool),
            writer.clone(),
        ));
        let integration_repository = Arc::new(IntegrationRepository::new(
            Arc::clone(&pool),
            writer.clone(),
        ));

        let entity_service = Arc::new(EntityService::new(entity_repository.clone()));
        let delegation_service = Arc::new(DelegationService::new(entity_repository));
        let sensor_bus = Arc::new(SensorResponseBus::new());
        let weather_service = Arc::new(WeatherService::new(config.timezone));

        let hass_gateway = Arc::new(HassGateway::new(
            integration_repository.clone(),
            Arc::clone(&entity_service),
            Arc::clone(&sensor_bus),
            Arc::clone(&pool),
        ));

        let mut registry = IntegrationRegistry::new();
        registry.register(hass_gateway.clone());
        let registry = Arc::new(registry);

        let integration_service = Arc::new(IntegrationService::new(
            Arc::clone(&registry),
            integration_repository,
            Arc::clone(&entity_service),
            Arc::clone(&sensor_bus),
        ));

        let monitor_manager = Arc::new(MonitorManager::new(config.suppress_monitors));

        Ok(Self {
            pool,
            entity_service,
            delegation_service,
            sensor_bus,
            weather_service,
            integration_registry: registry,
            integration_service,
            monitor_manager,
        })
    }

    /// Start every monitor: one per registered integration gateway plus
    /// one per weather data source.
    pub fn start_monitors(&self, config: &ServerConfig) -> anyhow::Result<()> {
        for gateway in self.integration_registry.all() {
            self.monitor_manager.register(gateway.monitor());
        }

        match config.location {
            Some(location) => {
                let sunrise_sunset =
                    Arc::new(SunriseSunsetOrgSource::new(location, config.timezone)?);
                let usno = Arc::new(UsnoSource::new(location, config.timezone)?);
                self.monitor_manager.register(WeatherSourceMonitor::new(
                    sunrise_sunset,
                    Arc::clone(&self.weather_service),
                ));
                self.monitor_manager.register(WeatherSourceMonitor::new(
                    usno,
                    Arc::clone(&self.weather_service),
                ));
            }
            None => {
                log::warn!(
                    "No geographic location configured; weather data sources not started"
                );
            }
        }
        Ok(())
    }
}
