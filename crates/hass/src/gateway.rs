//! The Home Assistant gateway capability record.

use async_trait::async_trait;
use std::sync::Arc;

use hearth_core::entities::EntityService;
use hearth_core::errors::Result;
use hearth_core::integrations::{
    IntegrationAttribute, IntegrationController, IntegrationGateway, IntegrationHealthStatus,
    IntegrationMetadata, IntegrationRepositoryTrait, ProcessingResult, ValidationResult,
};
use hearth_core::monitors::PeriodicMonitor;
use hearth_core::sensors::SensorResponseBus;
use hearth_storage_sqlite::DbPool;

use crate::controller::HassController;
use crate::manager::{HassManager, HASS_METADATA};
use crate::monitor::HassMonitor;
use crate::sync::HassSynchronizer;

#[derive(Debug)]
pub struct HassGateway {
    manager: Arc<HassManager>,
    controller: Arc<HassController>,
    monitor: Arc<HassMonitor>,
    synchronizer: HassSynchronizer,
}

impl HassGateway {
    pub fn new(
        integration_repository: Arc<dyn IntegrationRepositoryTrait>,
        entity_service: Arc<EntityService>,
        sensor_bus: Arc<SensorResponseBus>,
        pool: DbPool,
    ) -> Self {
        let manager = Arc::new(HassManager::new(integration_repository));
        let controller = Arc::new(HassController::new(Arc::clone(&manager)));
        let monitor = HassMonitor::new(Arc::clone(&manager), sensor_bus);
        let synchronizer = HassSynchronizer::new(entity_service, pool);
        Self {
            manager,
            controller,
            monitor,
            synchronizer,
        }
    }

    pub fn manager(&self) -> Arc<HassManager> {
        Arc::clone(&self.manager)
    }
}

#[async_trait]
impl IntegrationGateway for HassGateway {
    fn metadata(&self) -> &IntegrationMetadata {
        &HASS_METADATA
    }

    fn controller(&self) -> Arc<dyn IntegrationController> {
        Arc::clone(&self.controller) as Arc<dyn IntegrationController>
    }

    fn monitor(&self) -> Arc<dyn PeriodicMonitor> {
        Arc::clone(&self.monitor) as Arc<dyn PeriodicMonitor>
    }

    async fn notify_settings_changed(&self) {
        self.manager.notify_settings_changed().await;
    }

    async fn health_status(&self) -> IntegrationHealthStatus {
        self.manager.health_status()
    }

    async fn validate_configuration(
        &self,
        attributes: &[IntegrationAttribute],
    ) -> ValidationResult {
        self.manager.validate_configuration(attributes).await
    }

    async fn sync(&self) -> Result<ProcessingResult> {
        self.synchronizer.sync(&self.manager).await
    }
}
