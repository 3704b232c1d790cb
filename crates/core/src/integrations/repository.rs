//! Repository contract for integration enablement and configuration rows.

use async_trait::async_trait;

use crate::errors::Result;

use super::model::{Integration, IntegrationAttribute, IntegrationKey};

/// Insert/update payload for a configuration attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIntegrationAttribute {
    pub integration_key: IntegrationKey,
    pub value: String,
    pub value_type: super::model::AttributeValueType,
    pub is_required: bool,
    pub is_secret: bool,
}

#[async_trait]
pub trait IntegrationRepositoryTrait: Send + Sync {
    fn get_integration(&self, integration_id: &str) -> Result<Option<Integration>>;

    async fn set_enabled(&self, integration_id: &str, enabled: bool) -> Result<Integration>;

    fn load_attributes(&self, integration_id: &str) -> Result<Vec<IntegrationAttribute>>;

    /// Upsert the given attributes in one transaction, keyed by their
    /// integration key. Values for attributes not listed are left alone.
    async fn upsert_attributes(&self, attributes: Vec<NewIntegrationAttribute>) -> Result<()>;
}
