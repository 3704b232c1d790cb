//! Diesel implementation of the integration repository.

use async_trait::async_trait;
use diesel::prelude::*;

use hearth_core::errors::Result;
use hearth_core::integrations::{
    AttributeValueType, Integration, IntegrationAttribute, IntegrationKey,
    IntegrationRepositoryTrait, NewIntegrationAttribute,
};

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::map_diesel_error;
use crate::schema::{integration_attributes, integrations};

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::integrations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct IntegrationDB {
    id: i64,
    integration_id: String,
    is_enabled: bool,
}

impl From<IntegrationDB> for Integration {
    fn from(row: IntegrationDB) -> Self {
        Integration {
            id: row.id,
            integration_id: row.integration_id,
            is_enabled: row.is_enabled,
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::integration_attributes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct IntegrationAttributeDB {
    id: i64,
    integration_id: String,
    name: String,
    value: String,
    value_type: String,
    is_required: bool,
    is_secret: bool,
}

impl From<IntegrationAttributeDB> for IntegrationAttribute {
    fn from(row: IntegrationAttributeDB) -> Self {
        IntegrationAttribute {
            id: row.id,
            integration_key: IntegrationKey::new(row.integration_id, row.name),
            value: row.value,
            value_type: AttributeValueType::from_str_safe(&row.value_type),
            is_required: row.is_required,
            is_secret: row.is_secret,
        }
    }
}

pub struct IntegrationRepository {
    pool: DbPool,
    writer: WriteHandle,
}

impl IntegrationRepository {
    pub fn new(pool: DbPool, writer: WriteHandle) -> Self {
        IntegrationRepository { pool, writer }
    }
}

#[async_trait]
impl IntegrationRepositoryTrait for IntegrationRepository {
    fn get_integration(&self, integration_id: &str) -> Result<Option<Integration>> {
        let mut conn = get_connection(&self.pool)?;
        integrations::table
            .filter(integrations::integration_id.eq(integration_id))
            .first::<IntegrationDB>(&mut conn)
            .optional()
            .map(|row| row.map(Integration::from))
            .map_err(map_diesel_error)
    }

    async fn set_enabled(&self, integration_id: &str, enabled: bool) -> Result<Integration> {
        let integration_id = integration_id.to_string();
        self.writer
            .exec(move |conn| {
                diesel::insert_into(integrations::table)
                    .values((
                        integrations::integration_id.eq(&integration_id),
                        integrations::is_enabled.eq(enabled),
                    ))
                    .on_conflict(integrations::integration_id)
                    .do_update()
                    .set(integrations::is_enabled.eq(enabled))
                    .execute(conn)
                    .map_err(map_diesel_error)?;
                integrations::table
                    .filter(integrations::integration_id.eq(&integration_id))
                    .first::<IntegrationDB>(conn)
                    .map(Integration::from)
                    .map_err(map_diesel_error)
            })
            .await
    }

    fn load_attributes(&self, integration_id: &str) -> Result<Vec<IntegrationAttribute>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = integration_attributes::table
            .filter(integration_attributes::integration_id.eq(integration_id))
            .order(integration_attributes::name.asc())
            .load::<IntegrationAttributeDB>(&mut conn)
            .map_err(map_diesel_error)?;
        Ok(rows.into_iter().map(IntegrationAttribute::from).collect())
    }

    async fn upsert_attributes(&self, attributes: Vec<NewIntegrationAttribute>) -> Result<()> {
        self.writer
            .exec(move |conn| {
                for attribute in &attributes {
                    diesel::insert_into(integration_attributes::table)
                        .values((
                            integration_attributes::integration_id
                                .eq(&attribute.integration_key.integration_id),
                            integration_attributes::name
                                .eq(&attribute.integration_key.integration_name),
                            integration_attributes::value.eq(&attribute.value),
                            integration_attributes::value_type.eq(attribute.value_type.as_str()),
                            integration_attributes::is_required.eq(attribute.is_required),
                            integration_attributes::is_secret.eq(attribute.is_secret),
                        ))
                        .on_conflict((
                            integration_attributes::integration_id,
                            integration_attributes::name,
                        ))
                        .do_update()
                        .set(integration_attributes::value.eq(&attribute.value))
                        .execute(conn)
                        .map_err(map_diesel_error)?;
                }
                Ok(())
            })
            .await
    }
}
