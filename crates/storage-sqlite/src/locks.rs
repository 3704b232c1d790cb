//! Database-backed named exclusion lock.
//!
//! The sync engine takes one of these so only one synchronization runs at a
//! time per integration, across every process sharing the database.
//! Contention is rejected rather than queued.

use chrono::Utc;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use log::warn;

use hearth_core::errors::{Error, Result};

use crate::db::{get_connection, DbPool};
use crate::errors::map_diesel_error;
use crate::schema::database_locks;

/// Guard for a named lock row. Dropping it releases the lock.
pub struct ExclusionLock {
    pool: DbPool,
    name: String,
}

impl ExclusionLock {
    /// Acquire the lock or fail immediately when another holder exists.
    pub fn try_acquire(pool: DbPool, name: &str) -> Result<Self> {
        let mut conn = get_connection(&pool)?;
        let inserted = diesel::insert_into(database_locks::table)
            .values((
                database_locks::name.eq(name),
                database_locks::acquired_at.eq(Utc::now()),
            ))
            .execute(&mut conn);

        match inserted {
            Ok(_) => Ok(Self {
                pool,
                name: name.to_string(),
            }),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Err(
                Error::Runtime(format!("Lock '{name}' is already held")),
            ),
            Err(other) => Err(map_diesel_error(other)),
        }
    }
}

impl Drop for ExclusionLock {
    fn drop(&mut self) {
        let released = get_connection(&self.pool).and_then(|mut conn| {
            diesel::delete(database_locks::table.filter(database_locks::name.eq(&self.name)))
                .execute(&mut conn)
                .map_err(map_diesel_error)
        });
        if let Err(err) = released {
            warn!("Failed to release lock '{}': {err}", self.name);
        }
    }
}
