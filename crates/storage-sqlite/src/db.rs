//! Connection pool construction, embedded migrations and the serialized
//! write handle all mutations go through.

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use hearth_core::errors::{Error, Result, StorageError};

use crate::errors::{map_pool_error, TxError};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Arc<Pool<ConnectionManager<SqliteConnection>>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// SQLite works best for this workload with WAL and a busy timeout; foreign
/// keys are off by default and every cascade in the schema relies on them.
#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

pub fn create_pool(database_url: &str) -> Result<DbPool> {
    create_pool_with_size(database_url, 8)
}

/// An in-memory database only exists on its own connection, so tests pin
/// the pool to a single connection.
pub fn create_pool_with_size(database_url: &str, max_size: u32) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(5))
        .connection_customizer(Box::new(SqlitePragmas))
        .build(manager)
        .map_err(|e| Error::Storage(StorageError::Unavailable(e.to_string())))?;
    Ok(Arc::new(pool))
}

pub fn get_connection(pool: &DbPool) -> Result<DbConnection> {
    pool.get().map_err(map_pool_error)
}

pub fn run_migrations(pool: &DbPool) -> Result<()> {
    let mut conn = get_connection(pool)?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| Error::Storage(StorageError::Query(format!("Migration failed: {e}"))))?;
    if !applied.is_empty() {
        info!("Applied {} database migration(s)", applied.len());
    }
    Ok(())
}

/// Serializes all writes onto one connection at a time and runs each write
/// closure inside an immediate transaction on the blocking thread pool.
#[derive(Clone)]
pub struct WriteHandle {
    pool: DbPool,
    write_lock: Arc<Mutex<()>>,
}

impl WriteHandle {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run `f` inside a transaction. The closure's whole effect commits or
    /// rolls back atomically; the caller sees the result after commit.
    pub async fn exec<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let mut conn = get_connection(&pool)?;
            conn.immediate_transaction::<_, TxError, _>(|conn| f(conn).map_err(TxError::from))
                .map_err(|TxError(err)| err)
        })
        .await
        .map_err(|e| Error::Runtime(format!("Write task failed: {e}")))?
    }
}
