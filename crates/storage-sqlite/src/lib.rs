//! SQLite persistence for the hub core, implementing the repository traits
//! declared in `hearth-core` with diesel over an r2d2 pool.

pub mod db;
pub mod entities;
pub mod errors;
pub mod integrations;
pub mod locks;
pub mod schema;

#[cfg(test)]
mod tests;

pub use db::{create_pool, create_pool_with_size, get_connection, run_migrations, DbPool, WriteHandle};
pub use entities::EntityRepository;
pub use integrations::IntegrationRepository;
pub use locks::ExclusionLock;
