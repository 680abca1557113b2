//! Database layer for runq.
//!
//! Provides PostgreSQL implementations of the queue snapshot strategies, the
//! skip-locked build claimer and the project directory, plus an in-memory
//! store implementing the same traits.

pub mod error;
pub mod memory;
pub mod repo;

pub use error::{DbError, DbResult};
pub use memory::{BuildRow, MemoryBuildsTable, MemoryPendingBuilds, MemoryStore, NewBuild};
pub use repo::*;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
