//! Store Gateway (C1): the sole owner of the four persisted tables' write paths
//! (SPEC_FULL.md §3, §4.1). Every other component reads and writes through this
//! crate; there is no shared in-memory state that outlives a request.
//!
//! Persistence is SQLite via `sqlx::SqlitePool` with WAL mode enabled on connect,
//! grounded in the teacher's `data-loader::main`
//! (`SqlitePool::connect("sqlite:...?mode=rwc")` + `PRAGMA journal_mode=WAL`).
//! Schema migrations are plain `.sql` files under `migrations/`, applied with
//! `sqlx::migrate!()` at pool construction.

mod metadata;
mod pending_ops;
mod prices;
mod scores;
mod tracker;

pub use core_types::StoreError;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Cloneable handle to the row store. `SqlitePool` is `Clone + Send + Sync`, so
/// this gateway is cheaply cloned into each poller task, the same way the teacher
/// wraps its clients/engines in `Arc` for per-task sharing.
#[derive(Clone)]
pub struct StoreGateway {
    pool: SqlitePool,
}

impl StoreGateway {
    /// Opens (creating if absent) the SQLite database at `database_url`
    /// (e.g. `sqlite:ranking.db?mode=rwc` or `sqlite::memory:` for tests),
    /// enables WAL mode, and applies pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }

    /// Wraps an already-constructed pool (used by tests that want a migrated
    /// in-memory database without going through `connect`'s WAL pragma).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Migrated, WAL-less in-memory database. Exposed (not test-only) so the
    /// pollers/pipeline crates' own test suites can stand up a gateway without
    /// touching disk.
    ///
    /// Capped at a single pooled connection: each physical connection to
    /// `sqlite::memory:` is its own empty database, so a pool that hands out
    /// more than one connection scatters concurrent queries across
    /// schema-less databases. One connection keeps every caller on the same
    /// migrated database.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }
}

#[cfg(test)]
pub(crate) async fn in_memory() -> StoreGateway {
    StoreGateway::connect_in_memory().await.unwrap()
}
