//! Persistence layer for the webhook delivery pipeline.
//!
//! Exposes `DbService`, a thin wrapper around a `SqlitePool` plus the
//! embedded migration set, and the row models under `models::*`. Every
//! state transition required by the delivery pipeline's invariants
//! (claim-for-processing CAS, append-then-update transactions) is exposed
//! as an associated function on the relevant model rather than as ad hoc
//! SQL scattered through `services`.

pub mod models;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

pub use sqlx;

/// Embedded migrations, run once at startup against whatever database URL
/// is configured.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct DbService {
    pub pool: SqlitePool,
}

impl DbService {
    /// Connect to `database_url` (e.g. `sqlite://data.db` or
    /// `sqlite::memory:`), creating the file if absent, and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// In-memory pool for tests; migrations applied immediately.
    ///
    /// `:memory:` gives every connection its own private database unless
    /// the pool is pinned to a single connection, so concurrent access
    /// (a background task racing a test's own queries) would otherwise
    /// silently land on a second, empty, unmigrated database.
    pub async fn connect_in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_run_cleanly() {
        let db = DbService::connect_in_memory().await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhook_configs")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
