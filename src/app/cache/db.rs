//! Database connection and pool management

use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use tracing::{debug, info};

use crate::errors::CacheResult;

use super::config::CacheConfig;

/// Embedded migrations, run on every connect
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// SQLite connection pool backing the resolution cache
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max_connections: u32) -> CacheResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Connect to the database file named by the configuration
    ///
    /// Creates the file if it doesn't exist and runs migrations.
    pub async fn connect(config: &CacheConfig) -> CacheResult<Self> {
        let options = Self::base_options(config)
            .filename(&config.database_path)
            .create_if_missing(true);
        let db = Self::new(options, config.max_connections).await?;
        info!(
            "Opened resolution cache at {}",
            config.database_path.display()
        );
        Ok(db)
    }

    /// Connect to an in-memory database
    ///
    /// An in-memory database lives as long as its single connection, so the
    /// pool is capped at one.
    pub async fn connect_in_memory() -> CacheResult<Self> {
        let options = Self::base_options(&CacheConfig::default()).filename(":memory:");
        Self::new(options, 1).await
    }

    fn base_options(config: &CacheConfig) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            // Records outlive their file and mirror rows until pruned
            .foreign_keys(false)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout)
            .auto_vacuum(SqliteAutoVacuum::None)
    }

    async fn migrate(&self) -> CacheResult<()> {
        MIGRATOR.run(&self.pool).await?;
        debug!("Resolution cache schema is up to date");
        Ok(())
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}
