//! Cache configuration types and defaults

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::cache;

/// Configuration for the resolution cache database
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite database file, created if missing
    pub database_path: PathBuf,
    /// Pooled connections
    pub max_connections: u32,
    /// How long a statement waits on a locked database
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(cache::DEFAULT_DATABASE_FILE),
            max_connections: cache::MAX_CONNECTIONS,
            busy_timeout: cache::BUSY_TIMEOUT,
        }
    }
}

impl CacheConfig {
    /// Create a configuration for a custom database file
    pub fn with_database_path(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Default::default()
        }
    }

    /// Set the connection pool size
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }
}
