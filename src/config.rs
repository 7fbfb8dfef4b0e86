//! Configuration management for the mirror director
//!
//! This module provides unified configuration management with multi-source
//! loading and zero-config defaults. Every section is optional; missing
//! fields fall back to the defaults in [`crate::constants`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::{CacheConfig, ClientConfig, GeoConfig, HealthConfig, ResolverConfig};
use crate::constants::config as paths;
use crate::errors::{ConfigError, ConfigResult};

/// Unified application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Mirror topology file
    pub topology_path: PathBuf,
    /// Resolution cache database settings
    pub cache: CacheConfig,
    /// HTTP probe settings
    pub client: ClientConfig,
    /// Health monitor settings
    pub health: HealthConfig,
    /// Fallback resolver settings
    pub resolver: ResolverConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Static geo table
    pub geo: GeoConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            topology_path: PathBuf::from(paths::DEFAULT_TOPOLOGY_FILE),
            cache: CacheConfig::default(),
            client: ClientConfig::default(),
            health: HealthConfig::default(),
            resolver: ResolverConfig::default(),
            logging: LoggingConfig::default(),
            geo: GeoConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            colored_output: true,
        }
    }
}

impl AppConfig {
    /// Load configuration with multi-source precedence:
    /// 1. Explicit config file
    /// 2. First config file found in the standard locations
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` if an explicit file doesn't exist, or a
    /// read/parse error for the file that was found
    pub async fn load(config_file_override: Option<&Path>) -> ConfigResult<Self> {
        let config_path = match config_file_override {
            Some(path) if !path.exists() => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_file(),
        };

        match config_path {
            Some(path) => Self::load_from_file(&path).await,
            None => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|path| {
            let found = path.exists();
            if found {
                debug!("Found config file: {}", path.display());
            }
            found
        })
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut search_paths = vec![PathBuf::from(".").join(paths::LOCAL_CONFIG_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join(paths::APP_DIR).join("config.toml"));
        }
        #[cfg(unix)]
        search_paths.push(PathBuf::from("/etc").join(paths::APP_DIR).join("config.toml"));
        search_paths
    }

    /// Load configuration from a TOML file
    pub async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let config: AppConfig = toml::from_str(&content)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` listing every violation
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.health.scan_interval.is_zero() {
            errors.push("health.scan_interval must be greater than 0".to_string());
        }
        if self.health.concurrency == 0 {
            errors.push("health.concurrency must be greater than 0".to_string());
        }
        if self.health.index_file.trim().is_empty() {
            errors.push("health.index_file must not be empty".to_string());
        }
        if self.client.probe_timeout.is_zero() {
            errors.push("client.probe_timeout must be greater than 0".to_string());
        }
        if self.client.connect_timeout.is_zero() {
            errors.push("client.connect_timeout must be greater than 0".to_string());
        }
        if self.client.rate_limit_rps == 0 {
            errors.push("client.rate_limit_rps must be greater than 0".to_string());
        }
        if self.cache.max_connections == 0 {
            errors.push("cache.max_connections must be greater than 0".to_string());
        }
        if let Err(e) = self.resolver.last_resort() {
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed { errors })
        }
    }
}
