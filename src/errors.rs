//! Error types for the mirror director
//!
//! Errors are split by component. Only cache connectivity failures are fatal;
//! everything a mirror can do wrong is absorbed by the resolver and turned into
//! a fallback redirect.

use std::path::PathBuf;
use thiserror::Error;

/// Resolution cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// The database could not be reached or a statement failed
    #[error("Cache database error")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed at start-up
    #[error("Cache database migration failed")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The path is not part of the known file inventory
    #[error("File not found in cache: {path}")]
    FileNotFound { path: String },

    /// No registered mirror matches the name or serves the country
    #[error("Mirror not found: {what}")]
    MirrorNotFound { what: String },

    /// Mirrors exist for the country but none has a cached positive outcome
    #[error("No cached record for {path} in country {country}")]
    RecordNotFound { path: String, country: String },

    /// A previous exhaustive search found the file on no mirror
    #[error("File {path} was not found on any mirror for country {country}")]
    SkipFile { path: String, country: String },

    /// A stored row could not be decoded
    #[error("Invalid cache data: {reason}")]
    InvalidData { reason: String },
}

impl CacheError {
    /// Whether the error means the store itself is unusable
    pub fn is_fatal(&self) -> bool {
        matches!(self, CacheError::Database(_) | CacheError::Migration(_))
    }
}

/// Mirror probe and index fetch errors
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Transport-level HTTP failure
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// The mirror did not answer within the probe timeout
    #[error("Probe timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// The file URL could not be built from the mirror base URL
    #[error("Invalid URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },

    /// The mirror answered with a non-success status
    #[error("Unexpected HTTP status {status}")]
    UnexpectedStatus { status: u16 },

    /// The index artifact has no usable `!version` header
    #[error("Invalid index: {reason}")]
    InvalidIndex { reason: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Configuration file could not be read
    #[error("Failed to read configuration file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<String> },
}

/// Errors surfaced by the redirect orchestrator
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The requested path is not part of the repository
    #[error("File not found: {path}")]
    NotFound { path: String },

    /// The resolution cache is unusable
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ResolveError {
    /// Whether the process should stop serving
    pub fn is_fatal(&self) -> bool {
        match self {
            ResolveError::NotFound { .. } => false,
            ResolveError::Cache(e) => e.is_fatal(),
        }
    }
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Probe error
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Resolution error
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Probe(_) => true,
            AppError::Cache(e) | AppError::Resolve(ResolveError::Cache(e)) => !e.is_fatal(),
            AppError::Resolve(ResolveError::NotFound { .. }) => true,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Cache(_) => "cache",
            AppError::Probe(_) => "probe",
            AppError::Config(_) => "config",
            AppError::Resolve(_) => "resolve",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Probe result type alias
pub type ProbeResult<T> = std::result::Result<T, ProbeError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Resolution result type alias
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;
