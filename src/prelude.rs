//! Prelude module for the Mirror Director library
//!
//! This module re-exports the most commonly used items from the library,
//! so that embedding the director in an HTTP layer needs a single
//! `use mirror_director::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mirror_director::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::load(None).await?;
//!     let topology = Arc::new(Topology::load(&config.topology_path).await?);
//!     let cache = ResolutionCache::open(&config.cache).await?;
//!     let probe = Arc::new(HttpProbe::new(&config.client)?);
//!     let director = Director::new(topology, cache, probe, &config.resolver)?;
//!
//!     let redirect = director.resolve_address("pool/main/a.deb", "192.0.2.1".parse().unwrap()).await?;
//!     println!("{}", redirect.url);
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

pub use crate::app::{
    CacheConfig, ClientConfig, Director, FileEvent, GeoLocator, HealthConfig, HealthMonitor,
    HttpProbe, Location, MirrorProbe, Outcome, Redirect, ResolutionCache, ResolverConfig,
    StaticGeoLocator, Tier, Topology,
};
pub use crate::config::AppConfig;

// Standard library re-exports that are commonly needed
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;

pub use tokio;
