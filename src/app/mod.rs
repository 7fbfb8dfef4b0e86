//! Core application logic for the mirror director
//!
//! This module contains the mirror-resolution engine: the topology, the
//! health monitor, the persistent resolution cache, search deduplication, the
//! tiered fallback resolver and the director composing them.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use mirror_director::app::{
//!     CacheConfig, ClientConfig, Director, HttpProbe, ResolutionCache, ResolverConfig, Topology,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let topology = Arc::new(Topology::load(Path::new("mirrors.toml")).await?);
//! let cache = ResolutionCache::open(&CacheConfig::default()).await?;
//! let probe = Arc::new(HttpProbe::new(&ClientConfig::default())?);
//!
//! let director = Director::new(topology, cache, probe, &ResolverConfig::default())?;
//! director.sync_mirrors().await?;
//!
//! let redirect = director.resolve("pool/main/a.deb", "DE", "EU").await?;
//! println!("302 {}", redirect.url);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod dedup;
pub mod director;
pub mod geo;
pub mod health;
pub mod inventory;
pub mod resolver;
pub mod signals;
pub mod topology;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main public API
pub use cache::{CacheConfig, CacheStats, FileLink, Outcome, ResolutionCache};
pub use client::{ClientConfig, HttpProbe, MirrorProbe};
pub use dedup::DedupCoordinator;
pub use director::{Director, Redirect, Resolution};
pub use geo::{GeoConfig, GeoLocator, Location, StaticGeoLocator};
pub use health::{HealthConfig, HealthMonitor, ScanReport};
pub use inventory::{
    event_channel, reconcile, reconcile_index, scan_repository, FileEvent, InventoryReport, MasterIndex,
};
pub use resolver::{FallbackResolver, ResolverConfig, SearchOutcome};
pub use signals::{create_shutdown_channel, SignalHandler};
pub use topology::{Mirror, Tier, Topology, TopologyConfig};
