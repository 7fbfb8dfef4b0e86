//! Persistent resolution cache
//!
//! The cache remembers which mirror held which file (PASS) and which searches
//! came up empty for a country (SKIP), so that a request only touches the
//! network when nothing usable is cached.
//!
//! # Module Organization
//!
//! - [`config`] - Configuration types and defaults
//! - [`db`] - SQLite pool and embedded migrations
//! - [`models`] - Outcome and row types
//! - [`stats`] - Row count statistics
//! - [`manager`] - Cache operations
//!
//! # Examples
//!
//! ```rust,no_run
//! use mirror_director::app::cache::{Outcome, ResolutionCache};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = ResolutionCache::in_memory().await?;
//! cache.add_file("pool/main/a.deb").await?;
//!
//! match cache.get_file_link("pool/main/a.deb", "DE").await {
//!     Ok(link) => println!("Redirect to {}", link.url),
//!     Err(e) => println!("Not cached: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod manager;
pub mod models;
pub mod stats;

// Re-export main public API
pub use config::CacheConfig;
pub use db::Database;
pub use manager::ResolutionCache;
pub use models::{FileLink, MirrorRow, Outcome};
pub use stats::CacheStats;
