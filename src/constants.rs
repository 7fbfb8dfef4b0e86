//! Application constants for the mirror director
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain.

use std::time::Duration;

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all mirror probes
    pub const USER_AGENT: &str = concat!("mirror-director/", env!("CARGO_PKG_VERSION"));

    /// Upper bound for a single liveness probe or index fetch
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum idle connections kept per mirror host
    pub const POOL_MAX_PER_HOST: usize = 8;

    /// Process-wide probe rate (requests per second)
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 50;
}

/// Mirror health monitoring
pub mod health {
    use super::Duration;

    /// Interval between two health sweeps
    pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(300);

    /// Index artifact fetched from every mirror
    pub const DEFAULT_INDEX_FILE: &str = "index.db";

    /// Header marker carrying the index version
    pub const VERSION_MARKER: &str = "!version";

    /// Mirrors probed concurrently within one sweep
    pub const DEFAULT_SCAN_CONCURRENCY: usize = 8;
}

/// Fallback resolution
pub mod resolver {
    /// Redirect target when no mirror is known to hold a file
    pub const DEFAULT_LAST_RESORT_URL: &str = "https://mirror.parrot.sh/mirrors/parrot";

    /// Consecutive failed scans after which a down mirror is probed anyway
    pub const DOWN_REPROBE_AFTER_SCANS: u32 = 3;

    /// Placeholder location for requesters the geo lookup cannot place
    pub const UNKNOWN_LOCATION: &str = "";
}

/// Resolution cache database
pub mod cache {
    use super::Duration;

    /// Default database file name
    pub const DEFAULT_DATABASE_FILE: &str = "cache.db";

    /// Pooled connections to the cache database
    pub const MAX_CONNECTIONS: u32 = 5;

    /// How long a writer waits on a locked database
    pub const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);

    /// Separator for blocked country lists stored in the mirrors table
    pub const BLOCKED_COUNTRY_SEPARATOR: &str = ",";
}

/// File inventory and event handling
pub mod inventory {
    /// Buffer of the file event channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
}

/// Configuration file locations
pub mod config {
    /// Project-local configuration file name
    pub const LOCAL_CONFIG_FILE: &str = "mirror-director.toml";

    /// Application directory under the user config dir
    pub const APP_DIR: &str = "mirror-director";

    /// Default topology file name
    pub const DEFAULT_TOPOLOGY_FILE: &str = "mirrors.toml";
}

// Re-export commonly used constants for convenience
pub use health::{DEFAULT_INDEX_FILE, DEFAULT_SCAN_INTERVAL};
pub use http::{PROBE_TIMEOUT, USER_AGENT};
pub use resolver::DEFAULT_LAST_RESORT_URL;
