//! Tiered fallback search
//!
//! Candidates are tried strictly in order: the requester's country, the rest
//! of its continent, then every other continent. The first mirror answering
//! 200 to a HEAD probe wins and is recorded as PASS. When every tier is
//! exhausted a SKIP is recorded for the requester's country and the
//! last-resort mirror is returned.
//!
//! The resolver never changes mirror health; a failed probe is only a miss.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::app::cache::{Outcome, ResolutionCache};
use crate::app::client::{normalize_base_url, resolve_link, MirrorProbe};
use crate::app::topology::{normalize_code, Mirror, Tier, Topology};
use crate::constants::resolver;
use crate::errors::{CacheError, CacheResult, ConfigError, ConfigResult};

/// Resolver settings (`[resolver]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Mirror used when no tier has the file
    pub last_resort_url: String,
    /// Consecutive failed scans after which a down mirror is probed anyway
    pub down_reprobe_after_scans: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            last_resort_url: resolver::DEFAULT_LAST_RESORT_URL.to_string(),
            down_reprobe_after_scans: resolver::DOWN_REPROBE_AFTER_SCANS,
        }
    }
}

impl ResolverConfig {
    /// Parsed last-resort base URL
    pub fn last_resort(&self) -> ConfigResult<Url> {
        normalize_base_url(&self.last_resort_url).map_err(|e| ConfigError::InvalidValue {
            field: "resolver.last_resort_url".to_string(),
            value: self.last_resort_url.clone(),
            reason: e.to_string(),
        })
    }
}

/// Result of a tiered search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// A mirror answered 200 and was recorded as PASS
    Found { tier: Tier, mirror: String, url: Url },
    /// No tier had the file; SKIP was recorded
    Exhausted { url: Url },
}

impl SearchOutcome {
    pub fn url(&self) -> &Url {
        match self {
            SearchOutcome::Found { url, .. } | SearchOutcome::Exhausted { url } => url,
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            SearchOutcome::Found { tier, .. } => *tier,
            SearchOutcome::Exhausted { .. } => Tier::LastResort,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, SearchOutcome::Found { .. })
    }
}

/// Runs tiered searches and persists their outcomes
pub struct FallbackResolver {
    topology: Arc<Topology>,
    cache: ResolutionCache,
    probe: Arc<dyn MirrorProbe>,
    last_resort: Url,
    down_reprobe_after_scans: u32,
}

impl FallbackResolver {
    /// Create a resolver
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the last-resort URL is unusable
    pub fn new(
        topology: Arc<Topology>,
        cache: ResolutionCache,
        probe: Arc<dyn MirrorProbe>,
        config: &ResolverConfig,
    ) -> ConfigResult<Self> {
        Ok(Self {
            topology,
            cache,
            probe,
            last_resort: config.last_resort()?,
            down_reprobe_after_scans: config.down_reprobe_after_scans,
        })
    }

    /// Link to `path` on the last-resort mirror
    pub fn last_resort_link(&self, path: &str) -> Url {
        resolve_link(&self.last_resort, path).unwrap_or_else(|_| self.last_resort.clone())
    }

    /// Search every tier for `path` on behalf of a requester
    ///
    /// # Errors
    ///
    /// Only fatal cache errors are returned; probe failures are misses and
    /// other cache errors are logged.
    pub async fn search(&self, path: &str, country: &str, continent: &str) -> CacheResult<SearchOutcome> {
        let country = normalize_code(country);
        let continent = normalize_code(continent);
        let required = self.required_version(path).await?;
        debug!(
            "Searching {} (version {}) for {:?}/{:?}",
            path, required, continent, country
        );

        for candidates in self.topology.tiers(&country, &continent) {
            for mirror in &candidates.mirrors {
                if !self.is_eligible(mirror, &country, required) {
                    continue;
                }
                let Some(url) = self.probe_mirror(mirror, path).await else {
                    continue;
                };

                self.record(path, Outcome::pass(mirror.name.as_str())).await?;
                info!(
                    "Found {} on {} ({} tier) for {:?}",
                    path, mirror.name, candidates.tier, country
                );
                return Ok(SearchOutcome::Found {
                    tier: candidates.tier,
                    mirror: mirror.name.clone(),
                    url,
                });
            }
        }

        self.record(path, Outcome::skip(country.as_str())).await?;
        let url = self.last_resort_link(path);
        warn!(
            "No mirror has {} for {:?}, falling back to {}",
            path, country, url
        );
        Ok(SearchOutcome::Exhausted { url })
    }

    /// Index version a mirror must publish to serve `path`
    async fn required_version(&self, path: &str) -> CacheResult<u64> {
        match self.cache.file_version(path).await {
            Ok(version) => Ok(version),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!("No version for {}: {}", path, e);
                Ok(0)
            }
        }
    }

    fn is_eligible(&self, mirror: &Mirror, country: &str, required: u64) -> bool {
        if mirror.blocks(country) {
            debug!("Skipping {}: blocks {:?}", mirror.name, country);
            return false;
        }
        if mirror.version() < required {
            debug!(
                "Skipping {}: at version {}, needs {}",
                mirror.name,
                mirror.version(),
                required
            );
            return false;
        }
        if mirror.is_down() {
            let failed = mirror.failed_scans();
            if failed < self.down_reprobe_after_scans {
                debug!("Skipping {}: down", mirror.name);
                return false;
            }
            debug!("Re-probing {} after {} failed scans", mirror.name, failed);
        }
        true
    }

    /// HEAD the file on a mirror, returning its URL on a 200
    async fn probe_mirror(&self, mirror: &Mirror, path: &str) -> Option<Url> {
        let url = match mirror.file_url(path) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot build URL of {} on {}: {}", path, mirror.name, e);
                return None;
            }
        };

        match self.probe.head(&url).await {
            Ok(200) => Some(url),
            Ok(status) => {
                debug!("{} answered {} for {}", mirror.name, status, path);
                None
            }
            Err(e) => {
                debug!("Probe of {} on {} failed: {}", path, mirror.name, e);
                None
            }
        }
    }

    async fn record(&self, path: &str, outcome: Outcome) -> CacheResult<()> {
        match self.cache.add_record(path, &outcome).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            // The file may have been removed while the search ran
            Err(e @ CacheError::FileNotFound { .. }) => {
                debug!("Not recording {:?}: {}", outcome, e);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to record {:?} for {}: {}", outcome, path, e);
                Ok(())
            }
        }
    }
}
