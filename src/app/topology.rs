//! Mirror topology: continents → countries → mirrors
//!
//! The topology is loaded once from a TOML file and shared read-only by every
//! request. The only mutable part is each mirror's [`MirrorHealth`], which is
//! written exclusively by the health monitor through atomics.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::app::client::{normalize_base_url, resolve_link};
use crate::errors::{ConfigError, ConfigResult, ProbeResult};

/// Topology file layout
///
/// ```toml
/// [continents.EU.DE]
/// mirrors = [
///     { name = "eu-de", url = "https://eu-de.example", blocked_countries = ["RU"] },
/// ]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Continent code → country code → country entry
    #[serde(default)]
    pub continents: BTreeMap<String, BTreeMap<String, CountryConfig>>,
}

/// Mirrors registered under one country
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountryConfig {
    #[serde(default)]
    pub mirrors: Vec<MirrorConfig>,
}

/// One mirror entry of the topology file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub blocked_countries: Vec<String>,
}

/// Geographic fallback level a mirror was found at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Mirrors in the requester's own country
    Country,
    /// Other countries of the requester's continent
    Continent,
    /// Every other continent
    Global,
    /// The fixed last-resort mirror
    LastResort,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Country => "country",
            Tier::Continent => "continent",
            Tier::Global => "global",
            Tier::LastResort => "last-resort",
        };
        f.write_str(name)
    }
}

/// Live health state of a mirror
#[derive(Debug, Default)]
pub struct MirrorHealth {
    version: AtomicU64,
    down: AtomicBool,
    failed_scans: AtomicU32,
    last_scan_millis: AtomicI64,
}

/// Point-in-time copy of a mirror's health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub version: u64,
    pub is_down: bool,
    pub failed_scans: u32,
    pub last_scanned_at: Option<DateTime<Utc>>,
}

/// A mirror of the network
#[derive(Debug)]
pub struct Mirror {
    pub name: String,
    /// Base URL, always ending in `/`
    pub base_url: Url,
    pub continent: String,
    pub country: String,
    pub blocked_countries: BTreeSet<String>,
    health: MirrorHealth,
}

impl Mirror {
    /// Create a mirror with unknown health (up, version 0)
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        continent: &str,
        country: &str,
        blocked_countries: impl IntoIterator<Item = String>,
    ) -> ConfigResult<Self> {
        let name = name.into();
        let base_url = normalize_base_url(base_url).map_err(|e| ConfigError::InvalidValue {
            field: format!("mirrors.{}.url", name),
            value: base_url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            name,
            base_url,
            continent: normalize_code(continent),
            country: normalize_code(country),
            blocked_countries: blocked_countries
                .into_iter()
                .map(|c| normalize_code(&c))
                .collect(),
            health: MirrorHealth::default(),
        })
    }

    /// Whether requesters from `country` must never be sent here
    pub fn blocks(&self, country: &str) -> bool {
        self.blocked_countries.contains(country)
    }

    /// Absolute URL of `path` on this mirror
    pub fn file_url(&self, path: &str) -> ProbeResult<Url> {
        resolve_link(&self.base_url, path)
    }

    pub fn version(&self) -> u64 {
        self.health.version.load(Ordering::Acquire)
    }

    pub fn is_down(&self) -> bool {
        self.health.down.load(Ordering::Acquire)
    }

    /// Number of consecutive sweeps that found this mirror down
    pub fn failed_scans(&self) -> u32 {
        self.health.failed_scans.load(Ordering::Acquire)
    }

    pub fn health(&self) -> HealthSnapshot {
        let millis = self.health.last_scan_millis.load(Ordering::Acquire);
        HealthSnapshot {
            version: self.version(),
            is_down: self.is_down(),
            failed_scans: self.failed_scans(),
            last_scanned_at: (millis != 0)
                .then(|| DateTime::from_timestamp_millis(millis))
                .flatten(),
        }
    }

    /// Record a successful index scan
    pub(crate) fn mark_up(&self, version: u64) {
        self.health.version.store(version, Ordering::Release);
        self.health.failed_scans.store(0, Ordering::Release);
        self.health.down.store(false, Ordering::Release);
        self.touch();
    }

    /// Record a failed index scan; the version is left untouched
    pub(crate) fn mark_down(&self) {
        self.health.failed_scans.fetch_add(1, Ordering::AcqRel);
        self.health.down.store(true, Ordering::Release);
        self.touch();
    }

    fn touch(&self) {
        self.health
            .last_scan_millis
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }
}

/// Ordered candidate list for one tier
#[derive(Debug, Clone)]
pub struct TierCandidates {
    pub tier: Tier,
    pub mirrors: Vec<Arc<Mirror>>,
}

/// In-memory mirror topology
#[derive(Debug, Default)]
pub struct Topology {
    continents: BTreeMap<String, BTreeMap<String, Vec<Arc<Mirror>>>>,
    by_name: HashMap<String, Arc<Mirror>>,
}

impl Topology {
    /// Build the topology from its parsed configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` on a malformed base URL or a duplicate mirror name
    pub fn from_config(config: &TopologyConfig) -> ConfigResult<Self> {
        let mut topology = Self::default();
        let mut errors = Vec::new();

        for (continent_code, countries) in &config.continents {
            let continent_code = normalize_code(continent_code);
            for (country_code, country) in countries {
                let country_code = normalize_code(country_code);
                for entry in &country.mirrors {
                    if topology.by_name.contains_key(&entry.name) {
                        errors.push(format!("duplicate mirror name '{}'", entry.name));
                        continue;
                    }
                    let mirror = match Mirror::new(
                        entry.name.clone(),
                        &entry.url,
                        &continent_code,
                        &country_code,
                        entry.blocked_countries.iter().cloned(),
                    ) {
                        Ok(mirror) => Arc::new(mirror),
                        Err(e) => {
                            errors.push(e.to_string());
                            continue;
                        }
                    };
                    topology
                        .by_name
                        .insert(mirror.name.clone(), Arc::clone(&mirror));
                    topology
                        .continents
                        .entry(continent_code.clone())
                        .or_default()
                        .entry(country_code.clone())
                        .or_default()
                        .push(mirror);
                }
            }
        }

        if !errors.is_empty() {
            return Err(ConfigError::ValidationFailed { errors });
        }

        debug!(
            "Built topology with {} continents and {} mirrors",
            topology.continents.len(),
            topology.by_name.len()
        );
        Ok(topology)
    }

    /// Load and build the topology from a TOML file
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let config: TopologyConfig = toml::from_str(&content)?;
        let topology = Self::from_config(&config)?;
        info!(
            "Loaded {} mirrors from topology {}",
            topology.len(),
            path.display()
        );
        Ok(topology)
    }

    /// Number of mirrors
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Look a mirror up by name
    pub fn mirror(&self, name: &str) -> Option<&Arc<Mirror>> {
        self.by_name.get(name)
    }

    /// All mirrors, continent then country then configuration order
    pub fn mirrors(&self) -> impl Iterator<Item = &Arc<Mirror>> {
        self.continents
            .values()
            .flat_map(|countries| countries.values())
            .flatten()
    }

    /// Candidate mirrors per tier for a requester, in probe order
    ///
    /// A country appearing under several continents is entirely covered by the
    /// country tier and never revisited by later tiers.
    pub fn tiers(&self, country: &str, continent: &str) -> Vec<TierCandidates> {
        let country = normalize_code(country);
        let continent = normalize_code(continent);

        let own_country = self
            .continents
            .values()
            .filter_map(|countries| countries.get(&country))
            .flatten()
            .cloned()
            .collect();

        let same_continent = self
            .continents
            .get(&continent)
            .into_iter()
            .flat_map(|countries| countries.iter())
            .filter(|(code, _)| **code != country)
            .flat_map(|(_, mirrors)| mirrors.iter().cloned())
            .collect();

        let other_continents = self
            .continents
            .iter()
            .filter(|(code, _)| **code != continent)
            .flat_map(|(_, countries)| countries.iter())
            .filter(|(code, _)| **code != country)
            .flat_map(|(_, mirrors)| mirrors.iter().cloned())
            .collect();

        vec![
            TierCandidates {
                tier: Tier::Country,
                mirrors: own_country,
            },
            TierCandidates {
                tier: Tier::Continent,
                mirrors: same_continent,
            },
            TierCandidates {
                tier: Tier::Global,
                mirrors: other_continents,
            },
        ]
    }
}

/// Uppercase ISO code, trimmed
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
