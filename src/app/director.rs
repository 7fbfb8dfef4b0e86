//! Redirect orchestration
//!
//! The [`Director`] is the single entry point of a request: it consults the
//! resolution cache, re-validates cached links, and hands misses to a detached
//! background search while the requester is sent to the last-resort mirror.
//!
//! Cached links are looked up tier by tier. A PASS of a mirror in the
//! requester's country comes first, then PASS records of continent and global
//! mirrors in the order the search itself would try them.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::app::cache::{CacheStats, FileLink, ResolutionCache};
use crate::app::client::MirrorProbe;
use crate::app::dedup::DedupCoordinator;
use crate::app::geo::{GeoLocator, Location};
use crate::app::inventory::{self, FileEvent, MirrorSync};
use crate::app::resolver::{FallbackResolver, ResolverConfig, SearchOutcome};
use crate::app::topology::{normalize_code, Tier, Topology};
use crate::errors::{CacheError, CacheResult, ConfigResult, ResolveError, ResolveResult};

/// Where a requester is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub url: Url,
    /// Mirror serving the file, `None` for the last-resort mirror
    pub mirror: Option<String>,
    /// True when a mirror was just confirmed to hold the file
    pub authoritative: bool,
}

impl Redirect {
    fn last_resort(url: Url) -> Self {
        Self {
            url,
            mirror: None,
            authoritative: false,
        }
    }
}

/// A redirect together with the background search it started, if any
#[derive(Debug)]
pub struct Resolution {
    pub redirect: Redirect,
    pub search: Option<JoinHandle<Option<SearchOutcome>>>,
}

/// Composes cache lookup, re-validation and background search dispatch
pub struct Director {
    topology: Arc<Topology>,
    cache: ResolutionCache,
    probe: Arc<dyn MirrorProbe>,
    dedup: Arc<DedupCoordinator>,
    resolver: Arc<FallbackResolver>,
    geo: Option<Arc<dyn GeoLocator>>,
    /// Master index version stamped on created and modified files
    repository_version: AtomicU64,
}

impl Director {
    /// Create a director over shared components
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the resolver configuration is invalid
    pub fn new(
        topology: Arc<Topology>,
        cache: ResolutionCache,
        probe: Arc<dyn MirrorProbe>,
        config: &ResolverConfig,
    ) -> ConfigResult<Self> {
        let resolver = FallbackResolver::new(
            Arc::clone(&topology),
            cache.clone(),
            Arc::clone(&probe),
            config,
        )?;
        Ok(Self {
            topology,
            cache,
            probe,
            dedup: Arc::new(DedupCoordinator::new()),
            resolver: Arc::new(resolver),
            geo: None,
            repository_version: AtomicU64::new(0),
        })
    }

    /// Use `geo` to locate requesters in [`Self::resolve_address`]
    pub fn with_geo_locator(mut self, geo: Arc<dyn GeoLocator>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn probe(&self) -> &Arc<dyn MirrorProbe> {
        &self.probe
    }

    pub fn dedup(&self) -> &DedupCoordinator {
        &self.dedup
    }

    /// Set the master index version that file events are stamped with
    pub fn set_repository_version(&self, version: u64) {
        self.repository_version.store(version, Ordering::Release);
    }

    pub fn repository_version(&self) -> u64 {
        self.repository_version.load(Ordering::Acquire)
    }

    /// Resolve `path` for a requester located in `country`/`continent`
    ///
    /// # Errors
    ///
    /// - `ResolveError::NotFound` if the file is unknown
    /// - `ResolveError::Cache` if the cache database is unusable
    pub async fn resolve(&self, path: &str, country: &str, continent: &str) -> ResolveResult<Redirect> {
        Ok(self.resolve_tracked(path, country, continent).await?.redirect)
    }

    /// Resolve `path` for a requester address using the geo locator
    ///
    /// Unlocatable addresses resolve with an unknown location, which reaches
    /// the global tier directly.
    pub async fn resolve_address(&self, path: &str, address: IpAddr) -> ResolveResult<Redirect> {
        let location = self.locate(address).await;
        self.resolve(path, &location.country, &location.continent).await
    }

    pub async fn locate(&self, address: IpAddr) -> Location {
        let located = match &self.geo {
            Some(geo) => geo.locate(address).await,
            None => None,
        };
        located.unwrap_or_else(|| {
            debug!("No location for {}", address);
            Location::unknown()
        })
    }

    /// Like [`Self::resolve`], also handing back the background search
    pub async fn resolve_tracked(&self, path: &str, country: &str, continent: &str) -> ResolveResult<Resolution> {
        let country = normalize_code(country);
        let continent = normalize_code(continent);

        let required = match self.cache.file_version(path).await {
            Ok(version) => version,
            Err(CacheError::FileNotFound { .. }) => {
                return Err(ResolveError::NotFound {
                    path: path.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let search_allowed = match self.cache.get_file_link(path, &country).await {
            Ok(link) => {
                if let Some(redirect) = self.revalidate(path, &country, required, link).await? {
                    return Ok(Resolution {
                        redirect,
                        search: None,
                    });
                }
                true
            }
            Err(CacheError::SkipFile { .. }) => {
                debug!("{} is known to be on no mirror for {:?}", path, country);
                false
            }
            Err(e) if e.is_fatal() => {
                error!("Resolution cache failure: {}", e);
                return Err(e.into());
            }
            Err(e) => {
                debug!("Cache miss for {}: {}", path, e);
                true
            }
        };

        if search_allowed {
            if let Some(redirect) = self.cached_elsewhere(path, &country, &continent, required).await? {
                return Ok(Resolution {
                    redirect,
                    search: None,
                });
            }
        }

        let redirect = Redirect::last_resort(self.resolver.last_resort_link(path));
        let search = if search_allowed {
            self.dispatch_search(path, &country, &continent).await
        } else {
            None
        };
        info!("Redirecting {} ({:?}) to last resort {}", path, country, redirect.url);

        Ok(Resolution { redirect, search })
    }

    /// Look for a PASS of a continent or global mirror, in tier order
    async fn cached_elsewhere(
        &self,
        path: &str,
        country: &str,
        continent: &str,
        required: u64,
    ) -> CacheResult<Option<Redirect>> {
        let passed = self.cache.passed_mirrors(path).await?;
        if passed.is_empty() {
            return Ok(None);
        }

        for candidates in self.topology.tiers(country, continent) {
            if candidates.tier == Tier::Country {
                continue;
            }
            for mirror in &candidates.mirrors {
                if !passed.contains(&mirror.name) {
                    continue;
                }
                let url = match mirror.file_url(path) {
                    Ok(url) => url,
                    Err(e) => {
                        warn!("No link to {} on {}: {}", path, mirror.name, e);
                        continue;
                    }
                };
                let link = FileLink {
                    mirror: mirror.name.clone(),
                    url,
                };
                if let Some(redirect) = self.revalidate(path, country, required, link).await? {
                    debug!("{} served from the {:?} tier", path, candidates.tier);
                    return Ok(Some(redirect));
                }
            }
        }
        Ok(None)
    }

    /// Confirm a cached link still works, deleting its record when it doesn't
    ///
    /// A link to a mirror that is gone from the topology, blocks the requester,
    /// is down, or publishes an older index than the file is a miss, but its
    /// record is kept.
    async fn revalidate(
        &self,
        path: &str,
        country: &str,
        required: u64,
        link: FileLink,
    ) -> CacheResult<Option<Redirect>> {
        let Some(mirror) = self.topology.mirror(&link.mirror) else {
            debug!("Cached mirror {} for {} left the topology", link.mirror, path);
            return Ok(None);
        };
        if mirror.blocks(country) {
            debug!("Cached mirror {} blocks {:?}", link.mirror, country);
            return Ok(None);
        }
        if mirror.is_down() {
            debug!("Cached mirror {} for {} is down", link.mirror, path);
            return Ok(None);
        }
        if mirror.version() < required {
            debug!(
                "Cached mirror {} at version {}, {} needs {}",
                link.mirror,
                mirror.version(),
                path,
                required
            );
            return Ok(None);
        }

        match self.probe.head(&link.url).await {
            Ok(200) => {
                info!("Redirecting {} to {}", path, link.url);
                return Ok(Some(Redirect {
                    url: link.url,
                    mirror: Some(link.mirror),
                    authoritative: true,
                }));
            }
            Ok(status) => warn!("Stale link {} answered {}", link.url, status),
            Err(e) => warn!("Stale link {}: {}", link.url, e),
        }

        match self.cache.delete_record(&link.mirror, path).await {
            Ok(true) => {
                self.dedup.rearm(country, path).await;
                Ok(None)
            }
            Ok(false) => Ok(None),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!("Stale record of {} already gone: {}", path, e);
                Ok(None)
            }
        }
    }

    async fn dispatch_search(
        &self,
        path: &str,
        country: &str,
        continent: &str,
    ) -> Option<JoinHandle<Option<SearchOutcome>>> {
        if !self.dedup.should_start_search(country, path).await {
            return None;
        }

        let resolver = Arc::clone(&self.resolver);
        let dedup = Arc::clone(&self.dedup);
        let path = path.to_string();
        let country = country.to_string();
        let continent = continent.to_string();

        Some(tokio::spawn(async move {
            let outcome = match resolver.search(&path, &country, &continent).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    error!("Background search for {} failed: {}", path, e);
                    None
                }
            };
            dedup.settle(&country, &path).await;
            outcome
        }))
    }

    /// Apply a repository change to the cache and the search flags
    pub async fn apply_file_event(&self, event: &FileEvent) -> CacheResult<()> {
        match event {
            FileEvent::Created(path) => {
                self.cache
                    .add_versioned_file(path, self.repository_version())
                    .await?;
                self.invalidate(path).await?;
            }
            FileEvent::Modified(path) => {
                self.cache
                    .raise_file_version(path, self.repository_version())
                    .await?;
                self.invalidate(path).await?;
            }
            FileEvent::Removed(path) => {
                self.cache.remove_file(path).await?;
                self.dedup.forget(path).await;
            }
        }
        debug!("Applied {:?}", event);
        Ok(())
    }

    async fn invalidate(&self, path: &str) -> CacheResult<()> {
        self.dedup.reset_on_file_change(path).await;
        self.cache.clear_skips(path).await?;
        Ok(())
    }

    /// Consume file events until the sender side is dropped
    ///
    /// Stops early on a fatal cache error.
    pub fn spawn_event_listener(self: Arc<Self>, mut events: mpsc::Receiver<FileEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match self.apply_file_event(&event).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => {
                        error!("Stopping file event listener: {}", e);
                        break;
                    }
                    Err(e) => warn!("Failed to apply {:?}: {}", event, e),
                }
            }
            debug!("File event listener finished");
        })
    }

    /// Bring the cache's mirror registry in line with the topology
    pub async fn sync_mirrors(&self) -> CacheResult<MirrorSync> {
        inventory::sync_mirrors(&self.cache, &self.topology).await
    }

    pub async fn stats(&self) -> CacheResult<CacheStats> {
        self.cache.stats().await
    }
}
