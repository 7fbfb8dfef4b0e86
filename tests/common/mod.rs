//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mirror_director::app::{Director, FileEvent, ResolutionCache, ResolverConfig, Topology, TopologyConfig};
use mirror_director::errors::{ProbeError, ProbeResult};
use tokio::sync::{RwLock, RwLockWriteGuard};
use url::Url;

pub const LAST_RESORT: &str = "https://fallback.example/parrot/";

/// Mirror network answering from a fixed table of files
#[derive(Debug, Default)]
pub struct FakeNetwork {
    files: Mutex<HashMap<String, u16>>,
    indexes: Mutex<HashMap<String, String>>,
    probed: Mutex<Vec<String>>,
    gate: RwLock<()>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `url` answer 200
    pub fn host(&self, url: &str) {
        self.files.lock().unwrap().insert(url.to_string(), 200);
    }

    /// Make `url` answer 404 again
    pub fn drop_file(&self, url: &str) {
        self.files.lock().unwrap().remove(url);
    }

    pub fn publish_index(&self, url: &str, version: u64) {
        self.indexes
            .lock()
            .unwrap()
            .insert(url.to_string(), format!("!version {}\n", version));
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }

    pub fn probed_count(&self, url: &str) -> usize {
        self.probed().iter().filter(|u| u.as_str() == url).count()
    }

    pub async fn hold(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }
}

#[async_trait]
impl mirror_director::app::MirrorProbe for FakeNetwork {
    async fn head(&self, url: &Url) -> ProbeResult<u16> {
        let _open = self.gate.read().await;
        self.probed.lock().unwrap().push(url.to_string());
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(url.as_str())
            .copied()
            .unwrap_or(404))
    }

    async fn fetch_text(&self, url: &Url) -> ProbeResult<String> {
        let _open = self.gate.read().await;
        self.indexes
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .ok_or(ProbeError::UnexpectedStatus { status: 404 })
    }
}

pub fn topology_from(text: &str) -> Arc<Topology> {
    let config: TopologyConfig = toml::from_str(text).unwrap();
    Arc::new(Topology::from_config(&config).unwrap())
}

/// Two German mirrors, one French, one Russian mirror refusing Russia, one US mirror
pub fn topology() -> Arc<Topology> {
    topology_from(
        r#"
        [continents.EU.DE]
        mirrors = [
            { name = "eu-de", url = "https://eu-de.example" },
            { name = "eu-de-2", url = "https://eu-de-2.example/parrot", blocked_countries = ["RU"] },
        ]

        [continents.EU.FR]
        mirrors = [{ name = "eu-fr", url = "https://eu-fr.example" }]

        [continents.EU.RU]
        mirrors = [{ name = "eu-ru", url = "https://eu-ru.example", blocked_countries = ["RU"] }]

        [continents.NA.US]
        mirrors = [{ name = "na-us", url = "https://na-us.example" }]
        "#,
    )
}

pub fn resolver_config() -> ResolverConfig {
    ResolverConfig {
        last_resort_url: LAST_RESORT.to_string(),
        down_reprobe_after_scans: 3,
    }
}

/// Director over `cache` with the given files already known
pub async fn director_with(
    cache: ResolutionCache,
    network: Arc<FakeNetwork>,
    files: &[&str],
) -> Arc<Director> {
    director_on(topology(), cache, network, files).await
}

/// Like [`director_with`] over a custom topology
pub async fn director_on(
    topology: Arc<Topology>,
    cache: ResolutionCache,
    network: Arc<FakeNetwork>,
    files: &[&str],
) -> Arc<Director> {
    let director = Director::new(topology, cache, network, &resolver_config()).unwrap();
    director.sync_mirrors().await.unwrap();
    for file in files {
        director
            .apply_file_event(&FileEvent::Created(file.to_string()))
            .await
            .unwrap();
    }
    Arc::new(director)
}

pub async fn director(network: Arc<FakeNetwork>, files: &[&str]) -> Arc<Director> {
    director_with(ResolutionCache::in_memory().await.unwrap(), network, files).await
}
