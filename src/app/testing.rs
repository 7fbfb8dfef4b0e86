//! Shared fixtures for unit tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockWriteGuard};
use url::Url;

use crate::app::client::MirrorProbe;
use crate::app::topology::{Topology, TopologyConfig};
use crate::errors::{ProbeError, ProbeResult};

/// Probe answering from a script instead of the network
///
/// Unscripted HEAD requests answer 404 and unscripted index fetches fail.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    statuses: Mutex<HashMap<String, u16>>,
    indexes: Mutex<HashMap<String, String>>,
    head_calls: Mutex<Vec<String>>,
    gate: RwLock<()>,
}

impl ScriptedProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_status(&self, url: &str, status: u16) {
        self.statuses.lock().unwrap().insert(url.to_string(), status);
    }

    pub fn set_index(&self, url: &str, body: &str) {
        self.indexes
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }

    pub fn remove_index(&self, url: &str) {
        self.indexes.lock().unwrap().remove(url);
    }

    /// URLs probed with HEAD, in call order
    pub fn head_calls(&self) -> Vec<String> {
        self.head_calls.lock().unwrap().clone()
    }

    /// Hold every probe until the returned guard is dropped
    pub async fn hold(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }
}

#[async_trait]
impl MirrorProbe for ScriptedProbe {
    async fn head(&self, url: &Url) -> ProbeResult<u16> {
        let _open = self.gate.read().await;
        self.head_calls.lock().unwrap().push(url.to_string());
        Ok(self
            .statuses
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

/// Topology used across the crate's unit tests
///
/// EU: DE (eu-de, eu-de-2 blocking RU), FR (eu-fr), RU (eu-ru blocking RU).
/// NA: US (na-us). AS: JP (as-jp).
pub fn sample_topology() -> Arc<Topology> {
    let config: TopologyConfig = toml::from_str(
        r#"
        [continents.EU.DE]
        mirrors = [
            { name = "eu-de", url = "https://eu-de.example" },
            { name = "eu-de-2", url = "https://eu-de-2.example/parrot/", blocked_countries = ["RU"] },
        ]

        [continents.EU.FR]
        mirrors = [{ name = "eu-fr", url = "https://eu-fr.example" }]

        [continents.EU.RU]
        mirrors = [{ name = "eu-ru", url = "https://eu-ru.example", blocked_countries = ["RU"] }]

        [continents.NA.US]
        mirrors = [{ name = "na-us", url = "https://na-us.example" }]

        [continents.AS.JP]
        mirrors = [{ name = "as-jp", url = "https://as-jp.example" }]
        "#,
    )
    .unwrap();
    Arc::new(Topology::from_config(&config).unwrap())
}
