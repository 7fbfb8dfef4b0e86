//! Mirror health monitor
//!
//! Every sweep fetches each mirror's index artifact, whose first line must be
//! `!version <N>`. A readable index marks the mirror up at version `N`; anything
//! else marks it down and leaves its version alone. The monitor is the only
//! writer of mirror health.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::client::MirrorProbe;
use crate::app::topology::{Mirror, Topology};
use crate::constants::health;
use crate::errors::{ProbeError, ProbeResult};

/// Health monitor settings (`[health]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Pause between sweeps
    #[serde(with = "humantime_serde")]
    pub scan_interval: Duration,
    /// Index artifact fetched from every mirror
    pub index_file: String,
    /// Mirrors probed at once within a sweep
    pub concurrency: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            scan_interval: health::DEFAULT_SCAN_INTERVAL,
            index_file: health::DEFAULT_INDEX_FILE.to_string(),
            concurrency: health::DEFAULT_SCAN_CONCURRENCY,
        }
    }
}

/// A mirror that failed its index scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanFailure {
    pub mirror: String,
    pub error: String,
}

/// Summary of one sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub up: usize,
    pub down: usize,
    pub failures: Vec<ScanFailure>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl ScanReport {
    pub fn scanned(&self) -> usize {
        self.up + self.down
    }
}

/// Periodic index scanner over the whole topology
pub struct HealthMonitor {
    topology: Arc<Topology>,
    probe: Arc<dyn MirrorProbe>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(topology: Arc<Topology>, probe: Arc<dyn MirrorProbe>, config: HealthConfig) -> Self {
        Self {
            topology,
            probe,
            config,
        }
    }

    /// Fetch and parse one mirror's index
    pub async fn scan_mirror(&self, mirror: &Mirror) -> ProbeResult<u64> {
        let url = mirror.file_url(&self.config.index_file)?;
        let body = self.probe.fetch_text(&url).await?;
        parse_index_version(&body)
    }

    /// Run one sweep over every mirror and update their health
    pub async fn scan(&self) -> ScanReport {
        let started = Instant::now();
        let mirrors: Vec<Arc<Mirror>> = self.topology.mirrors().cloned().collect();

        let results: Vec<(Arc<Mirror>, ProbeResult<u64>)> = stream::iter(mirrors)
            .map(|mirror| async move {
                let result = self.scan_mirror(&mirror).await;
                (mirror, result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = ScanReport::default();
        for (mirror, result) in results {
            match result {
                Ok(version) => {
                    if mirror.is_down() || mirror.version() != version {
                        debug!("Mirror {} is up at version {}", mirror.name, version);
                    }
                    mirror.mark_up(version);
                    report.up += 1;
                }
                Err(e) => {
                    mirror.mark_down();
                    warn!(
                        "Mirror {} is down ({} consecutive failed scans): {}",
                        mirror.name,
                        mirror.failed_scans(),
                        e
                    );
                    report.down += 1;
                    report.failures.push(ScanFailure {
                        mirror: mirror.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report.failures.sort_by(|a, b| a.mirror.cmp(&b.mirror));
        report.duration = started.elapsed();

        info!(
            "Health sweep: {} up, {} down in {:.2}s",
            report.up,
            report.down,
            report.duration.as_secs_f64()
        );
        report
    }

    /// Sweep on every interval tick until shutdown is broadcast
    ///
    /// The first sweep starts immediately.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.scan().await;
                }
                _ = shutdown_rx.recv() => {
                    debug!("Health monitor received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Run the monitor loop as a background task
    pub fn spawn(self: Arc<Self>, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown_rx).await })
    }
}

/// Extract `N` from an index whose first line is `!version <N>`
pub fn parse_index_version(body: &str) -> ProbeResult<u64> {
    let first_line = body.lines().next().unwrap_or_default().trim();
    let mut parts = first_line.split_whitespace();

    if parts.next() != Some(health::VERSION_MARKER) {
        return Err(ProbeError::InvalidIndex {
            reason: "version line not found".to_string(),
        });
    }

    let version = parts.next().ok_or_else(|| ProbeError::InvalidIndex {
        reason: "missing version number".to_string(),
    })?;
    version.parse::<u64>().map_err(|e| ProbeError::InvalidIndex {
        reason: format!("invalid version '{}': {}", version, e),
    })
}
