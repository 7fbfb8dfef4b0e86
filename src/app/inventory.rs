//! Repository inventory
//!
//! Keeps the cache's file set and mirror registry in step with the
//! repository on disk and the loaded topology. Paths are always relative to
//! the repository root with `/` separators, which is also how requests name
//! them.

use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::cache::ResolutionCache;
use crate::app::client::MirrorProbe;
use crate::app::health::parse_index_version;
use crate::app::topology::Topology;
use crate::constants::inventory::EVENT_CHANNEL_CAPACITY;
use crate::errors::{CacheResult, ProbeResult};

/// Change notification for a repository file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileEvent {
    Created(String),
    Modified(String),
    Removed(String),
}

impl FileEvent {
    pub fn path(&self) -> &str {
        match self {
            FileEvent::Created(path) | FileEvent::Modified(path) | FileEvent::Removed(path) => path,
        }
    }
}

/// Channel a filesystem watcher feeds [`FileEvent`]s into
pub fn event_channel() -> (mpsc::Sender<FileEvent>, mpsc::Receiver<FileEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Outcome of reconciling the cache with the repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventoryReport {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl InventoryReport {
    pub fn total(&self) -> usize {
        self.added + self.unchanged
    }
}

/// Outcome of syncing the mirror registry with the topology
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorSync {
    pub registered: usize,
    /// Registered mirrors whose URL, location or blocked countries changed
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

/// The master mirror's index: its version and the files it lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterIndex {
    pub version: u64,
    pub files: BTreeSet<String>,
}

impl MasterIndex {
    /// Parse `!version <N>` followed by one repository path per line
    pub fn parse(body: &str) -> ProbeResult<Self> {
        let version = parse_index_version(body)?;
        let files = body
            .lines()
            .skip(1)
            .map(|line| line.trim().trim_start_matches('/'))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self { version, files })
    }

    /// Download and parse the index at `url`
    pub async fn fetch(probe: &dyn MirrorProbe, url: &Url) -> ProbeResult<Self> {
        let body = probe.fetch_text(url).await?;
        let index = Self::parse(&body)?;
        info!(
            "Master index {} at version {} lists {} files",
            url,
            index.version,
            index.files.len()
        );
        Ok(index)
    }
}

/// Repository-relative path of `path`, `None` if it lies outside `root`
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// List every regular file under `root`
///
/// # Errors
///
/// Fails only if `root` itself cannot be read; unreadable subdirectories are
/// logged and skipped.
pub async fn scan_repository(root: &Path) -> io::Result<BTreeSet<String>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::read_dir(&root)?;
        let mut files = BTreeSet::new();
        walk(&root, &root, &mut files);
        Ok(files)
    })
    .await
    .map_err(io::Error::other)?
}

fn walk(root: &Path, dir: &Path, files: &mut BTreeSet<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => walk(root, &path, files),
            Ok(ft) if ft.is_file() => {
                if let Some(relative) = relative_path(root, &path) {
                    files.insert(relative);
                }
            }
            _ => debug!("Ignoring {}", path.display()),
        }
    }
}

/// Make the cache's file set equal to `found`
pub async fn reconcile(cache: &ResolutionCache, found: &BTreeSet<String>) -> CacheResult<InventoryReport> {
    reconcile_at(cache, found, 0).await
}

/// Make the cache's file set equal to the master index
///
/// New files require the index version; known files keep theirs.
pub async fn reconcile_index(cache: &ResolutionCache, index: &MasterIndex) -> CacheResult<InventoryReport> {
    reconcile_at(cache, &index.files, index.version).await
}

async fn reconcile_at(
    cache: &ResolutionCache,
    found: &BTreeSet<String>,
    version: u64,
) -> CacheResult<InventoryReport> {
    let known = cache.get_all_files().await?;
    let mut report = InventoryReport::default();

    for path in found {
        if known.contains(path) {
            report.unchanged += 1;
        } else {
            cache.add_versioned_file(path, version).await?;
            report.added += 1;
        }
    }
    for path in known.difference(found) {
        cache.remove_file(path).await?;
        report.removed += 1;
    }

    info!(
        "Inventory: {} added, {} removed, {} unchanged",
        report.added, report.removed, report.unchanged
    );
    Ok(report)
}

/// Register every topology mirror and unregister the ones no longer in it
pub async fn sync_mirrors(cache: &ResolutionCache, topology: &Topology) -> CacheResult<MirrorSync> {
    let mut sync = MirrorSync::default();
    for mirror in topology.mirrors() {
        cache.add_mirror(mirror).await?;
        if cache.update_mirror(mirror).await? {
            sync.updated.push(mirror.name.clone());
        }
        sync.registered += 1;
    }

    for row in cache.list_mirrors().await? {
        if topology.mirror(&row.name).is_none() {
            cache.delete_mirror(&row.name).await?;
            info!("Unregistered mirror {} (no longer in topology)", row.name);
            sync.removed.push(row.name);
        }
    }
    Ok(sync)
}
