//! Command handlers for the CLI
//!
//! Each handler builds the components it needs from the loaded configuration,
//! runs, and prints a human-readable (or JSON) summary.

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::client::{normalize_base_url, resolve_link};
use crate::app::{
    create_shutdown_channel, reconcile, reconcile_index, scan_repository, Director, HealthMonitor,
    HttpProbe, InventoryReport, MasterIndex, MirrorProbe, ResolutionCache, SearchOutcome, SignalHandler,
    StaticGeoLocator, Topology,
};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

use super::args::{CacheAction, CacheArgs, GlobalArgs, InventoryArgs, MonitorArgs, ResolveArgs, ScanArgs};

/// Load the configuration and apply command-line overrides
pub async fn load_config(global: &GlobalArgs) -> Result<AppConfig> {
    let mut config = AppConfig::load(global.config.as_deref()).await?;
    if let Some(topology) = &global.topology {
        config.topology_path = topology.clone();
    }
    if let Some(database) = &global.database {
        config.cache.database_path = database.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn load_topology(config: &AppConfig) -> Result<Arc<Topology>> {
    let topology = Topology::load(&config.topology_path).await?;
    if topology.is_empty() {
        warn!(
            "Topology {} has no mirrors; every request will go to the last resort",
            config.topology_path.display()
        );
    }
    Ok(Arc::new(topology))
}

/// Build a director with its mirror registry in sync with the topology
async fn build_director(config: &AppConfig) -> Result<Director> {
    let topology = load_topology(config).await?;
    let cache = ResolutionCache::open(&config.cache).await?;
    let probe = Arc::new(HttpProbe::new(&config.client)?);
    let geo = StaticGeoLocator::from_config(&config.geo)?;

    let director =
        Director::new(topology, cache, probe, &config.resolver)?.with_geo_locator(Arc::new(geo));
    let sync = director.sync_mirrors().await?;
    info!(
        "Registered {} mirrors, updated {}, removed {}",
        sync.registered,
        sync.updated.len(),
        sync.removed.len()
    );
    Ok(director)
}

/// Fetch the index file of the master mirror at `master`
async fn fetch_master_index(probe: &dyn MirrorProbe, master: &str, config: &AppConfig) -> Result<MasterIndex> {
    let base = normalize_base_url(master)?;
    let url = resolve_link(&base, &config.health.index_file)?;
    Ok(MasterIndex::fetch(probe, &url).await?)
}

/// Handle the resolve command
pub async fn handle_resolve(args: ResolveArgs, config: &AppConfig) -> Result<()> {
    let director = build_director(config).await?;

    let (country, continent) = match args.ip {
        Some(ip) => {
            let location = director.locate(ip).await;
            (location.country, location.continent)
        }
        None => args.location(),
    };

    let resolution = director
        .resolve_tracked(&args.path, &country, &continent)
        .await?;
    let redirect = &resolution.redirect;

    match &redirect.mirror {
        Some(mirror) => println!("{} ({}, verified)", redirect.url, mirror),
        None => println!("{} (last resort)", redirect.url),
    }

    // Await a started search so its outcome reaches the cache before it closes
    match resolution.search {
        Some(search) => {
            let outcome = search
                .await
                .map_err(|e| AppError::generic(format!("Background search panicked: {}", e)))?;
            if args.wait {
                match outcome {
                    Some(SearchOutcome::Found { tier, mirror, url }) => {
                        println!("Search found {} on {} ({} tier)", url, mirror, tier)
                    }
                    Some(SearchOutcome::Exhausted { .. }) => {
                        println!("Search found no mirror; recorded as skipped")
                    }
                    None => println!("Search failed, see log"),
                }
            }
        }
        None if args.wait => println!("No background search was started"),
        None => {}
    }

    director.cache().close().await;
    Ok(())
}

/// Handle the scan command
pub async fn handle_scan(args: ScanArgs, config: &AppConfig) -> Result<()> {
    let topology = load_topology(config).await?;
    let probe = Arc::new(HttpProbe::new(&config.client)?);
    let monitor = HealthMonitor::new(Arc::clone(&topology), probe, config.health.clone());

    let report = monitor.scan().await;

    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| AppError::generic(format!("Failed to serialize report: {}", e)))?;
        println!("{}", json);
        return Ok(());
    }

    println!("Health sweep: {} up, {} down", report.up, report.down);
    for mirror in topology.mirrors() {
        let health = mirror.health();
        let state = if health.is_down { "DOWN" } else { "up" };
        println!(
            "  {:<4} {:<24} {}/{} version {}",
            state, mirror.name, mirror.continent, mirror.country, health.version
        );
    }
    for failure in &report.failures {
        println!("  {}: {}", failure.mirror, failure.error);
    }
    Ok(())
}

/// Handle the monitor command
pub async fn handle_monitor(args: MonitorArgs, config: &AppConfig) -> Result<()> {
    let director = build_director(config).await?;

    if let Some(repository) = &args.repository {
        let files = scan_repository(repository).await?;
        reconcile(director.cache(), &files).await?;
    }
    if let Some(master) = &args.master {
        let index = fetch_master_index(director.probe().as_ref(), master, config).await?;
        reconcile_index(director.cache(), &index).await?;
        director.set_repository_version(index.version);
    }

    let monitor = Arc::new(HealthMonitor::new(
        Arc::clone(director.topology()),
        Arc::clone(director.probe()),
        config.health.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let signals = SignalHandler::new(shutdown_tx).setup();

    info!(
        "Monitoring {} mirrors every {:?}",
        director.topology().len(),
        config.health.scan_interval
    );
    monitor
        .spawn(shutdown_rx)
        .await
        .map_err(|e| AppError::generic(format!("Health monitor failed: {}", e)))?;
    signals.abort();

    let stats = director.stats().await?;
    info!("Shutting down: {}", stats);
    director.cache().close().await;
    Ok(())
}

/// Handle the inventory command
pub async fn handle_inventory(args: InventoryArgs, config: &AppConfig) -> Result<()> {
    let cache = ResolutionCache::open(&config.cache).await?;
    let report = inventory_report(&args, &cache, config).await?;

    println!(
        "{} files: {} added, {} removed",
        report.total(),
        report.added,
        report.removed
    );
    cache.close().await;
    Ok(())
}

async fn inventory_report(args: &InventoryArgs, cache: &ResolutionCache, config: &AppConfig) -> Result<InventoryReport> {
    match (&args.master, &args.dir) {
        (Some(master), _) => {
            let probe = HttpProbe::new(&config.client)?;
            let index = fetch_master_index(&probe, master, config).await?;
            println!("Master index version {}", index.version);
            Ok(reconcile_index(cache, &index).await?)
        }
        (None, Some(dir)) => {
            let files = scan_repository(dir).await?;
            Ok(reconcile(cache, &files).await?)
        }
        (None, None) => Err(AppError::generic("inventory needs a directory or --master")),
    }
}

/// Handle cache commands
pub async fn handle_cache(args: CacheArgs, config: &AppConfig) -> Result<()> {
    let cache = ResolutionCache::open(&config.cache).await?;

    match args.action {
        CacheAction::Stats { json } => {
            let stats = cache.stats().await?;
            if json {
                let json = serde_json::to_string_pretty(&stats)
                    .map_err(|e| AppError::generic(format!("Failed to serialize stats: {}", e)))?;
                println!("{}", json);
            } else {
                println!("{}", stats);
                if stats.needs_pruning() {
                    println!("Run 'mirror-director cache prune' to remove orphaned records");
                }
            }
        }
        CacheAction::Files => {
            for file in cache.get_all_files().await? {
                println!("{}", file);
            }
        }
        CacheAction::Prune => {
            let pruned = cache.prune_orphans().await?;
            println!("Pruned {} orphaned records", pruned);
        }
    }

    cache.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::Cli;
    use clap::Parser;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_config_applies_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        tokio::fs::write(&config_path, "topology_path = \"from-file.toml\"\n")
            .await
            .unwrap();

        let cli = Cli::try_parse_from([
            "mirror-director",
            "--config",
            config_path.to_str().unwrap(),
            "--database",
            "/tmp/override.db",
            "scan",
        ])
        .unwrap();

        let config = load_config(&cli.global).await.unwrap();
        assert_eq!(config.topology_path.to_str(), Some("from-file.toml"));
        assert_eq!(config.cache.database_path.to_str(), Some("/tmp/override.db"));
    }

    #[tokio::test]
    async fn test_inventory_and_cache_commands() {
        let temp_dir = TempDir::new().unwrap();
        let repo = temp_dir.path().join("repo");
        tokio::fs::create_dir_all(repo.join("pool")).await.unwrap();
        tokio::fs::write(repo.join("pool").join("a.deb"), b"a").await.unwrap();

        let mut config = AppConfig::default();
        config.cache.database_path = temp_dir.path().join("cache.db");

        handle_inventory(
            InventoryArgs {
                dir: Some(repo),
                master: None,
            },
            &config,
        )
        .await
        .unwrap();
        handle_cache(
            CacheArgs {
                action: CacheAction::Prune,
            },
            &config,
        )
        .await
        .unwrap();

        let cache = ResolutionCache::open(&config.cache).await.unwrap();
        assert!(cache.exists_file("pool/a.deb").await.unwrap());
        cache.close().await;
    }

    #[tokio::test]
    async fn test_resolve_records_search_without_wait() {
        let temp_dir = TempDir::new().unwrap();
        let repo = temp_dir.path().join("repo");
        tokio::fs::create_dir_all(&repo).await.unwrap();
        tokio::fs::write(repo.join("a.deb"), b"a").await.unwrap();
        let topology_path = temp_dir.path().join("mirrors.toml");
        tokio::fs::write(&topology_path, "").await.unwrap();

        let mut config = AppConfig::default();
        config.cache.database_path = temp_dir.path().join("cache.db");
        config.topology_path = topology_path;

        handle_inventory(
            InventoryArgs {
                dir: Some(repo),
                master: None,
            },
            &config,
        )
        .await
        .unwrap();
        handle_resolve(
            ResolveArgs {
                path: "a.deb".to_string(),
                country: Some("DE".to_string()),
                continent: Some("EU".to_string()),
                ip: None,
                wait: false,
            },
            &config,
        )
        .await
        .unwrap();

        // With no mirrors the search ends in a SKIP, which must be on disk
        let cache = ResolutionCache::open(&config.cache).await.unwrap();
        assert_eq!(
            cache.get_records("a.deb").await.unwrap(),
            vec![crate::app::Outcome::skip("DE")]
        );
        cache.close().await;
    }

    #[tokio::test]
    async fn test_missing_topology_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.topology_path = temp_dir.path().join("missing.toml");

        let result = handle_scan(ScanArgs { json: true }, &config).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
