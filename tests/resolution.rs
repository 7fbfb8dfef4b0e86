//! End-to-end resolution tests against a fake mirror network

mod common;

use std::sync::Arc;

use common::{director, director_on, director_with, topology, topology_from, FakeNetwork, LAST_RESORT};
use futures::future::join_all;
use mirror_director::app::{
    reconcile_index, CacheConfig, HealthConfig, HealthMonitor, MasterIndex, Outcome, ResolutionCache,
    SearchOutcome, Tier,
};
use mirror_director::errors::ResolveError;
use tempfile::TempDir;

const FILE: &str = "pool/main/a.deb";

fn fallback_url() -> String {
    format!("{}{}", LAST_RESORT, FILE)
}

#[tokio::test]
async fn test_country_mirror_serves_after_first_search() {
    let network = FakeNetwork::new();
    network.host("https://eu-de.example/pool/main/a.deb");
    let director = director(network.clone(), &[FILE]).await;

    let first = director.resolve_tracked(FILE, "DE", "EU").await.unwrap();
    assert_eq!(first.redirect.url.as_str(), fallback_url());
    assert!(first.redirect.mirror.is_none());

    let outcome = first.search.unwrap().await.unwrap().unwrap();
    assert_eq!(outcome.tier(), Tier::Country);

    let second = director.resolve(FILE, "DE", "EU").await.unwrap();
    assert_eq!(second.url.as_str(), "https://eu-de.example/pool/main/a.deb");
    assert_eq!(second.mirror.as_deref(), Some("eu-de"));

    let records = director.cache().get_records(FILE).await.unwrap();
    assert_eq!(records, vec![Outcome::pass("eu-de")]);
}

#[tokio::test]
async fn test_file_on_no_mirror_records_skip() {
    let network = FakeNetwork::new();
    let director = director(network.clone(), &[FILE]).await;

    let resolution = director.resolve_tracked(FILE, "ZZ", "OC").await.unwrap();
    assert_eq!(resolution.redirect.url.as_str(), fallback_url());

    let outcome = resolution.search.unwrap().await.unwrap().unwrap();
    assert!(matches!(outcome, SearchOutcome::Exhausted { .. }));
    assert_eq!(outcome.url().as_str(), fallback_url());

    // Every mirror of every tier was tried once
    assert_eq!(network.probed().len(), 5);
    assert_eq!(
        director.cache().get_records(FILE).await.unwrap(),
        vec![Outcome::skip("ZZ")]
    );

    // Further requests go straight to the fallback without probing
    let again = director.resolve_tracked(FILE, "ZZ", "OC").await.unwrap();
    assert!(again.search.is_none());
    assert_eq!(network.probed().len(), 5);
}

#[tokio::test]
async fn test_continent_tier_beats_global_tier() {
    let network = FakeNetwork::new();
    network.host("https://eu-fr.example/pool/main/a.deb");
    network.host("https://na-us.example/pool/main/a.deb");
    let director = director(network.clone(), &[FILE]).await;

    let resolution = director.resolve_tracked(FILE, "DE", "EU").await.unwrap();
    let outcome = resolution.search.unwrap().await.unwrap().unwrap();
    match outcome {
        SearchOutcome::Found { tier, mirror, .. } => {
            assert_eq!(tier, Tier::Continent);
            assert_eq!(mirror, "eu-fr");
        }
        other => panic!("Expected a continent hit, got {:?}", other),
    }
    assert_eq!(network.probed_count("https://na-us.example/pool/main/a.deb"), 0);

    // A cached link of any tier is served before a new search is started,
    // so the US requester gets eu-fr even though na-us holds the file
    let resolution = director.resolve_tracked(FILE, "US", "NA").await.unwrap();
    assert!(resolution.search.is_none());
    assert_eq!(resolution.redirect.url.as_str(), "https://eu-fr.example/pool/main/a.deb");
    assert!(resolution.redirect.authoritative);
    assert_eq!(network.probed_count("https://na-us.example/pool/main/a.deb"), 0);
}

#[tokio::test]
async fn test_one_search_serves_repeated_requests() {
    let network = FakeNetwork::new();
    network.host("https://eu-fr.example/pool/main/a.deb");
    let director = director(network.clone(), &[FILE]).await;

    let first = director.resolve_tracked(FILE, "DE", "EU").await.unwrap();
    assert_eq!(first.redirect.url.as_str(), fallback_url());
    first.search.unwrap().await.unwrap().unwrap();

    for _ in 0..2 {
        let resolution = director.resolve_tracked(FILE, "DE", "EU").await.unwrap();
        assert!(resolution.search.is_none());
        assert_eq!(resolution.redirect.mirror.as_deref(), Some("eu-fr"));
        assert!(resolution.redirect.authoritative);
    }

    // One search walked the German mirrors; later requests only re-validated eu-fr
    assert_eq!(network.probed_count("https://eu-de.example/pool/main/a.deb"), 1);
    assert_eq!(network.probed_count("https://eu-fr.example/pool/main/a.deb"), 3);
    assert_eq!(
        director.cache().get_records(FILE).await.unwrap(),
        vec![Outcome::pass("eu-fr")]
    );
}

#[tokio::test]
async fn test_blocked_country_is_never_sent_to_blocking_mirror() {
    let network = FakeNetwork::new();
    network.host("https://eu-ru.example/pool/main/a.deb");
    network.host("https://eu-de-2.example/parrot/pool/main/a.deb");
    network.host("https://na-us.example/pool/main/a.deb");
    let director = director(network.clone(), &[FILE]).await;

    // A German requester populates a record on a mirror that blocks Russia
    let resolution = director.resolve_tracked(FILE, "DE", "EU").await.unwrap();
    resolution.search.unwrap().await.unwrap().unwrap();
    assert!(director
        .cache()
        .get_records(FILE)
        .await
        .unwrap()
        .contains(&Outcome::pass("eu-de-2")));

    let resolution = director.resolve_tracked(FILE, "ru", "eu").await.unwrap();
    assert_eq!(resolution.redirect.url.as_str(), fallback_url());
    let outcome = resolution.search.unwrap().await.unwrap().unwrap();
    match outcome {
        SearchOutcome::Found { tier, mirror, .. } => {
            assert_eq!(tier, Tier::Global);
            assert_eq!(mirror, "na-us");
        }
        other => panic!("Expected a global hit, got {:?}", other),
    }
    assert_eq!(network.probed_count("https://eu-ru.example/pool/main/a.deb"), 0);

    // Later Russian requests get the global link, never eu-de-2's
    let redirect = director.resolve(FILE, "RU", "EU").await.unwrap();
    assert_eq!(redirect.url.as_str(), "https://na-us.example/pool/main/a.deb");
    assert!(redirect.authoritative);
    assert_eq!(network.probed_count("https://eu-ru.example/pool/main/a.deb"), 0);
    assert_eq!(
        network.probed_count("https://eu-de-2.example/parrot/pool/main/a.deb"),
        1
    );
}

#[tokio::test]
async fn test_restart_applies_new_blocked_list() {
    let temp_dir = TempDir::new().unwrap();
    let config = CacheConfig::with_database_path(temp_dir.path().join("cache.db"));

    let network = FakeNetwork::new();
    network.host("https://eu-de.example/pool/main/a.deb");
    {
        let cache = ResolutionCache::open(&config).await.unwrap();
        let director = director_on(topology(), cache, network.clone(), &[FILE]).await;
        let resolution = director.resolve_tracked(FILE, "DE", "EU").await.unwrap();
        resolution.search.unwrap().await.unwrap().unwrap();
        assert_eq!(
            director.cache().get_records(FILE).await.unwrap(),
            vec![Outcome::pass("eu-de")]
        );
        director.cache().close().await;
    }

    // eu-de now refuses German requesters
    let blocking = topology_from(
        r#"
        [continents.EU.DE]
        mirrors = [
            { name = "eu-de", url = "https://eu-de.example", blocked_countries = ["DE"] },
            { name = "eu-de-2", url = "https://eu-de-2.example/parrot", blocked_countries = ["RU"] },
        ]

        [continents.EU.FR]
        mirrors = [{ name = "eu-fr", url = "https://eu-fr.example" }]
        "#,
    );
    let network = FakeNetwork::new();
    network.host("https://eu-de.example/pool/main/a.deb");
    let cache = ResolutionCache::open(&config).await.unwrap();
    let director = director_on(blocking, cache, network.clone(), &[]).await;

    let rows = director.cache().list_mirrors().await.unwrap();
    let eu_de = rows.iter().find(|row| row.name == "eu-de").unwrap();
    assert!(eu_de.blocks("DE"));

    let resolution = director.resolve_tracked(FILE, "DE", "EU").await.unwrap();
    assert_ne!(resolution.redirect.mirror.as_deref(), Some("eu-de"));
    assert_eq!(resolution.redirect.url.as_str(), fallback_url());
    resolution.search.unwrap().await.unwrap().unwrap();
    assert_eq!(network.probed_count("https://eu-de.example/pool/main/a.deb"), 0);
}

#[tokio::test]
async fn test_mirror_behind_repository_version_is_passed_over() {
    let network = FakeNetwork::new();
    network.host("https://eu-de.example/pool/main/a.deb");
    network.host("https://eu-de-2.example/parrot/pool/main/a.deb");
    network.publish_index("https://eu-de.example/index.db", 4);
    for index in [
        "https://eu-de-2.example/parrot/index.db",
        "https://eu-fr.example/index.db",
        "https://eu-ru.example/index.db",
        "https://na-us.example/index.db",
    ] {
        network.publish_index(index, 5);
    }
    let director = director(network.clone(), &[]).await;
    let index = MasterIndex::parse("!version 5\npool/main/a.deb\n").unwrap();
    reconcile_index(director.cache(), &index).await.unwrap();

    let monitor = HealthMonitor::new(
        Arc::clone(director.topology()),
        network.clone(),
        HealthConfig::default(),
    );
    let report = monitor.scan().await;
    assert_eq!((report.up, report.down), (5, 0));

    let resolution = director.resolve_tracked(FILE, "DE", "EU").await.unwrap();
    match resolution.search.unwrap().await.unwrap().unwrap() {
        SearchOutcome::Found { mirror, .. } => assert_eq!(mirror, "eu-de-2"),
        other => panic!("Expected eu-de-2, got {:?}", other),
    }
    assert_eq!(network.probed_count("https://eu-de.example/pool/main/a.deb"), 0);
}

#[tokio::test]
async fn test_concurrent_requests_start_one_search() {
    let network = FakeNetwork::new();
    let director = director(network.clone(), &[FILE]).await;

    let gate = network.hold().await;
    let requests = (0..16).map(|_| {
        let director = Arc::clone(&director);
        tokio::spawn(async move { director.resolve_tracked(FILE, "FR", "EU").await.unwrap() })
    });
    let resolutions: Vec<_> = join_all(requests)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    for resolution in &resolutions {
        assert_eq!(resolution.redirect.url.as_str(), fallback_url());
    }
    let mut searches: Vec<_> = resolutions
        .into_iter()
        .filter_map(|resolution| resolution.search)
        .collect();
    assert_eq!(searches.len(), 1);

    drop(gate);
    let outcome = searches.pop().unwrap().await.unwrap().unwrap();
    assert!(!outcome.is_found());
    assert_eq!(network.probed().len(), 5);
}

#[tokio::test]
async fn test_stale_link_heals_to_another_mirror() {
    let network = FakeNetwork::new();
    network.host("https://eu-de.example/pool/main/a.deb");
    let director = director(network.clone(), &[FILE]).await;

    let resolution = director.resolve_tracked(FILE, "DE", "EU").await.unwrap();
    resolution.search.unwrap().await.unwrap();

    // eu-de loses the file while eu-de-2 picks it up
    network.drop_file("https://eu-de.example/pool/main/a.deb");
    network.host("https://eu-de-2.example/parrot/pool/main/a.deb");

    let resolution = director.resolve_tracked(FILE, "DE", "EU").await.unwrap();
    assert_eq!(resolution.redirect.url.as_str(), fallback_url());
    let outcome = resolution.search.unwrap().await.unwrap().unwrap();
    assert!(outcome.is_found());

    let redirect = director.resolve(FILE, "DE", "EU").await.unwrap();
    assert_eq!(
        redirect.url.as_str(),
        "https://eu-de-2.example/parrot/pool/main/a.deb"
    );
    assert_eq!(
        director.cache().get_records(FILE).await.unwrap(),
        vec![Outcome::pass("eu-de-2")]
    );
}

#[tokio::test]
async fn test_down_mirror_is_passed_over() {
    let network = FakeNetwork::new();
    network.host("https://eu-de.example/pool/main/a.deb");
    network.host("https://eu-de-2.example/parrot/pool/main/a.deb");
    for index in [
        "https://eu-de-2.example/parrot/index.db",
        "https://eu-fr.example/index.db",
        "https://eu-ru.example/index.db",
        "https://na-us.example/index.db",
    ] {
        network.publish_index(index, 7);
    }
    let director = director(network.clone(), &[FILE]).await;

    let monitor = HealthMonitor::new(
        Arc::clone(director.topology()),
        network.clone(),
        HealthConfig::default(),
    );
    let report = monitor.scan().await;
    assert_eq!((report.up, report.down), (4, 1));

    let resolution = director.resolve_tracked(FILE, "DE", "EU").await.unwrap();
    match resolution.search.unwrap().await.unwrap().unwrap() {
        SearchOutcome::Found { mirror, .. } => assert_eq!(mirror, "eu-de-2"),
        other => panic!("Expected eu-de-2, got {:?}", other),
    }
    assert_eq!(network.probed_count("https://eu-de.example/pool/main/a.deb"), 0);
}

#[tokio::test]
async fn test_repeated_writes_are_idempotent() {
    let network = FakeNetwork::new();
    let director = director(network, &[FILE, FILE]).await;
    let cache = director.cache();

    cache.add_record(FILE, &Outcome::pass("eu-fr")).await.unwrap();
    cache.add_record(FILE, &Outcome::pass("eu-fr")).await.unwrap();
    cache.add_record(FILE, &Outcome::skip("JP")).await.unwrap();
    cache.add_record(FILE, &Outcome::skip("JP")).await.unwrap();
    director.sync_mirrors().await.unwrap();

    let stats = director.stats().await.unwrap();
    assert_eq!(stats.files, 1);
    assert_eq!(stats.mirrors, 5);
    assert_eq!(stats.pass_records, 1);
    assert_eq!(stats.skip_records, 1);
}

#[tokio::test]
async fn test_unknown_file_is_rejected() {
    let network = FakeNetwork::new();
    let director = director(network.clone(), &[FILE]).await;

    let result = director.resolve("pool/main/other.deb", "DE", "EU").await;
    assert!(matches!(result, Err(ResolveError::NotFound { .. })));
    assert!(network.probed().is_empty());
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let config = CacheConfig::with_database_path(temp_dir.path().join("cache.db"));

    let network = FakeNetwork::new();
    network.host("https://eu-fr.example/pool/main/a.deb");
    {
        let cache = ResolutionCache::open(&config).await.unwrap();
        let director = director_with(cache, network.clone(), &[FILE]).await;
        let resolution = director.resolve_tracked(FILE, "FR", "EU").await.unwrap();
        resolution.search.unwrap().await.unwrap();
        director.cache().close().await;
    }

    let network = FakeNetwork::new();
    network.host("https://eu-fr.example/pool/main/a.deb");
    let cache = ResolutionCache::open(&config).await.unwrap();
    let director = director_with(cache, network.clone(), &[]).await;

    let resolution = director.resolve_tracked(FILE, "FR", "EU").await.unwrap();
    assert!(resolution.search.is_none());
    assert_eq!(resolution.redirect.mirror.as_deref(), Some("eu-fr"));
    // Only the re-validation probe touched the network
    assert_eq!(
        network.probed(),
        vec!["https://eu-fr.example/pool/main/a.deb".to_string()]
    );
}
