//! Behavioural tests for the TTL cache
//!
//! Values are short strings so sizes are easy to reason about: a string of
//! `n` ASCII characters serializes to `n + 2` bytes and is estimated at
//! `2n + 4` bytes.

use super::*;
use std::thread::sleep;

const HOUR: Duration = Duration::from_secs(3600);

fn cache(max_entries: usize, memory_budget: usize) -> TtlCache<String> {
    TtlCache::new(CacheConfig {
        max_entries,
        memory_budget,
        ..Default::default()
    })
}

/// A value whose estimated size is exactly `bytes` (must be even and >= 4)
fn value_of_size(bytes: usize) -> String {
    "x".repeat(bytes / 2 - 2)
}

#[test]
fn test_set_then_get() {
    let cache = TtlCache::with_defaults();
    assert!(cache.set("metrics", "v1".to_string(), HOUR));

    assert_eq!(cache.get("metrics"), Some("v1".to_string()));
    assert!(cache.has("metrics"));
    assert!(cache.inserted_at("metrics").is_some());
    assert_eq!(cache.get("other"), None);
}

#[test]
fn test_entries_expire_after_ttl() {
    let cache = TtlCache::with_defaults();
    cache.set("short", "v".to_string(), Duration::from_millis(40));
    cache.set("long", "v".to_string(), HOUR);

    assert_eq!(cache.get("short"), Some("v".to_string()));
    sleep(Duration::from_millis(80));

    assert_eq!(cache.get("short"), None);
    assert!(!cache.has("short"));
    assert!(cache.inserted_at("short").is_none());
    assert_eq!(cache.len(), 1);
    assert!(cache.has("long"));
}

#[test]
fn test_reads_do_not_extend_expiry() {
    let cache = TtlCache::with_defaults();
    cache.set("k", "v".to_string(), Duration::from_millis(60));

    for _ in 0..4 {
        sleep(Duration::from_millis(20));
        cache.get("k");
    }

    assert!(!cache.has("k"));
}

#[test]
fn test_expired_entry_releases_memory() {
    let cache = TtlCache::with_defaults();
    cache.set("k", value_of_size(100), Duration::from_millis(20));
    assert_eq!(cache.memory_usage(), 100);

    sleep(Duration::from_millis(40));
    assert_eq!(cache.get("k"), None);
    assert_eq!(cache.memory_usage(), 0);
}

#[test]
fn test_replacing_key_updates_size() {
    let cache = cache(2, 1_000);
    cache.set("a", value_of_size(100), HOUR);
    cache.set("b", value_of_size(100), HOUR);
    cache.set("a", value_of_size(200), HOUR);

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.memory_usage(), 300);
    assert!(cache.has("b"));
}

#[test]
fn test_count_cap_holds_after_overfill() {
    let max = 10;
    let cache = cache(max, DEFAULT_MEMORY_BUDGET);

    for i in 0..max + 5 {
        cache.set(format!("key-{i}"), format!("value-{i}"), HOUR);
        assert!(cache.len() <= max);
    }

    assert_eq!(cache.len(), max);
    // The five oldest, never-read entries were evicted one at a time
    for i in 0..5 {
        assert!(!cache.has(&format!("key-{i}")));
    }
    assert!(cache.has(&format!("key-{}", max + 4)));
}

#[test]
fn test_count_cap_evicts_least_recently_used() {
    let cache = cache(3, DEFAULT_MEMORY_BUDGET);
    cache.set("a", "1".to_string(), HOUR);
    cache.set("b", "2".to_string(), HOUR);
    cache.set("c", "3".to_string(), HOUR);

    // Touch "a" so "b" becomes the oldest access
    cache.get("a");
    cache.set("d", "4".to_string(), HOUR);

    assert!(cache.has("a"));
    assert!(!cache.has("b"));
    assert!(cache.has("c"));
    assert!(cache.has("d"));
}

#[test]
fn test_memory_cap_evicts_least_frequently_used() {
    let cache = cache(50, 1_000);
    cache.set("hot", value_of_size(300), HOUR);
    cache.set("warm", value_of_size(300), HOUR);
    cache.set("cold", value_of_size(300), HOUR);

    for _ in 0..3 {
        cache.get("hot");
    }
    cache.get("warm");

    // 900 + 300 > 1000: 30% of 900 is 270, so one 300-byte entry must go
    assert!(cache.set("new", value_of_size(300), HOUR));

    assert!(!cache.has("cold"));
    assert!(cache.has("hot"));
    assert!(cache.has("warm"));
    assert!(cache.has("new"));
    assert_eq!(cache.memory_usage(), 900);
}

#[test]
fn test_memory_cap_frees_enough_for_large_value() {
    let cache = cache(50, 1_000);
    for key in ["a", "b", "c", "d"] {
        cache.set(key, value_of_size(200), HOUR);
    }

    // 800 + 600 > 1000: 30% would only free 240, the value needs 400
    assert!(cache.set("big", value_of_size(600), HOUR));
    assert!(cache.memory_usage() <= 1_000);
    assert!(cache.has("big"));
}

#[test]
fn test_memory_budget_never_exceeded() {
    let budget = 2_000;
    let cache = cache(50, budget);

    for i in 0..60 {
        let size = 100 + (i % 7) * 60;
        assert!(cache.set(format!("k{i}"), value_of_size(size), HOUR));
        assert!(cache.memory_usage() <= budget);
        assert!(cache.len() <= 50);
    }
}

#[test]
fn test_value_larger_than_budget_is_refused() {
    let cache = cache(50, 100);
    cache.set("small", value_of_size(50), HOUR);

    assert!(!cache.set("huge", value_of_size(200), HOUR));
    assert!(!cache.has("huge"));
    assert!(cache.has("small"));
}

#[test]
fn test_delete_and_clear() {
    let cache = TtlCache::with_defaults();
    cache.set("a", "1".to_string(), HOUR);
    cache.set("b", "2".to_string(), HOUR);

    assert!(cache.delete("a"));
    assert!(!cache.delete("a"));
    assert!(!cache.has("a"));

    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.memory_usage(), 0);
}

#[test]
fn test_status_reports_live_entries() {
    let cache = cache(5, 10_000);
    cache.set("b", "2".to_string(), HOUR);
    cache.set("a", "1".to_string(), HOUR);
    cache.set("gone", "3".to_string(), Duration::from_millis(10));
    sleep(Duration::from_millis(30));

    let status = cache.status();
    assert_eq!(status.size, 2);
    assert_eq!(status.max_size, 5);
    assert_eq!(status.memory_budget, 10_000);
    assert_eq!(status.keys, vec!["a".to_string(), "b".to_string()]);
    assert!(status.inserted_at_by_key.contains_key("a"));

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["maxSize"], 5);
    assert!(json["insertedAtByKey"]["b"].is_string());
}

#[test]
fn test_purge_expired() {
    let cache = TtlCache::with_defaults();
    cache.set("a", "1".to_string(), Duration::from_millis(10));
    cache.set("b", "2".to_string(), HOUR);
    sleep(Duration::from_millis(30));

    assert_eq!(cache.purge_expired(), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_memory_pressure_below_high_water_is_noop() {
    let cache = TtlCache::<String>::with_defaults();
    cache.set("a", "1".to_string(), HOUR);

    assert_eq!(cache.relieve_memory_pressure(DEFAULT_MEMORY_HIGH_WATER), 0);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_memory_pressure_evicts_least_used_share() {
    let cache = cache(50, 10_000);
    for key in ["a", "b", "c", "d", "e"] {
        cache.set(key, value_of_size(100), HOUR);
    }
    for key in ["a", "b", "c", "d"] {
        cache.get(key);
    }
    cache.get("a");

    // 30% of 500 bytes is 150: two 100-byte entries go, "e" first
    let evicted = cache.relieve_memory_pressure(DEFAULT_MEMORY_HIGH_WATER + 1);

    assert_eq!(evicted, 2);
    assert!(!cache.has("e"));
    assert!(!cache.has("b"));
    assert!(cache.has("a"));
    assert_eq!(cache.memory_usage(), 300);
}

#[tokio::test]
async fn test_memory_monitor_stops_on_shutdown() {
    let cache = Arc::new(TtlCache::<String>::new(CacheConfig {
        sweep_interval: Duration::from_millis(10),
        ..Default::default()
    }));
    cache.set("a", "1".to_string(), Duration::from_millis(5));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = cache.spawn_memory_monitor(HealthRegistry::new(), shutdown_rx);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.len(), 0);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_memory_monitor_survives_zero_interval() {
    let cache = Arc::new(TtlCache::<String>::new(CacheConfig {
        sweep_interval: Duration::ZERO,
        ..Default::default()
    }));
    cache.set("a", "1".to_string(), Duration::from_millis(5));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = cache.spawn_memory_monitor(HealthRegistry::new(), shutdown_rx);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!handle.is_finished());
    assert_eq!(cache.len(), 0);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_memory_monitor_degrades_cache_health_above_high_water() {
    let cache = Arc::new(TtlCache::<String>::new(CacheConfig {
        sweep_interval: Duration::from_millis(10),
        memory_high_water: 0,
        ..Default::default()
    }));
    cache.set("a", value_of_size(100), HOUR);
    let health = HealthRegistry::new();
    health.register(components::CACHE).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = cache.spawn_memory_monitor(health.clone(), shutdown_rx);

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    let report = health.health().await;
    assert_eq!(
        report.components[components::CACHE].status,
        crate::health::ComponentStatus::Degraded
    );
    assert!(cache.is_empty());
}

#[test]
fn test_huge_ttl_does_not_panic() {
    let cache = TtlCache::with_defaults();

    assert!(cache.set("forever", "v".to_string(), Duration::from_secs(u64::MAX)));
    assert_eq!(cache.get("forever"), Some("v".to_string()));
}

#[test]
fn test_zero_entry_cap_still_holds_latest_value() {
    let cache = cache(0, DEFAULT_MEMORY_BUDGET);
    cache.set("a", "1".to_string(), HOUR);
    cache.set("b", "2".to_string(), HOUR);

    assert_eq!(cache.config().max_entries, 1);
    assert_eq!(cache.len(), 1);
    assert!(cache.has("b"));
}
