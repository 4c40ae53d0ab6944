//! Self-evicting TTL cache
//!
//! A generic key/value store where every entry carries a fixed expiry.
//! Two independent caps are enforced on every `set`:
//! - an entry count cap, relieved by evicting the least recently used entry
//! - a memory budget, relieved by evicting the least frequently used entries
//!   until at least 30% of the aggregate size has been freed
//!
//! A background monitor purges expired entries and runs the frequency
//! eviction when the whole process exceeds a resident memory high-water mark.

mod entry;
mod memory;

#[cfg(test)]
mod tests;

pub use memory::process_resident_bytes;

use crate::health::{components, HealthRegistry};
use crate::observability::HarvesterMetrics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use entry::{estimate_size, CacheEntry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Default maximum number of entries
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Default memory budget for cached values (100 MB)
pub const DEFAULT_MEMORY_BUDGET: usize = 100 * 1024 * 1024;

/// Default interval of the background memory sweep (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default process resident memory that triggers proactive eviction (400 MB)
pub const DEFAULT_MEMORY_HIGH_WATER: u64 = 400 * 1024 * 1024;

/// Share of the aggregate size a memory-pressure eviction frees
pub const RECLAIM_FRACTION: f64 = 0.3;

/// Shortest period the memory monitor will tick at
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the TTL cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Maximum aggregate estimated size of cached values, in bytes
    pub memory_budget: usize,
    /// Interval of the background memory sweep
    pub sweep_interval: Duration,
    /// Process resident memory above which the sweep evicts proactively
    pub memory_high_water: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            memory_high_water: DEFAULT_MEMORY_HIGH_WATER,
        }
    }
}

/// Snapshot of the cache exposed to the status endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub size: usize,
    pub max_size: usize,
    pub memory_usage_estimate: usize,
    pub memory_budget: usize,
    pub keys: Vec<String>,
    pub inserted_at_by_key: BTreeMap<String, DateTime<Utc>>,
}

/// Generic TTL cache with count and memory caps
pub struct TtlCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    config: CacheConfig,
    /// Aggregate estimated size of all stored entries
    memory_usage: AtomicUsize,
    access_clock: AtomicU64,
    /// Serializes inserts and evictions so the caps hold after every `set`
    write_gate: Mutex<()>,
    metrics: HarvesterMetrics,
}

/// Eviction candidate captured from a snapshot of the entries
struct Candidate {
    key: String,
    access_count: u64,
    last_access_seq: u64,
}

impl<V> TtlCache<V>
where
    V: Clone + Serialize,
{
    /// Create a cache with the given configuration.
    ///
    /// A zero entry cap is raised to one.
    pub fn new(mut config: CacheConfig) -> Self {
        config.max_entries = config.max_entries.max(1);
        Self {
            entries: DashMap::new(),
            config,
            memory_usage: AtomicUsize::new(0),
            access_clock: AtomicU64::new(0),
            write_gate: Mutex::new(()),
            metrics: HarvesterMetrics::new(),
        }
    }

    /// Create a cache with default caps
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// Returns `false` only when the value alone exceeds the memory budget
    /// (or cannot be serialized for size estimation); the cache is left
    /// unchanged in that case.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) -> bool {
        let key = key.into();
        let size = match estimate_size(&value) {
            Ok(size) => size,
            Err(e) => {
                warn!(key = %key, error = %e, "Cannot estimate value size, not caching");
                return false;
            }
        };

        if size > self.config.memory_budget {
            warn!(
                key = %key,
                size_bytes = size,
                budget_bytes = self.config.memory_budget,
                "Value exceeds the whole memory budget, not caching"
            );
            return false;
        }

        let _gate = self.write_gate.lock().unwrap_or_else(|e| e.into_inner());

        // Replacing a key never counts against the caps
        self.remove_entry(&key);

        if self.entries.len() >= self.config.max_entries {
            self.evict_least_recent();
        }

        let usage = self.memory_usage.load(Ordering::Acquire);
        if usage + size > self.config.memory_budget {
            let reclaim = (usage as f64 * RECLAIM_FRACTION).ceil() as usize;
            let required = usage + size - self.config.memory_budget;
            self.evict_least_frequent(reclaim.max(required));
        }

        let entry = CacheEntry::new(value, ttl, size, self.tick());
        self.memory_usage.fetch_add(size, Ordering::AcqRel);
        self.entries.insert(key.clone(), entry);
        self.publish_size();

        debug!(key = %key, size_bytes = size, ttl_secs = ttl.as_secs(), "Cached value");
        true
    }

    /// Fetch a live value, bumping its access metadata.
    ///
    /// An expired entry is removed and reported absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let Some(mut entry) = self.entries.get_mut(key) else {
                self.metrics.inc_cache_request(false);
                return None;
            };
            if !entry.is_expired(now) {
                entry.touch(now, self.tick());
                self.metrics.inc_cache_request(true);
                return Some(entry.value.clone());
            }
        }

        self.remove_expired(key, now);
        self.metrics.inc_cache_request(false);
        None
    }

    /// Whether a live entry exists for `key`; does not touch access metadata
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let live = match self.entries.get(key) {
            Some(entry) => !entry.is_expired(now),
            None => return false,
        };
        if !live {
            self.remove_expired(key, now);
        }
        live
    }

    /// Insertion time of a live entry, for "last update" reporting
    pub fn inserted_at(&self, key: &str) -> Option<DateTime<Utc>> {
        let now = Instant::now();
        let inserted_at = {
            let entry = self.entries.get(key)?;
            (!entry.is_expired(now)).then_some(entry.inserted_at)
        };
        if inserted_at.is_none() {
            self.remove_expired(key, now);
        }
        inserted_at
    }

    /// Remove an entry, returning whether one existed
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.remove_entry(key).is_some();
        if removed {
            self.publish_size();
        }
        removed
    }

    /// Remove every entry
    pub fn clear(&self) {
        let _gate = self.write_gate.lock().unwrap_or_else(|e| e.into_inner());
        self.entries.retain(|_, entry| {
            self.memory_usage
                .fetch_sub(entry.size_bytes, Ordering::AcqRel);
            false
        });
        self.publish_size();
    }

    /// Number of stored entries (expired ones included until touched or swept)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aggregate estimated size of stored entries, in bytes
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Ordering::Acquire)
    }

    /// Snapshot of live entries for status reporting
    pub fn status(&self) -> CacheStatus {
        let now = Instant::now();
        let mut inserted_at_by_key = BTreeMap::new();
        for entry in self.entries.iter() {
            if !entry.is_expired(now) {
                inserted_at_by_key.insert(entry.key().clone(), entry.inserted_at);
            }
        }

        CacheStatus {
            size: inserted_at_by_key.len(),
            max_size: self.config.max_entries,
            memory_usage_estimate: self.memory_usage(),
            memory_budget: self.config.memory_budget,
            keys: inserted_at_by_key.keys().cloned().collect(),
            inserted_at_by_key,
        }
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let purged = expired
            .iter()
            .filter(|key| self.remove_expired(key, now))
            .count();

        if purged > 0 {
            self.metrics.inc_cache_evictions("expired", purged as u64);
            debug!(purged = purged, "Purged expired cache entries");
        }
        purged
    }

    /// Evict by frequency when the process is above the memory high-water mark.
    ///
    /// Returns the number of entries evicted.
    pub fn relieve_memory_pressure(&self, resident_bytes: u64) -> usize {
        if resident_bytes <= self.config.memory_high_water {
            return 0;
        }

        let _gate = self.write_gate.lock().unwrap_or_else(|e| e.into_inner());
        let usage = self.memory_usage.load(Ordering::Acquire);
        let reclaim = (usage as f64 * RECLAIM_FRACTION).ceil() as usize;

        warn!(
            resident_bytes = resident_bytes,
            high_water_bytes = self.config.memory_high_water,
            cache_bytes = usage,
            "Process memory above high-water mark, evicting cache entries"
        );
        self.evict_least_frequent(reclaim)
    }

    /// Evict the single entry with the oldest access
    fn evict_least_recent(&self) {
        let victim = self
            .snapshot()
            .into_iter()
            .min_by_key(|c| c.last_access_seq);

        if let Some(victim) = victim {
            if let Some(entry) = self.remove_entry(&victim.key) {
                self.metrics.inc_cache_evictions("lru", 1);
                info!(
                    event = "cache_evicted",
                    policy = "lru",
                    key = %victim.key,
                    freed_bytes = entry.size_bytes,
                    "Evicted least recently used cache entry"
                );
            }
        }
    }

    /// Evict entries by ascending access count until `target` bytes are freed.
    ///
    /// Returns the number of entries evicted.
    fn evict_least_frequent(&self, target: usize) -> usize {
        let mut candidates = self.snapshot();
        candidates.sort_by_key(|c| (c.access_count, c.last_access_seq));

        let mut freed = 0;
        let mut evicted = 0;
        for candidate in candidates {
            if freed >= target {
                break;
            }
            if let Some(entry) = self.remove_entry(&candidate.key) {
                freed += entry.size_bytes;
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.metrics.inc_cache_evictions("lfu", evicted as u64);
            self.publish_size();
            info!(
                event = "cache_evicted",
                policy = "lfu",
                evicted = evicted,
                freed_bytes = freed,
                target_bytes = target,
                "Evicted least frequently used cache entries"
            );
        }
        evicted
    }

    fn snapshot(&self) -> Vec<Candidate> {
        self.entries
            .iter()
            .map(|entry| Candidate {
                key: entry.key().clone(),
                access_count: entry.access_count,
                last_access_seq: entry.last_access_seq,
            })
            .collect()
    }

    fn remove_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let (_, entry) = self.entries.remove(key)?;
        self.memory_usage
            .fetch_sub(entry.size_bytes, Ordering::AcqRel);
        Some(entry)
    }

    /// Remove `key` only if it is still expired at `now`
    fn remove_expired(&self, key: &str, now: Instant) -> bool {
        match self.entries.remove_if(key, |_, entry| entry.is_expired(now)) {
            Some((_, entry)) => {
                self.memory_usage
                    .fetch_sub(entry.size_bytes, Ordering::AcqRel);
                self.publish_size();
                true
            }
            None => false,
        }
    }

    fn tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed)
    }

    fn publish_size(&self) {
        self.metrics
            .set_cache_size(self.entries.len() as i64, self.memory_usage() as i64);
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    /// Start the periodic sweep: purge expired entries and, when the process
    /// exceeds the high-water mark, run the frequency eviction.
    ///
    /// The cache component in `health` is degraded while the process is
    /// above the high-water mark.
    pub fn spawn_memory_monitor(
        self: &Arc<Self>,
        health: HealthRegistry,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = cache.config.sweep_interval.max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            info!(
                interval_ms = period.as_millis() as u64,
                high_water_bytes = cache.config.memory_high_water,
                "Starting cache memory monitor"
            );

            let mut ticker = interval(period);
            // The first tick completes immediately; skip it
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.purge_expired();
                        match process_resident_bytes() {
                            Some(rss) if rss > cache.config.memory_high_water => {
                                let evicted = cache.relieve_memory_pressure(rss);
                                health
                                    .set_degraded(
                                        components::CACHE,
                                        format!(
                                            "Process memory {rss} bytes above high-water mark, evicted {evicted} entries"
                                        ),
                                    )
                                    .await;
                            }
                            Some(_) => health.set_healthy(components::CACHE).await,
                            None => debug!("Process memory unavailable, skipping pressure check"),
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Shutting down cache memory monitor");
                        break;
                    }
                }
            }
        })
    }
}
