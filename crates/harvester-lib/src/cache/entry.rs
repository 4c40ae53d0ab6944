//! Cache entry bookkeeping

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Expiry horizon used when `now + ttl` is not representable
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A single cached value with its expiry and access metadata
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
    pub value: V,
    /// Fixed at insertion; reads never extend it
    pub expires_at: Instant,
    pub size_bytes: usize,
    pub access_count: u64,
    pub last_accessed_at: Instant,
    /// Logical clock value of the last access, orders entries by recency
    pub last_access_seq: u64,
    pub inserted_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration, size_bytes: usize, seq: u64) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: now
                .checked_add(ttl)
                .unwrap_or_else(|| now + MAX_TTL),
            size_bytes,
            access_count: 0,
            last_accessed_at: now,
            last_access_seq: seq,
            inserted_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    pub fn touch(&mut self, now: Instant, seq: u64) {
        self.access_count += 1;
        self.last_accessed_at = now;
        self.last_access_seq = seq;
    }
}

/// Pessimistic size estimate: serialized JSON length, doubled
pub(crate) fn estimate_size<V: Serialize>(value: &V) -> serde_json::Result<usize> {
    serde_json::to_vec(value).map(|bytes| bytes.len() * 2)
}
