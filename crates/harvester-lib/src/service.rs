//! Read path behind the metrics endpoint
//!
//! Serves the cached record when it passes the loose gate. On a miss the
//! caller triggers a refresh through the scheduler, so lazy refreshes share
//! the same single-flight guard as the daily timer.

use crate::cache::TtlCache;
use crate::models::MetricsRecord;
use crate::scheduler::{RefreshOutcome, RefreshScheduler, RefreshTrigger};
use crate::validation::is_servable;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// A record as handed to API callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServedMetrics {
    #[serde(flatten)]
    pub record: MetricsRecord,
    /// When the record entered the cache
    pub last_updated_at: Option<DateTime<Utc>>,
}

pub struct MetricsService {
    cache: Arc<TtlCache<MetricsRecord>>,
    scheduler: Arc<RefreshScheduler>,
}

impl MetricsService {
    pub fn new(cache: Arc<TtlCache<MetricsRecord>>, scheduler: Arc<RefreshScheduler>) -> Self {
        Self { cache, scheduler }
    }

    /// The current servable record, refreshing lazily on a cache miss.
    ///
    /// `None` means no servable data is available right now.
    pub async fn current(&self) -> Option<ServedMetrics> {
        let key = self.scheduler.cache_key();

        // Hits and misses are counted by the cache itself
        if let Some(record) = self.cache.get(key) {
            return self.serve(record);
        }

        match self.scheduler.perform_refresh(RefreshTrigger::CacheMiss).await {
            RefreshOutcome::Updated(record) => self.serve(record),
            RefreshOutcome::NoUpdate => None,
            // Another cycle was in flight; use whatever it left behind
            RefreshOutcome::Skipped => self.cache.get(key).and_then(|record| self.serve(record)),
        }
    }

    fn serve(&self, record: MetricsRecord) -> Option<ServedMetrics> {
        if !is_servable(&record) {
            debug!(provenance = %record.provenance, "Cached record below serve threshold");
            return None;
        }
        Some(ServedMetrics {
            last_updated_at: self.cache.inserted_at(self.scheduler.cache_key()),
            record,
        })
    }
}
