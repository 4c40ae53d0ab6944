//! Observability infrastructure for the metrics harvester
//!
//! Provides:
//! - Prometheus metrics (refresh latency, refresh outcomes, fetch errors,
//!   cache size and evictions, record freshness)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for refresh cycle duration (in seconds)
const REFRESH_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 45.0, 90.0, 180.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<HarvesterMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct HarvesterMetricsInner {
    refresh_duration_seconds: Histogram,
    refresh_cycles: IntCounterVec,
    fetch_errors: IntCounterVec,
    validation_rejections: IntCounter,
    cache_entries: IntGauge,
    cache_size_bytes: IntGauge,
    cache_requests: IntCounterVec,
    cache_evictions: IntCounterVec,
    record_observed_timestamp: IntGauge,
}

impl HarvesterMetricsInner {
    fn new() -> Self {
        Self {
            refresh_duration_seconds: register_histogram!(
                "harvester_refresh_duration_seconds",
                "Time spent running one refresh cycle",
                REFRESH_BUCKETS.to_vec()
            )
            .expect("Failed to register refresh_duration_seconds"),

            refresh_cycles: register_int_counter_vec!(
                "harvester_refresh_cycles_total",
                "Refresh cycles by outcome",
                &["outcome"]
            )
            .expect("Failed to register refresh_cycles"),

            fetch_errors: register_int_counter_vec!(
                "harvester_fetch_errors_total",
                "Page fetch failures by kind",
                &["kind"]
            )
            .expect("Failed to register fetch_errors"),

            validation_rejections: register_int_counter!(
                "harvester_validation_rejections_total",
                "Extracted records rejected by the cache admission check"
            )
            .expect("Failed to register validation_rejections"),

            cache_entries: register_int_gauge!(
                "harvester_cache_entries",
                "Number of live entries in the cache"
            )
            .expect("Failed to register cache_entries"),

            cache_size_bytes: register_int_gauge!(
                "harvester_cache_size_bytes",
                "Estimated aggregate size of cached values in bytes"
            )
            .expect("Failed to register cache_size_bytes"),

            cache_requests: register_int_counter_vec!(
                "harvester_cache_requests_total",
                "Cache lookups by result",
                &["result"]
            )
            .expect("Failed to register cache_requests"),

            cache_evictions: register_int_counter_vec!(
                "harvester_cache_evictions_total",
                "Cache entries removed by policy",
                &["policy"]
            )
            .expect("Failed to register cache_evictions"),

            record_observed_timestamp: register_int_gauge!(
                "harvester_record_observed_timestamp_seconds",
                "Observation time of the most recently cached record"
            )
            .expect("Failed to register record_observed_timestamp"),
        }
    }
}

/// Harvester metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct HarvesterMetrics {
    _private: (),
}

impl Default for HarvesterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HarvesterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarvesterMetrics").finish()
    }
}

impl HarvesterMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(HarvesterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &HarvesterMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record the duration of a finished refresh cycle
    pub fn observe_refresh_duration(&self, duration_secs: f64) {
        self.inner().refresh_duration_seconds.observe(duration_secs);
    }

    /// Count a refresh cycle outcome (`updated`, `no_update`, `skipped`)
    pub fn inc_refresh_cycle(&self, outcome: &str) {
        self.inner()
            .refresh_cycles
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_fetch_error(&self, kind: &str) {
        self.inner().fetch_errors.with_label_values(&[kind]).inc();
    }

    pub fn inc_validation_rejection(&self) {
        self.inner().validation_rejections.inc();
    }

    /// Update cache size gauges
    pub fn set_cache_size(&self, entries: i64, bytes: i64) {
        self.inner().cache_entries.set(entries);
        self.inner().cache_size_bytes.set(bytes);
    }

    pub fn inc_cache_request(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.inner()
            .cache_requests
            .with_label_values(&[result])
            .inc();
    }

    /// Count evictions for a policy (`lru`, `lfu`, `expired`)
    pub fn inc_cache_evictions(&self, policy: &str, count: u64) {
        self.inner()
            .cache_evictions
            .with_label_values(&[policy])
            .inc_by(count);
    }

    pub fn set_record_observed_at(&self, unix_secs: i64) {
        self.inner().record_observed_timestamp.set(unix_secs);
    }
}

/// Structured logger for harvester events
///
/// Provides consistent JSON-formatted logging for refresh cycles and
/// lifecycle events.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a refresh cycle that produced a cacheable record
    pub fn log_refresh_completed(&self, source: &str, provenance: &str, duration_ms: u128) {
        info!(
            event = "refresh_completed",
            instance = %self.instance,
            source = %source,
            provenance = %provenance,
            duration_ms = duration_ms as u64,
            "Metrics refreshed"
        );
    }

    /// Log a refresh cycle that produced nothing cacheable
    pub fn log_refresh_failed(&self, sources_tried: usize, last_error: &str, duration_ms: u128) {
        warn!(
            event = "refresh_failed",
            instance = %self.instance,
            sources_tried = sources_tried,
            last_error = %last_error,
            duration_ms = duration_ms as u64,
            "Refresh produced no cacheable record"
        );
    }

    /// Log a trigger dropped because a cycle was already running
    pub fn log_refresh_skipped(&self, trigger: &str) {
        info!(
            event = "refresh_skipped",
            instance = %self.instance,
            trigger = %trigger,
            "Refresh already in progress, trigger dropped"
        );
    }

    /// Log harvester startup
    pub fn log_startup(&self, version: &str, sources: usize) {
        info!(
            event = "harvester_started",
            instance = %self.instance,
            version = %version,
            sources = sources,
            "Metrics harvester started"
        );
    }

    /// Log harvester shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "harvester_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Metrics harvester shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harvester_metrics_creation() {
        let metrics = HarvesterMetrics::new();

        metrics.observe_refresh_duration(1.5);
        metrics.inc_refresh_cycle("updated");
        metrics.inc_fetch_error("timeout");
        metrics.inc_validation_rejection();
        metrics.set_cache_size(1, 512);
        metrics.inc_cache_request(true);
        metrics.inc_cache_evictions("lru", 2);
        metrics.set_record_observed_at(1_700_000_000);

        // A second handle shares the same registry
        let other = HarvesterMetrics::new();
        other.inc_refresh_cycle("skipped");
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("harvester-0");
        assert_eq!(logger.instance, "harvester-0");
    }
}
