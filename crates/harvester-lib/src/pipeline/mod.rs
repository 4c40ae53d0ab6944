//! Refresh pipeline
//!
//! One refresh cycle: for each configured source in priority order, fetch the
//! rendered page, extract a record, sanitize it, apply the strict gate and
//! store the first record that passes. Failures are absorbed here; callers
//! only learn whether a record was stored.

use crate::cache::TtlCache;
use crate::extractor::extract;
use crate::fetcher::{FetchError, PageFetcher, DEFAULT_FETCH_TIMEOUT};
use crate::health::{components, HealthRegistry};
use crate::models::{MetricsRecord, Provenance};
use crate::observability::{HarvesterMetrics, StructuredLogger};
use crate::validation::{rejection_reason, sanitize_record};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Cache key the harvested record is stored under
pub const METRICS_CACHE_KEY: &str = "storage_metrics";

/// Default lifetime of a stored record
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the refresh pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Source URLs, highest priority first
    pub sources: Vec<String>,
    pub cache_key: String,
    pub cache_ttl: Duration,
    /// Navigation timeout handed to the fetcher per source
    pub fetch_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            cache_key: METRICS_CACHE_KEY.to_string(),
            cache_ttl: DEFAULT_CACHE_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// Why a source did not yield a stored record
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("no sources configured")]
    NoSources,

    #[error("fetch from {url} failed: {error}")]
    Fetch {
        url: String,
        #[source]
        error: FetchError,
    },

    #[error("{provenance} record from {url} rejected: {reason}")]
    ValidationRejected {
        url: String,
        provenance: Provenance,
        reason: &'static str,
    },

    #[error("cache refused record from {url}")]
    CacheRefused { url: String },
}

/// Fetch → extract → sanitize → validate → store
pub struct RefreshPipeline {
    fetcher: Arc<dyn PageFetcher>,
    cache: Arc<TtlCache<MetricsRecord>>,
    config: PipelineConfig,
    health: HealthRegistry,
    metrics: HarvesterMetrics,
    logger: StructuredLogger,
}

impl RefreshPipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        cache: Arc<TtlCache<MetricsRecord>>,
        config: PipelineConfig,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            fetcher,
            cache,
            config,
            health,
            metrics: HarvesterMetrics::new(),
            logger,
        }
    }

    pub fn cache_key(&self) -> &str {
        &self.config.cache_key
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one cycle, returning the stored record if any source produced one
    pub async fn run(&self) -> Option<MetricsRecord> {
        let started = Instant::now();

        match self.refresh().await {
            Ok((url, record)) => {
                let elapsed = started.elapsed();
                self.metrics.observe_refresh_duration(elapsed.as_secs_f64());
                self.metrics
                    .set_record_observed_at(record.observed_at.timestamp());
                self.health.set_healthy(components::FETCHER).await;
                self.logger.log_refresh_completed(
                    &url,
                    record.provenance.as_str(),
                    elapsed.as_millis(),
                );
                Some(record)
            }
            Err(e) => {
                let elapsed = started.elapsed();
                self.metrics.observe_refresh_duration(elapsed.as_secs_f64());
                self.health
                    .record_failure(components::FETCHER, e.to_string())
                    .await;
                self.logger.log_refresh_failed(
                    self.config.sources.len(),
                    &e.to_string(),
                    elapsed.as_millis(),
                );
                None
            }
        }
    }

    /// Try every source in order; the error is the one from the last source
    pub async fn refresh(&self) -> Result<(String, MetricsRecord), RefreshError> {
        let mut last_error = RefreshError::NoSources;

        for url in &self.config.sources {
            match self.try_source(url).await {
                Ok(record) => return Ok((url.clone(), record)),
                Err(e) => {
                    warn!(url = %url, error = %e, "Source did not yield a cacheable record");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn try_source(&self, url: &str) -> Result<MetricsRecord, RefreshError> {
        debug!(url = %url, "Fetching source");

        let raw = self
            .fetcher
            .fetch_rendered(url, self.config.fetch_timeout)
            .await
            .map_err(|error| {
                self.metrics.inc_fetch_error(error.kind());
                RefreshError::Fetch {
                    url: url.to_string(),
                    error,
                }
            })?;

        let extracted = extract(&raw);
        let provenance = extracted.provenance;
        debug!(
            url = %url,
            provenance = %provenance,
            fields = extracted.populated_fields(),
            "Extracted record"
        );

        let reject = |reason: &'static str| {
            self.metrics.inc_validation_rejection();
            RefreshError::ValidationRejected {
                url: url.to_string(),
                provenance,
                reason,
            }
        };

        let record =
            sanitize_record(&extracted).ok_or_else(|| reject("record failed sanitization"))?;
        if let Some(reason) = rejection_reason(&record) {
            return Err(reject(reason));
        }

        if !self
            .cache
            .set(self.config.cache_key.clone(), record.clone(), self.config.cache_ttl)
        {
            return Err(RefreshError::CacheRefused {
                url: url.to_string(),
            });
        }

        info!(
            url = %url,
            provenance = %provenance,
            ttl_secs = self.config.cache_ttl.as_secs(),
            "Stored harvested record"
        );
        Ok(record)
    }
}
