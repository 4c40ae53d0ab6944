//! Harvester configuration

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use harvester_lib::{
    fetcher::DEFAULT_FETCH_TIMEOUT, CacheConfig, FetcherConfig, PipelineConfig, SchedulerConfig,
    METRICS_CACHE_KEY,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const MB: usize = 1024 * 1024;

/// Longest accepted record lifetime (one year)
const MAX_CACHE_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Harvester configuration, read from `HARVESTER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct HarvesterConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Pages to harvest, highest priority first (comma separated)
    #[serde(default = "default_source_urls")]
    pub source_urls: Vec<String>,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// UTC hour of the daily refresh
    #[serde(default)]
    pub refresh_hour: u32,

    #[serde(default)]
    pub refresh_minute: u32,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,

    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_settle_timeout")]
    pub settle_timeout_ms: u64,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    #[serde(default = "default_cache_memory_budget")]
    pub cache_memory_budget_mb: usize,

    #[serde(default = "default_memory_sweep_interval")]
    pub memory_sweep_interval_secs: u64,

    /// Process resident memory above which the cache sheds entries
    #[serde(default = "default_memory_high_water")]
    pub memory_high_water_mb: u64,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "metrics-harvester".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_source_urls() -> Vec<String> {
    vec!["https://walruscan.com/mainnet/home".to_string()]
}

fn default_cache_ttl() -> u64 {
    24 * 60 * 60
}

fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT.as_millis() as u64
}

fn default_fetch_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    2_000
}

fn default_settle_timeout() -> u64 {
    15_000
}

fn default_cache_max_entries() -> usize {
    50
}

fn default_cache_memory_budget() -> usize {
    100
}

fn default_memory_sweep_interval() -> u64 {
    300
}

fn default_memory_high_water() -> u64 {
    400
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            api_port: default_api_port(),
            source_urls: default_source_urls(),
            cache_ttl_secs: default_cache_ttl(),
            refresh_hour: 0,
            refresh_minute: 0,
            fetch_timeout_ms: default_fetch_timeout(),
            fetch_retries: default_fetch_retries(),
            retry_backoff_ms: default_retry_backoff(),
            settle_timeout_ms: default_settle_timeout(),
            cache_max_entries: default_cache_max_entries(),
            cache_memory_budget_mb: default_cache_memory_budget(),
            memory_sweep_interval_secs: default_memory_sweep_interval(),
            memory_high_water_mb: default_memory_high_water(),
        }
    }
}

impl HarvesterConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_environment(environment())
    }

    fn from_environment(environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment)
            .build()?;

        let config: HarvesterConfig = config.try_deserialize().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid configuration, using defaults");
            HarvesterConfig::default()
        });
        config.validate()?;
        Ok(config)
    }

    /// Reject values the cache and scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl_secs == 0 || self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            bail!(
                "cache_ttl_secs must be between 1 and {MAX_CACHE_TTL_SECS}, got {}",
                self.cache_ttl_secs
            );
        }
        if self.cache_max_entries == 0 {
            bail!("cache_max_entries must be at least 1");
        }
        if self.cache_memory_budget_mb == 0 {
            bail!("cache_memory_budget_mb must be at least 1");
        }
        if self.memory_sweep_interval_secs == 0 {
            bail!("memory_sweep_interval_secs must be at least 1");
        }
        if self.fetch_timeout_ms == 0 {
            bail!("fetch_timeout_ms must be at least 1");
        }
        self.scheduler_config().map(|_| ())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.cache_max_entries,
            memory_budget: self.cache_memory_budget_mb * MB,
            sweep_interval: Duration::from_secs(self.memory_sweep_interval_secs),
            memory_high_water: self.memory_high_water_mb * MB as u64,
        }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            max_retries: self.fetch_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            settle_timeout: Duration::from_millis(self.settle_timeout_ms),
            ..Default::default()
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            sources: self
                .source_urls
                .iter()
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .collect(),
            cache_key: METRICS_CACHE_KEY.to_string(),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
        }
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        let refresh_at = NaiveTime::from_hms_opt(self.refresh_hour, self.refresh_minute, 0)
            .with_context(|| {
                format!(
                    "Invalid refresh time {:02}:{:02}",
                    self.refresh_hour, self.refresh_minute
                )
            })?;
        Ok(SchedulerConfig { refresh_at })
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("HARVESTER")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("source_urls")
}
