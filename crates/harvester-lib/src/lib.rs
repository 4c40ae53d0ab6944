//! Storage metrics harvester library
//!
//! This crate provides the core functionality for:
//! - Extracting storage prices, capacity and epoch from rendered pages
//! - Sanitizing and validating harvested records
//! - A self-evicting TTL cache
//! - The single-flight daily refresh scheduler
//! - Health checks and observability

pub mod cache;
pub mod extractor;
pub mod fetcher;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod scheduler;
pub mod service;
pub mod validation;

pub use cache::{CacheConfig, CacheStatus, TtlCache};
pub use fetcher::{FetchError, FetcherConfig, HttpPageFetcher, PageFetcher};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{HarvesterMetrics, StructuredLogger};
pub use pipeline::{PipelineConfig, RefreshError, RefreshPipeline, METRICS_CACHE_KEY};
pub use scheduler::{
    RefreshOutcome, RefreshScheduler, RefreshTrigger, SchedulerConfig, SchedulerStatus,
};
pub use service::{MetricsService, ServedMetrics};
