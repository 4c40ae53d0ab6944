//! Cache request counters as seen through the read path
//!
//! Kept in its own test binary: the counters live in the global prometheus
//! registry and other tests would move them concurrently.

use async_trait::async_trait;
use harvester_lib::{
    FetchError, HealthRegistry, MetricsService, PageFetcher, PipelineConfig, RefreshOutcome,
    RefreshPipeline, RefreshScheduler, RefreshTrigger, SchedulerConfig, StructuredLogger,
    TtlCache,
};
use std::sync::Arc;
use std::time::Duration;

const FULL_PAGE: &str = "<p>11,000 FROST / MB</p><p>20,000 FROST / MB</p>\
    <p>644 TB / 4,167 TB</p><p>Epoch 150</p>";

struct FixedPage;

#[async_trait]
impl PageFetcher for FixedPage {
    async fn fetch_rendered(&self, _url: &str, _timeout: Duration) -> Result<String, FetchError> {
        Ok(FULL_PAGE.to_string())
    }
}

fn cache_requests(result: &str) -> u64 {
    prometheus::gather()
        .iter()
        .filter(|family| family.get_name() == "harvester_cache_requests_total")
        .flat_map(|family| family.get_metric())
        .filter(|metric| {
            metric
                .get_label()
                .iter()
                .any(|label| label.get_name() == "result" && label.get_value() == result)
        })
        .map(|metric| metric.get_counter().get_value() as u64)
        .sum()
}

#[tokio::test]
async fn each_read_counts_one_cache_request() {
    let health = HealthRegistry::new();
    let logger = StructuredLogger::new("cache-metrics");
    let cache = Arc::new(TtlCache::with_defaults());
    let pipeline = Arc::new(RefreshPipeline::new(
        Arc::new(FixedPage),
        cache.clone(),
        PipelineConfig {
            sources: vec!["https://explorer.test/home".to_string()],
            ..Default::default()
        },
        health.clone(),
        logger.clone(),
    ));
    let scheduler = Arc::new(RefreshScheduler::new(
        pipeline,
        cache.clone(),
        SchedulerConfig::default(),
        health,
        logger,
    ));
    let service = MetricsService::new(cache, scheduler.clone());

    // Miss: one miss counted, then the lazy refresh stores a record
    let misses = cache_requests("miss");
    assert!(service.current().await.is_some());
    assert_eq!(cache_requests("miss"), misses + 1);

    // Hit: exactly one hit per read
    let hits = cache_requests("hit");
    assert!(service.current().await.is_some());
    assert_eq!(cache_requests("hit"), hits + 1);

    assert!(matches!(
        scheduler.perform_refresh(RefreshTrigger::Manual).await,
        RefreshOutcome::Updated(_)
    ));
    assert_eq!(cache_requests("hit"), hits + 1);
}
