//! Metrics Harvester - storage network metrics service
//!
//! Harvests storage prices, capacity and epoch from explorer pages once a
//! day, keeps the last good record in memory and serves it over HTTP.

use anyhow::Result;
use harvester_lib::{
    health::{components, HealthRegistry},
    observability::{HarvesterMetrics, StructuredLogger},
    HttpPageFetcher, MetricsService, RefreshPipeline, RefreshScheduler, TtlCache,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const HARVESTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting metrics-harvester");

    let config = config::HarvesterConfig::load()?;
    let pipeline_config = config.pipeline_config();
    let scheduler_config = config.scheduler_config()?;
    if pipeline_config.sources.is_empty() {
        warn!("No source URLs configured, refreshes will not produce data");
    }
    info!(
        instance = %config.instance,
        sources = pipeline_config.sources.len(),
        refresh_at = %scheduler_config.refresh_at,
        "Harvester configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::FETCHER).await;
    health_registry.register(components::CACHE).await;
    health_registry.register(components::SCHEDULER).await;

    // Registers the prometheus collectors before the first scrape
    HarvesterMetrics::new();

    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(HARVESTER_VERSION, pipeline_config.sources.len());

    let cache = Arc::new(TtlCache::new(config.cache_config()));
    let fetcher = Arc::new(HttpPageFetcher::new(config.fetcher_config())?);
    let pipeline = Arc::new(RefreshPipeline::new(
        fetcher,
        cache.clone(),
        pipeline_config,
        health_registry.clone(),
        logger.clone(),
    ));
    let scheduler = Arc::new(RefreshScheduler::new(
        pipeline,
        cache.clone(),
        scheduler_config,
        health_registry.clone(),
        logger.clone(),
    ));
    let service = Arc::new(MetricsService::new(cache.clone(), scheduler.clone()));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let monitor_handle = cache.spawn_memory_monitor(health_registry.clone(), shutdown_rx);

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        service,
        scheduler.clone(),
        cache,
    ));

    // Liveness is served while the bootstrap refresh runs
    let mut api_shutdown = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = api_shutdown.recv().await;
    }));

    if let Some(outcome) = scheduler.start().await {
        info!(outcome = outcome.as_str(), "Bootstrap refresh finished");
    }

    // Mark harvester as ready after initialization
    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    health_registry.set_ready(false).await;
    scheduler.stop().await;
    let _ = shutdown_tx.send(());

    if let Err(e) = monitor_handle.await {
        warn!(error = %e, "Cache monitor did not shut down cleanly");
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
