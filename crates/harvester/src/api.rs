//! HTTP API: health checks, Prometheus metrics and the harvested record

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use harvester_lib::{
    health::{ComponentStatus, HealthRegistry},
    scheduler::{RefreshOutcome, RefreshTrigger},
    CacheStatus, MetricsRecord, MetricsService, RefreshScheduler, SchedulerStatus, TtlCache,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub service: Arc<MetricsService>,
    pub scheduler: Arc<RefreshScheduler>,
    pub cache: Arc<TtlCache<MetricsRecord>>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        service: Arc<MetricsService>,
        scheduler: Arc<RefreshScheduler>,
        cache: Arc<TtlCache<MetricsRecord>>,
    ) -> Self {
        Self {
            health_registry,
            service,
            scheduler,
            cache,
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    scheduler: SchedulerStatus,
    cache: CacheStatus,
}

#[derive(Serialize)]
struct RefreshResponse {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<MetricsRecord>,
}

/// 200 while healthy or degraded, 503 once a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// The current record, or 503 when nothing servable exists
async fn current_metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.service.current().await {
        Some(served) => (StatusCode::OK, Json(served)).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "temporarily unavailable" })),
        )
            .into_response(),
    }
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        scheduler: state.scheduler.status(),
        cache: state.cache.status(),
    })
}

async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let outcome = state.scheduler.perform_refresh(RefreshTrigger::Manual).await;
    let record = match &outcome {
        RefreshOutcome::Updated(record) => Some(record.clone()),
        RefreshOutcome::NoUpdate | RefreshOutcome::Skipped => None,
    };

    Json(RefreshResponse {
        outcome: outcome.as_str(),
        record,
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/metrics", get(current_metrics))
        .route("/api/status", get(status))
        .route("/api/refresh", post(refresh))
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
