//! HTTP surface of a running pipeline
//!
//! `/healthz` rolls the pollers, aggregator and scale watch into one status
//! and `/healthz/:component` reports a single one of them. `/readyz` turns
//! ready once every poller has been launched. `/metrics` exposes the sample,
//! fetch and scale counters in Prometheus text format.

use crate::health::{ComponentStatus, HealthRegistry};
use crate::observability::PipelineMetrics;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// What the endpoints read from the pipeline
#[derive(Clone)]
pub struct ApiState {
    pub health: HealthRegistry,
    pub metrics: PipelineMetrics,
}

impl ApiState {
    pub fn new(health: HealthRegistry, metrics: PipelineMetrics) -> Self {
        Self { health, metrics }
    }
}

type SharedState = State<Arc<ApiState>>;

/// Degraded still serves traffic: an isolated poller leaves the others running
fn status_code(status: ComponentStatus) -> StatusCode {
    if status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn pipeline_health(State(state): SharedState) -> Response {
    let health = state.health.health().await;
    (status_code(health.status), Json(health)).into_response()
}

async fn component_health(State(state): SharedState, Path(name): Path<String>) -> Response {
    match state.health.component(&name).await {
        Some(health) => (status_code(health.status), Json(health)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("unknown pipeline component: {}", name),
        )
            .into_response(),
    }
}

async fn pollers_launched(State(state): SharedState) -> Response {
    let readiness = state.health.readiness().await;
    let code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(readiness)).into_response()
}

async fn pipeline_metrics(State(state): SharedState) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Routes for the pipeline's health, readiness and metrics
pub fn create_router(state: Arc<ApiState>) -> Router {
    let health = Router::new()
        .route("/healthz", get(pipeline_health))
        .route("/healthz/:component", get(component_health))
        .route("/readyz", get(pollers_launched));

    Router::new()
        .merge(health)
        .route("/metrics", get(pipeline_metrics))
        .with_state(state)
}

/// Serve the API on all interfaces until the task is dropped
pub async fn serve(port: u16, state: Arc<ApiState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Serving pipeline health and metrics");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
