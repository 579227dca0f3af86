//! HTTP server for health, metrics and status endpoints
//!
//! - GET /health  - Health summary (JSON)
//! - GET /healthz - Liveness probe
//! - GET /readyz  - Readiness probe (a listener has committed a block)
//! - GET /metrics - Prometheus metrics
//! - GET /status  - Relay state snapshot (JSON)

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tracing::info;

use crate::metrics;
use crate::nonce::NonceTracker;
use crate::state::{BridgeState, StateSnapshot};

/// Combined app state
#[derive(Clone)]
pub struct AppState {
    pub state: Arc<BridgeState>,
    pub nonces: Arc<NonceTracker>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: i64,
    pub in_flight: usize,
    pub confirmed: u64,
    pub duplicate: u64,
    pub failed: u64,
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub snapshot: StateSnapshot,
    pub next_nonces: BTreeMap<u64, u64>,
}

async fn health_check(State(app): State<AppState>) -> Json<HealthResponse> {
    let snapshot = app.state.snapshot().await;
    Json(HealthResponse {
        status: "healthy",
        uptime_seconds: (Utc::now() - snapshot.started_at).num_seconds(),
        in_flight: snapshot.in_flight.len(),
        confirmed: snapshot.counters.confirmed,
        duplicate: snapshot.counters.duplicate,
        failed: snapshot.counters.failed,
    })
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

async fn readiness(State(app): State<AppState>) -> (StatusCode, &'static str) {
    if app.state.snapshot().await.cursors.is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
    } else {
        (StatusCode::OK, "OK")
    }
}

async fn status(State(app): State<AppState>) -> Json<StatusResponse> {
    let snapshot = app.state.snapshot().await;
    let next_nonces = app.nonces.snapshot().await.into_iter().collect();
    Json(StatusResponse {
        snapshot,
        next_nonces,
    })
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .route("/status", get(status))
        .with_state(app)
}

/// Start the HTTP server
pub async fn start_server(addr: SocketAddr, app: AppState) -> eyre::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    metrics::set_up(true);
    axum::serve(listener, router(app)).await?;
    Ok(())
}
