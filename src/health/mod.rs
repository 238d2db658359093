//! Health check endpoints
//!
//! `/health`, `/ready`, `/metrics`, plus two read-only views of the shard
//! table: `/shards` and `/route/{key}`.

use crate::metrics::RouterMetrics;
use crate::pool::ShardPool;
use crate::registry::{ShardRoute, ShardSnapshot, ShardedPool};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub shards: usize,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub shards_total: usize,
    pub shards_unavailable: usize,
    pub acquisitions_total: u64,
}

/// Error body shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_type: &'static str,
}

/// Application state for HTTP endpoints
pub struct AppState<P> {
    pub registry: ShardedPool<P>,
    /// None when no Prometheus recorder is installed
    pub metrics: Option<RouterMetrics>,
}

impl<P> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Create the health check router
pub fn router<P: ShardPool>(state: AppState<P>) -> Router {
    Router::new()
        .route("/health", get(health_handler::<P>))
        .route("/ready", get(ready_handler::<P>))
        .route("/metrics", get(metrics_handler::<P>))
        .route("/shards", get(shards_handler::<P>))
        .route("/route/{key}", get(route_handler::<P>))
        .with_state(state)
}

/// Health endpoint - always returns 200 if process is running
async fn health_handler<P: ShardPool>(State(state): State<AppState<P>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        shards: state.registry.len(),
    })
}

/// Readiness endpoint - 503 while any shard's last acquisition failed
/// within the failure window (30s by default)
async fn ready_handler<P: ShardPool>(State(state): State<AppState<P>>) -> impl IntoResponse {
    let stats = state.registry.stats();

    let response = ReadyResponse {
        ready: stats.is_ready(),
        shards_total: stats.shard_count(),
        shards_unavailable: stats.unavailable_shards(),
        acquisitions_total: stats.total_acquisitions(),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Metrics endpoint - returns Prometheus format metrics
async fn metrics_handler<P: ShardPool>(State(state): State<AppState<P>>) -> Response {
    match state.metrics {
        Some(ref metrics) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            metrics.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Per-shard acquisition stats
async fn shards_handler<P: ShardPool>(State(state): State<AppState<P>>) -> Json<Vec<ShardSnapshot>> {
    Json(state.registry.stats().snapshot())
}

/// Which shard a key routes to; acquires nothing
async fn route_handler<P: ShardPool>(
    State(state): State<AppState<P>>,
    Path(key): Path<String>,
) -> Result<Json<ShardRoute>, Response> {
    state.registry.route(&key).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
                error_type: e.error_type_label(),
            }),
        )
            .into_response()
    })
}
