//! Cache endpoints
//!
//! `GET|PUT|DELETE /cache/{key}`. The key is also the shard key, so every
//! request for one key goes to the same shard.

use crate::error::{PoolError, RouterError};
use crate::health::{AppState, ErrorResponse};
use crate::pool::{CacheClient, ShardPool};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::time::Duration;

/// Query parameters for `PUT /cache/{key}`
#[derive(Debug, Default, Deserialize)]
pub struct SetParams {
    /// Expire the entry after this many milliseconds
    pub ttl_ms: Option<u64>,
}

/// Create the cache API router
pub fn router<P: ShardPool>(state: AppState<P>) -> Router {
    Router::new()
        .route(
            "/cache/{key}",
            get(get_handler::<P>)
                .put(put_handler::<P>)
                .delete(delete_handler::<P>),
        )
        .with_state(state)
}

async fn get_handler<P: ShardPool>(
    State(state): State<AppState<P>>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let mut cache = state.registry.cache_client(&key).await?;
    match cache.get(&key).await? {
        Some(value) => Ok((StatusCode::OK, value).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

async fn put_handler<P: ShardPool>(
    State(state): State<AppState<P>>,
    Path(key): Path<String>,
    Query(params): Query<SetParams>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let mut cache = state.registry.cache_client(&key).await?;
    let ttl = params.ttl_ms.map(Duration::from_millis);
    cache.set(&key, &body, ttl).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_handler<P: ShardPool>(
    State(state): State<AppState<P>>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    let mut cache = state.registry.cache_client(&key).await?;
    if cache.delete(&key).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

/// Error returned by cache handlers
#[derive(Debug)]
pub enum ApiError {
    Router(RouterError),
    Pool(PoolError),
}

impl From<RouterError> for ApiError {
    fn from(e: RouterError) -> Self {
        Self::Router(e)
    }
}

impl From<PoolError> for ApiError {
    fn from(e: PoolError) -> Self {
        Self::Pool(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Router(RouterError::PoolUnavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Router(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Pool(PoolError::Server(_) | PoolError::Protocol(_)) => StatusCode::BAD_GATEWAY,
            Self::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Router(e) => ErrorResponse {
                error: e.to_string(),
                error_type: e.error_type_label(),
            },
            Self::Pool(e) => ErrorResponse {
                error: e.to_string(),
                error_type: e.error_type_label(),
            },
        };
        (status, Json(body)).into_response()
    }
}
