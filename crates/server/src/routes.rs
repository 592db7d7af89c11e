//! HTTP routes for the Sender's metrics listener.

use crate::metrics::metrics_handler;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use hitspool_metadata::StateStore;
use serde::Serialize;
use std::sync::Arc;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Create the metrics router.
pub fn create_router(store: Arc<dyn StateStore>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/v1/health", get(health_check))
        .with_state(store)
}

/// GET /v1/health - the request cache answers queries.
async fn health_check(
    State(store): State<Arc<dyn StateStore>>,
) -> Result<Json<HealthResponse>, (StatusCode, String)> {
    store
        .health_check()
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}
