//! Health check and service descriptor endpoints.

use axum::extract::State;
use axum::{Json, Router, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Time the check was answered.
    pub timestamp: DateTime<Utc>,
}

/// Service descriptor returned from `/`.
#[derive(Serialize)]
pub struct ServiceInfo {
    /// Service name.
    pub service: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Available endpoints.
    pub endpoints: Vec<&'static str>,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: state.clock.now(),
    })
}

/// GET /
async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "idemlog",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "POST /publish",
            "GET /events",
            "DELETE /events",
            "GET /stats",
            "GET /health",
        ],
    })
}

/// Returns the health check router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health_check))
}
