//! idemlog API — HTTP boundary around the ingestion pipeline.

use axum::Router;

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

/// Builds the full application router. Shared by `main.rs` and the
/// integration tests so both serve the same route structure.
pub fn router(app_state: state::AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::publish::router())
        .merge(routes::events::router())
        .merge(routes::stats::router())
        .with_state(app_state)
}
