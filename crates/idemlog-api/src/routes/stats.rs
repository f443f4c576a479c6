//! Operational statistics endpoint.

use axum::extract::State;
use axum::{Json, Router, routing::get};
use chrono::{DateTime, Utc};
use idemlog_pipeline::ConsumerState;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Response body for `GET /stats`.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Events taken from the queue by the consumer.
    pub received: u64,
    /// Events the consumer stored for the first time.
    pub unique_processed: u64,
    /// Events the consumer dropped as duplicates.
    pub duplicate_dropped: u64,
    /// Events the consumer abandoned after store errors.
    pub failed: u64,
    /// Records currently in the store, across restarts.
    pub stored_events: u64,
    /// Topics present in the store.
    pub topics: Vec<String>,
    /// Events waiting in the intake queue.
    pub queue_depth: usize,
    /// Intake queue capacity.
    pub queue_capacity: usize,
    /// Consumer lifecycle state.
    pub consumer_state: ConsumerState,
    /// Seconds since start.
    pub uptime_seconds: f64,
    /// Start time.
    pub started_at: DateTime<Utc>,
}

/// GET /stats
async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let consumer = state.consumer.stats();
    let store = state.store.stats().await?;
    let uptime = (state.clock.now() - state.started_at)
        .to_std()
        .unwrap_or_default();

    Ok(Json(StatsResponse {
        received: consumer.received,
        unique_processed: consumer.unique_processed,
        duplicate_dropped: consumer.duplicate_dropped,
        failed: consumer.failed,
        stored_events: store.unique_count,
        topics: store.topics.into_iter().collect(),
        queue_depth: state.queue.len(),
        queue_capacity: state.queue.capacity(),
        consumer_state: state.consumer.state(),
        uptime_seconds: uptime.as_secs_f64(),
        started_at: state.started_at,
    }))
}

/// Returns the stats router.
pub fn router() -> Router<AppState> {
    Router::new().route("/stats", get(get_stats))
}
