//! Query and purge endpoints over the dedup store.

use axum::extract::{Query, State};
use axum::{Json, Router, routing::get};
use idemlog_core::error::IngestError;
use idemlog_core::event::StoredRecord;
use idemlog_core::store::{DEFAULT_QUERY_LIMIT, EventQuery};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Largest `limit` a caller may request.
pub const MAX_QUERY_LIMIT: u32 = 1_000;

/// Query string for `GET /events`.
#[derive(Debug, Deserialize)]
pub struct EventsParams {
    /// Restrict to one topic.
    pub topic: Option<String>,
    /// Maximum records, 1..=1000.
    pub limit: Option<u32>,
}

/// Response body for `GET /events`.
#[derive(Debug, Serialize)]
pub struct EventsResponse {
    /// Records, newest first.
    pub events: Vec<StoredRecord>,
    /// Number of records returned.
    pub total: usize,
    /// Topic filter that was applied, if any.
    pub topic: Option<String>,
}

/// Response body for `DELETE /events`.
#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    /// Always `purged`.
    pub status: &'static str,
}

/// GET /events
async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> Result<Json<EventsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
    if !(1..=MAX_QUERY_LIMIT).contains(&limit) {
        return Err(IngestError::Validation(format!(
            "limit must be between 1 and {MAX_QUERY_LIMIT}"
        ))
        .into());
    }
    let topic = params.topic.filter(|t| !t.is_empty());

    let events = state
        .store
        .query(&EventQuery {
            topic: topic.clone(),
            limit,
        })
        .await?;

    Ok(Json(EventsResponse {
        total: events.len(),
        events,
        topic,
    }))
}

/// DELETE /events
///
/// Administrative reset: wipes the store and zeroes the consumer counters.
async fn purge_events(State(state): State<AppState>) -> Result<Json<PurgeResponse>, ApiError> {
    state.store.purge().await?;
    state.consumer.reset_stats();
    tracing::warn!("all events purged via API");
    Ok(Json(PurgeResponse { status: "purged" }))
}

/// Returns the events router.
pub fn router() -> Router<AppState> {
    Router::new().route("/events", get(list_events).delete(purge_events))
}
