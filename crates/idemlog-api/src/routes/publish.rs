//! Publish endpoint: validates submissions and hands them to the intake queue.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::post};
use idemlog_core::error::IngestError;
use idemlog_core::event::Event;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

/// Response body for `POST /publish`.
#[derive(Debug, Serialize)]
pub struct PublishResponse {
    /// `queued` when at least one event was accepted, otherwise `duplicate`.
    pub status: &'static str,
    /// Events handed to the intake queue.
    pub queued: usize,
    /// Events already present in the store and therefore not queued.
    pub duplicates: usize,
}

/// Parses a single event object or an array of them, validating each one.
/// The whole submission is rejected on the first invalid event.
fn parse_events(body: Value) -> Result<Vec<Event>, IngestError> {
    let items = match body {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        _ => {
            return Err(IngestError::Validation(
                "body must be an event object or an array of events".into(),
            ));
        }
    };
    if items.is_empty() {
        return Err(IngestError::Validation("no events submitted".into()));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let event: Event = serde_json::from_value(item)
                .map_err(|e| IngestError::Validation(format!("event[{index}]: {e}")))?;
            event.validate().map_err(|e| match e {
                IngestError::Validation(msg) => {
                    IngestError::Validation(format!("event[{index}]: {msg}"))
                }
                other => other,
            })?;
            Ok(event)
        })
        .collect()
}

/// POST /publish
///
/// Known duplicates are filtered with the store's non-authoritative `exists`
/// check so producers learn about them immediately; the consumer still makes
/// the authoritative decision for everything that is queued. If the queue
/// fills partway through an array, the error body carries the number of
/// events queued before it.
async fn publish(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<PublishResponse>), Response> {
    let events = parse_events(body).map_err(|e| ApiError(e).into_response())?;
    let submitted = events.len();

    let mut queued = 0;
    let mut duplicates = 0;
    for event in events {
        let key = event.dedup_key();
        match state.store.exists(&key).await {
            Ok(true) => {
                duplicates += 1;
                tracing::info!(dedup_key = %key, "rejected known duplicate at intake");
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    dedup_key = %key,
                    error = %e,
                    "duplicate pre-check failed; queueing anyway"
                );
            }
        }
        if let Err(e) = state.queue.enqueue(event) {
            tracing::warn!(submitted, queued, error = %e, "publish request cut short");
            let partial = (submitted > 1).then_some(queued);
            return Err(ApiError(e).into_response_with_queued(partial));
        }
        queued += 1;
    }

    tracing::debug!(submitted, queued, duplicates, "publish request handled");

    let (status, label) = if queued == 0 {
        (StatusCode::CONFLICT, "duplicate")
    } else {
        (StatusCode::OK, "queued")
    };
    Ok((
        status,
        Json(PublishResponse {
            status: label,
            queued,
            duplicates,
        }),
    ))
}

/// Returns the publish router.
pub fn router() -> Router<AppState> {
    Router::new().route("/publish", post(publish))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid(event_id: &str) -> Value {
        json!({
            "topic": "orders",
            "event_id": event_id,
            "timestamp": "2026-01-15T10:00:00Z",
            "source": "checkout",
            "payload": {"amount": 10}
        })
    }

    #[test]
    fn test_parse_single_object() {
        let events = parse_events(valid("e-1")).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "e-1");
    }

    #[test]
    fn test_parse_array_preserves_order() {
        let events = parse_events(json!([valid("a"), valid("b")])).unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_parse_rejects_empty_array_and_scalars() {
        assert!(matches!(
            parse_events(json!([])),
            Err(IngestError::Validation(_))
        ));
        assert!(matches!(
            parse_events(json!("event")),
            Err(IngestError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_reports_index_of_invalid_event() {
        let mut bad = valid("b");
        bad["timestamp"] = json!("yesterday");

        let err = parse_events(json!([valid("a"), bad])).unwrap_err();

        assert!(matches!(err, IngestError::Validation(ref m) if m.starts_with("event[1]")));
    }

    #[test]
    fn test_parse_rejects_non_object_payload() {
        let mut bad = valid("a");
        bad["payload"] = json!([1, 2, 3]);

        assert!(matches!(
            parse_events(bad),
            Err(IngestError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let err = parse_events(json!({"topic": "orders"})).unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }
}
