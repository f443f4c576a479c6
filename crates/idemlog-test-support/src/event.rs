//! Event builders with sensible defaults.

use idemlog_core::event::{Event, Payload};

/// Build an `Event` for `topic` / `event_id` with a fixed timestamp, a test
/// source and an empty payload.
#[must_use]
pub fn sample_event(topic: &str, event_id: &str) -> Event {
    sample_event_with_payload(topic, event_id, &serde_json::json!({}))
}

/// Build an `Event` carrying `payload`.
///
/// # Panics
///
/// Panics if `payload` is not a JSON object.
#[must_use]
pub fn sample_event_with_payload(
    topic: &str,
    event_id: &str,
    payload: &serde_json::Value,
) -> Event {
    let payload: Payload = payload
        .as_object()
        .cloned()
        .expect("sample payload must be a JSON object");
    Event {
        topic: topic.to_string(),
        event_id: event_id.to_string(),
        timestamp: "2026-01-15T10:00:00Z".to_string(),
        source: "test-support".to_string(),
        payload,
    }
}
