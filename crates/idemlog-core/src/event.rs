//! Event model: the unit of ingestion and its persisted form.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Maximum length, in bytes, of `topic`, `event_id` and `source`.
pub const MAX_FIELD_LEN: usize = 255;

/// Open-ended JSON object carried by an event. Never interpreted by the core.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// An event submitted by a producer.
///
/// Two events with the same `topic` and `event_id` are the same logical
/// event, whatever their other fields contain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Logical stream name.
    pub topic: String,
    /// Producer-chosen identifier, unique within a topic.
    pub event_id: String,
    /// ISO-8601 timestamp, stored verbatim.
    pub timestamp: String,
    /// Emitting system.
    pub source: String,
    /// Arbitrary JSON object.
    #[serde(default)]
    pub payload: Payload,
}

impl Event {
    /// Returns the identity under which this event is deduplicated.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(&self.topic, &self.event_id)
    }

    /// Checks the structural rules every event must satisfy before it is
    /// handed to the intake queue.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Validation` naming the first offending field.
    pub fn validate(&self) -> Result<(), IngestError> {
        validate_text("topic", &self.topic)?;
        validate_text("event_id", &self.event_id)?;
        validate_text("source", &self.source)?;
        parse_timestamp(&self.timestamp)?;
        Ok(())
    }
}

fn validate_text(field: &str, value: &str) -> Result<(), IngestError> {
    if value.trim().is_empty() {
        return Err(IngestError::Validation(format!("{field} must not be empty")));
    }
    if value.len() > MAX_FIELD_LEN {
        return Err(IngestError::Validation(format!(
            "{field} too long: {} bytes (max {MAX_FIELD_LEN})",
            value.len()
        )));
    }
    Ok(())
}

/// Parses an ISO-8601 timestamp.
///
/// Accepts RFC 3339 (`Z` or a numeric offset), a naive date-time which is
/// read as UTC, and a bare calendar date (midnight UTC).
///
/// # Errors
///
/// Returns `IngestError::Validation` if `raw` matches none of these forms.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, IngestError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Some(naive) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(naive.and_utc());
    }
    Err(IngestError::Validation(format!(
        "invalid ISO-8601 timestamp: {raw}"
    )))
}

/// The `(topic, event_id)` pair identifying a logical event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey {
    /// Topic component.
    pub topic: String,
    /// Event identifier component.
    pub event_id: String,
}

impl DedupKey {
    /// Creates a key from its two components.
    #[must_use]
    pub fn new(topic: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            event_id: event_id.into(),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.event_id)
    }
}

/// An event as persisted by the first successful insert of its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// The event exactly as first received.
    #[serde(flatten)]
    pub event: Event,
    /// When the first insert committed.
    pub processed_at: DateTime<Utc>,
}
