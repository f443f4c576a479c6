//! Dedup store database schema.

/// SQL to create the processed events table.
///
/// `UNIQUE (topic, event_id)` is what makes `try_insert` atomic.
pub const CREATE_PROCESSED_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS processed_events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    topic        TEXT NOT NULL,
    event_id     TEXT NOT NULL,
    timestamp    TEXT NOT NULL,
    source       TEXT NOT NULL,
    payload      TEXT NOT NULL,
    processed_at TEXT NOT NULL,
    UNIQUE (topic, event_id)
);

CREATE INDEX IF NOT EXISTS idx_processed_events_topic
    ON processed_events (topic);

CREATE INDEX IF NOT EXISTS idx_processed_events_processed_at
    ON processed_events (processed_at);
";

/// Atomic insert; affects zero rows when the key already exists.
pub(crate) const INSERT_EVENT: &str = r"
INSERT INTO processed_events (topic, event_id, timestamp, source, payload, processed_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT (topic, event_id) DO NOTHING
";

pub(crate) const EVENT_EXISTS: &str = r"
SELECT EXISTS (
    SELECT 1 FROM processed_events WHERE topic = ?1 AND event_id = ?2
)
";

pub(crate) const SELECT_RECENT: &str = r"
SELECT topic, event_id, timestamp, source, payload, processed_at
FROM processed_events
ORDER BY processed_at DESC, id DESC
LIMIT ?1
";

pub(crate) const SELECT_RECENT_BY_TOPIC: &str = r"
SELECT topic, event_id, timestamp, source, payload, processed_at
FROM processed_events
WHERE topic = ?1
ORDER BY processed_at DESC, id DESC
LIMIT ?2
";

pub(crate) const COUNT_EVENTS: &str = "SELECT COUNT(*) FROM processed_events";

pub(crate) const DISTINCT_TOPICS: &str =
    "SELECT DISTINCT topic FROM processed_events ORDER BY topic";

pub(crate) const DELETE_ALL: &str = "DELETE FROM processed_events";
