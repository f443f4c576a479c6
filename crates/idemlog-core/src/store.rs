//! Deduplication store abstraction.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::event::{DedupKey, Event, StoredRecord};

/// Default number of records returned by a query.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// Outcome of an atomic check-and-insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    /// First time this dedup key was seen; a record now exists.
    Inserted,
    /// A record for this dedup key already existed; nothing was written.
    Duplicate,
}

impl InsertOutcome {
    /// Returns `true` for `Inserted`.
    #[must_use]
    pub fn is_inserted(self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// Read-side query over stored records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    /// Restrict results to one topic.
    pub topic: Option<String>,
    /// Maximum number of records to return.
    pub limit: u32,
}

impl EventQuery {
    /// Query across all topics with the given limit.
    #[must_use]
    pub fn all(limit: u32) -> Self {
        Self { topic: None, limit }
    }

    /// Query a single topic with the given limit.
    #[must_use]
    pub fn topic(topic: impl Into<String>, limit: u32) -> Self {
        Self {
            topic: Some(topic.into()),
            limit,
        }
    }
}

impl Default for EventQuery {
    fn default() -> Self {
        Self::all(DEFAULT_QUERY_LIMIT)
    }
}

/// Aggregate view of store contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of stored records.
    pub unique_count: u64,
    /// Duplicates rejected by this store instance since it was opened or purged.
    pub duplicate_count: u64,
    /// Distinct topics with at least one record.
    pub topics: BTreeSet<String>,
}

/// Durable existence index keyed by `(topic, event_id)`.
///
/// `try_insert` is the only authoritative way to decide whether an event is
/// new. Implementations must make it atomic: concurrent calls with the same
/// key resolve to exactly one `Inserted`.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Records `event` if its dedup key is unseen.
    ///
    /// `Inserted` is only returned once the record is durable.
    async fn try_insert(&self, event: &Event) -> Result<InsertOutcome, IngestError>;

    /// Best-effort membership check. Not a substitute for `try_insert`.
    async fn exists(&self, key: &DedupKey) -> Result<bool, IngestError>;

    /// Stored records, newest `processed_at` first, at most `query.limit`.
    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredRecord>, IngestError>;

    /// Record count, store-local duplicate count and known topics.
    async fn stats(&self) -> Result<StoreStats, IngestError>;

    /// Deletes every record. Administrative reset only.
    async fn purge(&self) -> Result<(), IngestError>;
}
