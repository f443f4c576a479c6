//! Test stores — mock `DedupStore` implementations for tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use idemlog_core::error::IngestError;
use idemlog_core::event::{DedupKey, Event, StoredRecord};
use idemlog_core::store::{DedupStore, EventQuery, InsertOutcome, StoreStats};

#[derive(Debug, Default)]
struct MemoryState {
    keys: HashSet<DedupKey>,
    records: Vec<StoredRecord>,
    attempts: Vec<DedupKey>,
    duplicates: u64,
}

/// An in-memory dedup store that records every `try_insert` attempt. Applies
/// the same first-write-wins semantics as the real store, under a mutex.
#[derive(Debug, Default)]
pub struct RecordingDedupStore {
    state: Mutex<MemoryState>,
    insert_delay: Option<Duration>,
}

impl RecordingDedupStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store whose `try_insert` sleeps for `delay` before
    /// deciding. Used to keep events in flight during shutdown tests.
    #[must_use]
    pub fn with_insert_delay(delay: Duration) -> Self {
        Self {
            state: Mutex::default(),
            insert_delay: Some(delay),
        }
    }

    /// Returns every key passed to `try_insert`, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn attempts(&self) -> Vec<DedupKey> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// Returns the stored records in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn records(&self) -> Vec<StoredRecord> {
        self.state.lock().unwrap().records.clone()
    }
}

#[async_trait]
impl DedupStore for RecordingDedupStore {
    async fn try_insert(&self, event: &Event) -> Result<InsertOutcome, IngestError> {
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }
        let key = event.dedup_key();
        let mut state = self.state.lock().unwrap();
        state.attempts.push(key.clone());
        if state.keys.insert(key) {
            state.records.push(StoredRecord {
                event: event.clone(),
                processed_at: Utc::now(),
            });
            Ok(InsertOutcome::Inserted)
        } else {
            state.duplicates += 1;
            Ok(InsertOutcome::Duplicate)
        }
    }

    async fn exists(&self, key: &DedupKey) -> Result<bool, IngestError> {
        Ok(self.state.lock().unwrap().keys.contains(key))
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredRecord>, IngestError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .iter()
            .rev()
            .filter(|r| query.topic.as_ref().is_none_or(|t| &r.event.topic == t))
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats, IngestError> {
        let state = self.state.lock().unwrap();
        Ok(StoreStats {
            unique_count: state.records.len() as u64,
            duplicate_count: state.duplicates,
            topics: state.records.iter().map(|r| r.event.topic.clone()).collect(),
        })
    }

    async fn purge(&self) -> Result<(), IngestError> {
        let mut state = self.state.lock().unwrap();
        state.keys.clear();
        state.records.clear();
        state.duplicates = 0;
        Ok(())
    }
}

/// A dedup store that always returns `StoreUnavailable`. Useful for testing
/// error-handling paths.
#[derive(Debug)]
pub struct FailingDedupStore;

fn connection_refused() -> IngestError {
    IngestError::StoreUnavailable("connection refused".into())
}

#[async_trait]
impl DedupStore for FailingDedupStore {
    async fn try_insert(&self, _event: &Event) -> Result<InsertOutcome, IngestError> {
        Err(connection_refused())
    }

    async fn exists(&self, _key: &DedupKey) -> Result<bool, IngestError> {
        Err(connection_refused())
    }

    async fn query(&self, _query: &EventQuery) -> Result<Vec<StoredRecord>, IngestError> {
        Err(connection_refused())
    }

    async fn stats(&self) -> Result<StoreStats, IngestError> {
        Err(connection_refused())
    }

    async fn purge(&self) -> Result<(), IngestError> {
        Err(connection_refused())
    }
}

/// A dedup store whose first `failures` calls to `try_insert` fail with
/// `StoreUnavailable`; after that it behaves like `RecordingDedupStore`.
#[derive(Debug)]
pub struct FlakyDedupStore {
    remaining_failures: AtomicU32,
    inner: RecordingDedupStore,
}

impl FlakyDedupStore {
    /// Create a store that fails the next `failures` inserts.
    #[must_use]
    pub fn new(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
            inner: RecordingDedupStore::new(),
        }
    }

    /// The store that takes over once the failures are used up.
    #[must_use]
    pub fn inner(&self) -> &RecordingDedupStore {
        &self.inner
    }
}

#[async_trait]
impl DedupStore for FlakyDedupStore {
    async fn try_insert(&self, event: &Event) -> Result<InsertOutcome, IngestError> {
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(IngestError::StoreUnavailable("database is locked".into()));
        }
        self.inner.try_insert(event).await
    }

    async fn exists(&self, key: &DedupKey) -> Result<bool, IngestError> {
        self.inner.exists(key).await
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredRecord>, IngestError> {
        self.inner.query(query).await
    }

    async fn stats(&self) -> Result<StoreStats, IngestError> {
        self.inner.stats().await
    }

    async fn purge(&self) -> Result<(), IngestError> {
        self.inner.purge().await
    }
}
