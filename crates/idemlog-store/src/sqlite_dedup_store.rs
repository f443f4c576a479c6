//! `SQLite` implementation of the `DedupStore` trait.
//!
//! The database runs in WAL mode with `synchronous = FULL`, so every
//! committed insert is fsynced before `try_insert` returns `Inserted`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use tracing::{debug, info, warn};

use idemlog_core::clock::{Clock, SystemClock};
use idemlog_core::error::IngestError;
use idemlog_core::event::{DedupKey, Event, Payload, StoredRecord};
use idemlog_core::store::{DedupStore, EventQuery, InsertOutcome, StoreStats};

use crate::schema;

/// Connection settings for a `SqliteDedupStore`.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Upper bound on pooled connections.
    pub max_connections: u32,
    /// How long a writer waits for the database lock before failing.
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 4,
            busy_timeout: Duration::from_secs(10),
        }
    }
}

/// SQLite-backed dedup store.
pub struct SqliteDedupStore {
    pool: SqlitePool,
    path: PathBuf,
    clock: Arc<dyn Clock>,
    duplicates: AtomicU64,
}

impl fmt::Debug for SqliteDedupStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDedupStore")
            .field("path", &self.path)
            .field("duplicates", &self.duplicates.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SqliteDedupStore {
    /// Opens (creating if needed) the database at `path` with default options.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::StoreUnavailable` if the file cannot be opened or
    /// the schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        Self::open_with(path, StoreOptions::default(), Arc::new(SystemClock)).await
    }

    /// Opens the database at `path` with explicit options and clock.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::StoreUnavailable` if the file cannot be opened or
    /// the schema cannot be created.
    pub async fn open_with(
        path: impl AsRef<Path>,
        options: StoreOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IngestError> {
        let path = path.as_ref().to_path_buf();
        let connect = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await
            .map_err(unavailable)?;

        sqlx::raw_sql(schema::CREATE_PROCESSED_EVENTS_TABLE)
            .execute(&pool)
            .await
            .map_err(unavailable)?;

        info!(path = %path.display(), "dedup store opened");

        Ok(Self {
            pool,
            path,
            clock,
            duplicates: AtomicU64::new(0),
        })
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes every pooled connection. Later calls fail with
    /// `StoreUnavailable`.
    pub async fn close(&self) {
        self.pool.close().await;
        info!(path = %self.path.display(), "dedup store closed");
    }
}

fn unavailable(err: sqlx::Error) -> IngestError {
    IngestError::StoreUnavailable(err.to_string())
}

/// Fixed-width RFC 3339 so that lexical order matches chronological order.
fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn record_from_row(row: &SqliteRow) -> Result<StoredRecord, IngestError> {
    let payload_text: String = row.try_get("payload").map_err(unavailable)?;
    let payload: Payload = serde_json::from_str(&payload_text).map_err(|e| {
        IngestError::StoreUnavailable(format!("payload deserialization failed: {e}"))
    })?;
    let processed_at_text: String = row.try_get("processed_at").map_err(unavailable)?;
    let processed_at = DateTime::parse_from_rfc3339(&processed_at_text)
        .map_err(|e| IngestError::StoreUnavailable(format!("corrupt processed_at: {e}")))?
        .with_timezone(&Utc);

    Ok(StoredRecord {
        event: Event {
            topic: row.try_get("topic").map_err(unavailable)?,
            event_id: row.try_get("event_id").map_err(unavailable)?,
            timestamp: row.try_get("timestamp").map_err(unavailable)?,
            source: row.try_get("source").map_err(unavailable)?,
            payload,
        },
        processed_at,
    })
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn try_insert(&self, event: &Event) -> Result<InsertOutcome, IngestError> {
        let payload = serde_json::to_string(&event.payload).map_err(|e| {
            IngestError::Validation(format!("payload serialization failed: {e}"))
        })?;
        let processed_at = format_instant(self.clock.now());

        let result = sqlx::query(schema::INSERT_EVENT)
            .bind(&event.topic)
            .bind(&event.event_id)
            .bind(&event.timestamp)
            .bind(&event.source)
            .bind(payload)
            .bind(processed_at)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        if result.rows_affected() > 0 {
            debug!(dedup_key = %event.dedup_key(), "stored new event");
            Ok(InsertOutcome::Inserted)
        } else {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(dedup_key = %event.dedup_key(), "rejected duplicate event");
            Ok(InsertOutcome::Duplicate)
        }
    }

    async fn exists(&self, key: &DedupKey) -> Result<bool, IngestError> {
        sqlx::query_scalar::<_, bool>(schema::EVENT_EXISTS)
            .bind(&key.topic)
            .bind(&key.event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredRecord>, IngestError> {
        let limit = i64::from(query.limit);
        let rows = match &query.topic {
            Some(topic) => {
                sqlx::query(schema::SELECT_RECENT_BY_TOPIC)
                    .bind(topic)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query(schema::SELECT_RECENT)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(unavailable)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn stats(&self) -> Result<StoreStats, IngestError> {
        let count: i64 = sqlx::query_scalar(schema::COUNT_EVENTS)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        let topics: Vec<String> = sqlx::query_scalar(schema::DISTINCT_TOPICS)
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(StoreStats {
            unique_count: u64::try_from(count).unwrap_or_default(),
            duplicate_count: self.duplicates.load(Ordering::Relaxed),
            topics: topics.into_iter().collect(),
        })
    }

    async fn purge(&self) -> Result<(), IngestError> {
        let result = sqlx::query(schema::DELETE_ALL)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        self.duplicates.store(0, Ordering::Relaxed);
        warn!(deleted = result.rows_affected(), "dedup store purged");
        Ok(())
    }
}
