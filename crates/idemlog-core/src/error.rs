//! Ingestion error types.

use thiserror::Error;

/// Errors surfaced by the ingestion core.
///
/// A duplicate submission is deliberately absent: it is an expected outcome
/// (`InsertOutcome::Duplicate`), not a failure.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A malformed event or an invalid argument.
    #[error("validation error: {0}")]
    Validation(String),

    /// The intake queue is at capacity; the producer should back off and retry.
    #[error("intake queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured maximum number of queued events.
        capacity: usize,
    },

    /// The intake queue no longer accepts events.
    #[error("intake queue is closed")]
    QueueClosed,

    /// The durable store could not complete the operation.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl IngestError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::StoreUnavailable(_))
    }
}
