//! Bounded FIFO hand-off between producers and the consumer.

use std::sync::{Mutex, PoisonError};

use idemlog_core::error::IngestError;
use idemlog_core::event::Event;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// Default maximum number of queued events.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Largest capacity the underlying channel supports.
pub const MAX_QUEUE_CAPACITY: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Bounded intake queue. Shared by many producers and one consumer.
///
/// A full queue is the system's backpressure signal: `enqueue` fails with
/// `QueueFull` and `enqueue_wait` suspends until space frees up.
#[derive(Debug)]
pub struct IntakeQueue {
    tx: mpsc::Sender<Event>,
    rx: Mutex<mpsc::Receiver<Event>>,
    capacity: usize,
}

impl IntakeQueue {
    /// Creates a queue holding at most `capacity` events.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Validation` if `capacity` is zero or larger
    /// than [`MAX_QUEUE_CAPACITY`].
    pub fn new(capacity: usize) -> Result<Self, IngestError> {
        if capacity == 0 {
            return Err(IngestError::Validation(
                "queue capacity must be at least 1".into(),
            ));
        }
        if capacity > MAX_QUEUE_CAPACITY {
            return Err(IngestError::Validation(format!(
                "queue capacity must be at most {MAX_QUEUE_CAPACITY}"
            )));
        }
        Ok(Self::with_capacity(capacity))
    }

    fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    /// Adds `event` without waiting.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::QueueFull` when the queue is at capacity. The
    /// queue is left unchanged.
    pub fn enqueue(&self, event: Event) -> Result<(), IngestError> {
        self.tx.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => IngestError::QueueFull {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => IngestError::QueueClosed,
        })
    }

    /// Adds `event`, suspending while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::QueueClosed` if the receiving half is gone.
    pub async fn enqueue_wait(&self, event: Event) -> Result<(), IngestError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| IngestError::QueueClosed)
    }

    /// Removes up to `max` events that are available right now, oldest first.
    /// Never waits; returns an empty vector when nothing is queued.
    pub fn dequeue_batch(&self, max: usize) -> Vec<Event> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut batch = Vec::with_capacity(max.min(self.len()));
        while batch.len() < max {
            match rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        batch
    }

    /// Number of events currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Whether the queue holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured maximum number of queued events.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for IntakeQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}
