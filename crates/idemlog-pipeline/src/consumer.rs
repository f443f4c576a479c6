//! Batching consumer that drains the intake queue into the dedup store.
//!
//! Lifecycle: `Idle -> Running -> Draining -> Stopped`. `stop()` only
//! returns once every event that was queued at stop time has been applied
//! to the store.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use idemlog_core::error::IngestError;
use idemlog_core::event::Event;
use idemlog_core::store::{DedupStore, InsertOutcome};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::queue::IntakeQueue;

/// Tuning knobs for the consumer loop.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Maximum events taken from the queue per iteration.
    pub batch_size: usize,
    /// Idle sleep when the queue is observed empty.
    pub poll_interval: Duration,
    /// Extra attempts for an event whose insert hit `StoreUnavailable`.
    pub store_retries: u32,
    /// Pause between those attempts.
    pub retry_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(10),
            store_retries: 2,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Consumer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    /// Constructed, no background task.
    Idle,
    /// Batch loop is polling the queue.
    Running,
    /// Stop requested; loop exits once the queue is empty.
    Draining,
    /// Loop has exited.
    Stopped,
}

/// Snapshot of the consumer's counters.
///
/// Once the queue is drained, `received == unique_processed +
/// duplicate_dropped + failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    /// Events taken from the queue.
    pub received: u64,
    /// Events whose insert created a record.
    pub unique_processed: u64,
    /// Events rejected as duplicates.
    pub duplicate_dropped: u64,
    /// Events abandoned after a store error.
    pub failed: u64,
}

/// Outcome tally for a single processed event.
#[derive(Debug, Clone, Copy)]
enum Tally {
    Unique,
    Duplicate,
    Failed,
}

#[derive(Debug, Default)]
struct CounterState {
    stats: ConsumerStats,
    in_flight: bool,
}

/// Counters guarded as one unit so every snapshot satisfies
/// `received >= unique_processed + duplicate_dropped + failed`.
#[derive(Debug, Default)]
struct Counters {
    inner: Mutex<CounterState>,
}

impl Counters {
    fn lock(&self) -> MutexGuard<'_, CounterState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> ConsumerStats {
        self.lock().stats
    }

    fn begin(&self) {
        let mut state = self.lock();
        state.stats.received += 1;
        state.in_flight = true;
    }

    fn finish(&self, tally: Tally) {
        let mut state = self.lock();
        match tally {
            Tally::Unique => state.stats.unique_processed += 1,
            Tally::Duplicate => state.stats.duplicate_dropped += 1,
            Tally::Failed => state.stats.failed += 1,
        }
        state.in_flight = false;
    }

    /// Zeroes the counters. An event still in flight stays counted as
    /// received so its outcome lands on the fresh tally.
    fn reset(&self) {
        let mut state = self.lock();
        state.stats = ConsumerStats {
            received: u64::from(state.in_flight),
            ..ConsumerStats::default()
        };
    }
}

/// Long-lived worker applying queued events to a `DedupStore`.
///
/// Counters are written only by the single background task; other callers
/// read consistent snapshots through `stats()`.
pub struct Consumer {
    queue: Arc<IntakeQueue>,
    store: Arc<dyn DedupStore>,
    config: ConsumerConfig,
    counters: Arc<Counters>,
    state: watch::Sender<ConsumerState>,
    worker: AsyncMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .field("stats", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

impl Consumer {
    /// Creates an idle consumer over `queue` and `store`.
    #[must_use]
    pub fn new(
        queue: Arc<IntakeQueue>,
        store: Arc<dyn DedupStore>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            config,
            counters: Arc::default(),
            state: watch::Sender::new(ConsumerState::Idle),
            worker: AsyncMutex::new(None),
        }
    }

    /// Spawns the batch loop on the current tokio runtime.
    ///
    /// No-op (with a warning) if the loop is already running or draining.
    /// A stopped consumer may be started again; counters carry over.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        let current = *self.state.borrow();
        if matches!(current, ConsumerState::Running | ConsumerState::Draining) {
            warn!(state = ?current, "consumer already running");
            return;
        }

        self.state.send_replace(ConsumerState::Running);
        let batch_loop = BatchLoop {
            queue: Arc::clone(&self.queue),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            counters: Arc::clone(&self.counters),
            state: self.state.subscribe(),
        };
        *worker = Some(tokio::spawn(batch_loop.run()));
        info!(
            batch_size = self.config.batch_size,
            poll_interval = ?self.config.poll_interval,
            "consumer started"
        );
    }

    /// Requests shutdown and waits until the queue is fully drained and the
    /// loop has exited. Safe to call repeatedly or before `start`.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        let Some(handle) = worker.take() else {
            debug!("consumer not running; stop is a no-op");
            return;
        };

        self.state.send_replace(ConsumerState::Draining);
        info!(pending = self.queue.len(), "consumer draining");

        if let Err(e) = handle.await {
            error!(error = %e, "consumer task terminated abnormally");
        }

        self.state.send_replace(ConsumerState::Stopped);
        let stats = self.counters.snapshot();
        info!(
            received = stats.received,
            unique_processed = stats.unique_processed,
            duplicate_dropped = stats.duplicate_dropped,
            failed = stats.failed,
            "consumer stopped"
        );
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Snapshot of the running counters.
    #[must_use]
    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }

    /// Zeroes every counter. Administrative reset only.
    pub fn reset_stats(&self) {
        self.counters.reset();
        warn!("consumer stats reset");
    }
}

/// State moved into the spawned task.
struct BatchLoop {
    queue: Arc<IntakeQueue>,
    store: Arc<dyn DedupStore>,
    config: ConsumerConfig,
    counters: Arc<Counters>,
    state: watch::Receiver<ConsumerState>,
}

impl BatchLoop {
    async fn run(mut self) {
        debug!("consumer loop started");
        let batch_size = self.config.batch_size.max(1);
        loop {
            let batch = self.queue.dequeue_batch(batch_size);
            if !batch.is_empty() {
                self.process_batch(batch).await;
                continue;
            }

            if *self.state.borrow_and_update() != ConsumerState::Running {
                // Events may have landed between the empty dequeue and the
                // state change.
                self.drain_remaining(batch_size).await;
                break;
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {}
                changed = self.state.changed() => {
                    if changed.is_err() {
                        // Owning consumer dropped: drain what is left, then exit.
                        self.drain_remaining(batch_size).await;
                        break;
                    }
                }
            }
        }
        debug!("consumer loop finished");
    }

    async fn drain_remaining(&self, batch_size: usize) {
        loop {
            let batch = self.queue.dequeue_batch(batch_size);
            if batch.is_empty() {
                return;
            }
            self.process_batch(batch).await;
        }
    }

    async fn process_batch(&self, batch: Vec<Event>) {
        for event in batch {
            self.process_event(&event).await;
        }
    }

    async fn process_event(&self, event: &Event) {
        self.counters.begin();
        match self.insert_with_retry(event).await {
            Ok(InsertOutcome::Inserted) => {
                self.counters.finish(Tally::Unique);
                debug!(dedup_key = %event.dedup_key(), "processed new event");
            }
            Ok(InsertOutcome::Duplicate) => {
                self.counters.finish(Tally::Duplicate);
                info!(dedup_key = %event.dedup_key(), "dropped duplicate event");
            }
            Err(e) => {
                self.counters.finish(Tally::Failed);
                error!(dedup_key = %event.dedup_key(), error = %e, "failed to process event");
            }
        }
    }

    async fn insert_with_retry(&self, event: &Event) -> Result<InsertOutcome, IngestError> {
        let mut attempt = 0;
        loop {
            match self.store.try_insert(event).await {
                Err(e) if e.is_retryable() && attempt < self.config.store_retries => {
                    attempt += 1;
                    warn!(
                        dedup_key = %event.dedup_key(),
                        attempt,
                        error = %e,
                        "store unavailable, retrying insert"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use idemlog_test_support::{
        FailingDedupStore, FlakyDedupStore, RecordingDedupStore, sample_event,
    };

    use super::*;

    fn fast_config() -> ConsumerConfig {
        ConsumerConfig {
            batch_size: 4,
            poll_interval: Duration::from_millis(5),
            store_retries: 2,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn consumer_with(store: Arc<dyn DedupStore>) -> (Arc<IntakeQueue>, Consumer) {
        let queue = Arc::new(IntakeQueue::new(1_000).unwrap());
        let consumer = Consumer::new(Arc::clone(&queue), store, fast_config());
        (queue, consumer)
    }

    #[tokio::test]
    async fn test_new_consumer_is_idle_with_zero_stats() {
        let (_queue, consumer) = consumer_with(Arc::new(RecordingDedupStore::new()));

        assert_eq!(consumer.state(), ConsumerState::Idle);
        assert_eq!(consumer.stats(), ConsumerStats::default());
    }

    #[tokio::test]
    async fn test_interleaved_duplicates_scenario() {
        let store = Arc::new(RecordingDedupStore::new());
        let (queue, consumer) = consumer_with(store.clone());

        for id in ["e1", "e2", "e1", "e1", "e2"] {
            queue.enqueue(sample_event("t", id)).unwrap();
        }
        consumer.start().await;
        consumer.stop().await;

        let stats = consumer.stats();
        assert_eq!(stats.received, 5);
        assert_eq!(stats.unique_processed, 2);
        assert_eq!(stats.duplicate_dropped, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(store.records().len(), 2);
        let attempted: Vec<_> = store.attempts().iter().map(ToString::to_string).collect();
        assert_eq!(attempted, ["t:e1", "t:e2", "t:e1", "t:e1", "t:e2"]);
    }

    #[tokio::test]
    async fn test_stop_drains_everything_queued() {
        let store = Arc::new(RecordingDedupStore::with_insert_delay(Duration::from_millis(1)));
        let (queue, consumer) = consumer_with(store);
        consumer.start().await;

        for i in 0..50 {
            queue.enqueue(sample_event("drain", &format!("e{i}"))).unwrap();
        }
        consumer.stop().await;

        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert!(queue.is_empty());
        let stats = consumer.stats();
        assert_eq!(stats.received, 50);
        assert_eq!(stats.unique_processed, 50);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let (_queue, consumer) = consumer_with(Arc::new(RecordingDedupStore::new()));

        consumer.start().await;
        consumer.start().await;
        assert_eq!(consumer.state(), ConsumerState::Running);

        consumer.stop().await;
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_before_start_and_repeated_stop_are_noops() {
        let (_queue, consumer) = consumer_with(Arc::new(RecordingDedupStore::new()));

        consumer.stop().await;
        assert_eq!(consumer.state(), ConsumerState::Idle);

        consumer.start().await;
        consumer.stop().await;
        consumer.stop().await;
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn test_stopped_consumer_can_restart() {
        let (queue, consumer) = consumer_with(Arc::new(RecordingDedupStore::new()));
        consumer.start().await;
        consumer.stop().await;

        queue.enqueue(sample_event("t", "late")).unwrap();
        consumer.start().await;
        consumer.stop().await;

        assert_eq!(consumer.stats().received, 1);
        assert_eq!(consumer.stats().unique_processed, 1);
    }

    #[tokio::test]
    async fn test_running_consumer_picks_up_events_while_polling() {
        let (queue, consumer) = consumer_with(Arc::new(RecordingDedupStore::new()));
        consumer.start().await;

        queue.enqueue(sample_event("t", "e1")).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while consumer.stats().received < 1 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(consumer.state(), ConsumerState::Running);
        consumer.stop().await;
    }

    #[tokio::test]
    async fn test_store_failures_are_counted_and_do_not_stall_the_batch() {
        let (queue, consumer) = consumer_with(Arc::new(FailingDedupStore));
        for i in 0..6 {
            queue.enqueue(sample_event("t", &format!("e{i}"))).unwrap();
        }

        consumer.start().await;
        consumer.stop().await;

        let stats = consumer.stats();
        assert_eq!(stats.received, 6);
        assert_eq!(stats.failed, 6);
        assert_eq!(stats.unique_processed + stats.duplicate_dropped, 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_transient_store_failure_is_retried() {
        let store = Arc::new(FlakyDedupStore::new(2));
        let (queue, consumer) = consumer_with(store.clone());
        queue.enqueue(sample_event("t", "e1")).unwrap();

        consumer.start().await;
        consumer.stop().await;

        let stats = consumer.stats();
        assert_eq!(stats.unique_processed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(store.inner().records().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = Arc::new(FlakyDedupStore::new(3));
        let (queue, consumer) = consumer_with(store.clone());
        queue.enqueue(sample_event("t", "e1")).unwrap();
        queue.enqueue(sample_event("t", "e2")).unwrap();

        consumer.start().await;
        consumer.stop().await;

        let stats = consumer.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.unique_processed, 1);
    }

    #[tokio::test]
    async fn test_reset_stats_zeroes_counters() {
        let (queue, consumer) = consumer_with(Arc::new(RecordingDedupStore::new()));
        queue.enqueue(sample_event("t", "e1")).unwrap();
        consumer.start().await;
        consumer.stop().await;

        consumer.reset_stats();

        assert_eq!(consumer.stats(), ConsumerStats::default());
    }

    fn assert_identity(stats: ConsumerStats) {
        assert!(
            stats.received >= stats.unique_processed + stats.duplicate_dropped + stats.failed,
            "counter identity broken: {stats:?}"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stats_snapshots_hold_identity_while_busy() {
        let store = Arc::new(RecordingDedupStore::new());
        let queue = Arc::new(IntakeQueue::new(20_000).unwrap());
        let consumer = Arc::new(Consumer::new(
            Arc::clone(&queue),
            store,
            ConsumerConfig {
                batch_size: 100,
                ..fast_config()
            },
        ));
        for i in 0..20_000 {
            queue
                .enqueue(sample_event("busy", &format!("e{}", i % 500)))
                .unwrap();
        }

        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reader = {
            let consumer = Arc::clone(&consumer);
            let done = Arc::clone(&done);
            tokio::task::spawn_blocking(move || {
                let mut reads = 0_u64;
                while !done.load(std::sync::atomic::Ordering::Acquire) {
                    assert_identity(consumer.stats());
                    reads += 1;
                    if reads % 1_000 == 0 {
                        consumer.reset_stats();
                    }
                }
                reads
            })
        };

        consumer.start().await;
        consumer.stop().await;
        done.store(true, std::sync::atomic::Ordering::Release);

        assert!(reader.await.unwrap() > 0);
        let stats = consumer.stats();
        assert_identity(stats);
        assert_eq!(
            stats.received,
            stats.unique_processed + stats.duplicate_dropped + stats.failed
        );
    }

    #[tokio::test]
    async fn test_reset_while_idle_keeps_identity_exact() {
        let (queue, consumer) = consumer_with(Arc::new(RecordingDedupStore::new()));
        queue.enqueue(sample_event("t", "e1")).unwrap();
        consumer.start().await;
        consumer.stop().await;
        consumer.reset_stats();

        queue.enqueue(sample_event("t", "e1")).unwrap();
        consumer.start().await;
        consumer.stop().await;

        let stats = consumer.stats();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.duplicate_dropped, 1);
    }
}
