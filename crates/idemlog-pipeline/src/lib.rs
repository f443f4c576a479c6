//! idemlog Pipeline — intake queue and batching consumer.
//!
//! Producers push validated events into an [`IntakeQueue`]; a single
//! [`Consumer`] task drains it in batches and applies each event to a
//! `DedupStore`. Exactly-once storage effect comes from the store's atomic
//! insert, not from queue ordering.

pub mod consumer;
pub mod queue;

pub use consumer::{Consumer, ConsumerConfig, ConsumerState, ConsumerStats};
pub use queue::{DEFAULT_QUEUE_CAPACITY, IntakeQueue, MAX_QUEUE_CAPACITY};
