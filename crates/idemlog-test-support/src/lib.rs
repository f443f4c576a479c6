//! Shared test mocks and utilities for the idemlog aggregator.

mod clock;
mod event;
mod store;

pub use clock::{FixedClock, SteppingClock};
pub use event::{sample_event, sample_event_with_payload};
pub use store::{FailingDedupStore, FlakyDedupStore, RecordingDedupStore};
