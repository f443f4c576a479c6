//! Shared application state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use idemlog_core::clock::Clock;
use idemlog_core::store::DedupStore;
use idemlog_pipeline::{Consumer, IntakeQueue};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Durable dedup store, read by the query and stats endpoints.
    pub store: Arc<dyn DedupStore>,
    /// Intake queue fed by the publish endpoint.
    pub queue: Arc<IntakeQueue>,
    /// Background consumer draining the queue.
    pub consumer: Arc<Consumer>,
    /// Clock for uptime and health timestamps.
    pub clock: Arc<dyn Clock>,
    /// When the service started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create new application state, stamping `started_at` from `clock`.
    #[must_use]
    pub fn new(
        store: Arc<dyn DedupStore>,
        queue: Arc<IntakeQueue>,
        consumer: Arc<Consumer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let started_at = clock.now();
        Self {
            store,
            queue,
            consumer,
            clock,
            started_at,
        }
    }
}
