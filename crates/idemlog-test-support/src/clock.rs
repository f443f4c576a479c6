//! Test clocks — deterministic `Clock` implementations for tests.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use idemlog_core::clock::Clock;

/// A clock that always returns a fixed point in time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// A clock that advances by a fixed step every time it is read, starting at
/// `start`. Lets ordering tests avoid sleeping.
#[derive(Debug)]
pub struct SteppingClock {
    next: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl SteppingClock {
    /// Create a clock whose first reading is `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            next: Mutex::new(start),
            step,
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut next = self.next.lock().unwrap();
        let now = *next;
        *next = now + self.step;
        now
    }
}
