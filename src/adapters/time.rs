//! Monotonic clock adapter.
//!
//! Milliseconds since construction, from `std::time::Instant`.  One
//! instance is shared by the control loop and every producer thread so
//! that trigger timestamps and stage deadlines live on the same timeline.

use std::time::Instant;

use crate::app::ports::Clock;

pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
