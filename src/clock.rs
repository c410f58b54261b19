//! Monotonic time sources used to gate controller ticks

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic clock. Readings are offsets from an arbitrary, fixed origin.
pub trait Clock {
    fn now(&self) -> Duration;
}

// ============================================================================
// MONOTONIC CLOCK - Backed by std::time::Instant
// ============================================================================

#[derive(Clone, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

// ============================================================================
// MANUAL CLOCK - Advanced explicitly, for deterministic host-driven ticks
// ============================================================================

/// Clock that only moves when told to. Clones share the same reading, so a
/// test can keep one handle while the controller owns another.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    pub fn set(&self, to: Duration) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}
