use std::time::{Duration, Instant};

use chrono::Utc;

/// Source of capture timestamps.
///
/// `now` is monotonic elapsed time since the clock's origin. Wall-clock
/// adjustments after start-up never move it backwards, so successive
/// observations from one producer always carry non-decreasing timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;

    /// Unix millis at the clock's origin.
    fn origin_ms(&self) -> i64;

    /// Unix millis for "now", anchored at the origin.
    fn timestamp_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.now().as_millis()).unwrap_or(i64::MAX);
        self.origin_ms().saturating_add(elapsed)
    }
}

/// `Instant`-backed clock, anchored to the wall clock once at construction.
pub struct MonotonicClock {
    origin: Instant,
    origin_ms: i64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_ms: Utc::now().timestamp_millis(),
        }
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

    fn origin_ms(&self) -> i64 {
        self.origin_ms
    }
}
