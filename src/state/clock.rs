//! Millisecond timeline shared by the scheduler, the authority and the viewers.
//!
//! Scheduling math is done in epoch-aligned milliseconds so that target instants can be
//! sent to the authority as-is. Readings are derived from the monotonic clock captured at
//! construction, which keeps them immune to wall-clock adjustments.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Milliseconds since the Unix epoch, read from the monotonic timeline.
pub type EpochMillis = i64;

/// Bridge between [`Instant`] readings and epoch milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct EpochClock {
    origin: Instant,
    origin_ms: EpochMillis,
}

impl EpochClock {
    /// Capture the current wall-clock time as the origin of the timeline.
    pub fn new() -> Self {
        let origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as EpochMillis)
            .unwrap_or_default();
        Self::with_origin(origin_ms)
    }

    /// Build a clock whose current instant reads as `origin_ms`.
    pub fn with_origin(origin_ms: EpochMillis) -> Self {
        Self {
            origin: Instant::now(),
            origin_ms,
        }
    }

    /// Current reading of the timeline.
    pub fn now_ms(&self) -> EpochMillis {
        self.to_millis(Instant::now())
    }

    /// Convert a monotonic instant into timeline milliseconds.
    ///
    /// Instants captured before the origin collapse onto the origin.
    pub fn to_millis(&self, instant: Instant) -> EpochMillis {
        let elapsed = instant.saturating_duration_since(self.origin);
        self.origin_ms + elapsed.as_millis() as EpochMillis
    }

    /// Convert timeline milliseconds back into a monotonic instant suitable for sleeping.
    ///
    /// Readings that precede the origin map to the origin, which is always in the past.
    pub fn instant_at(&self, at_ms: EpochMillis) -> Instant {
        let offset = at_ms - self.origin_ms;
        if offset <= 0 {
            self.origin
        } else {
            self.origin + Duration::from_millis(offset as u64)
        }
    }
}

impl Default for EpochClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn readings_follow_the_monotonic_clock() {
        let clock = EpochClock::with_origin(10_000);
        assert_eq!(clock.now_ms(), 10_000);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(clock.now_ms(), 11_500);
    }

    #[tokio::test(start_paused = true)]
    async fn instant_conversion_is_reversible_after_origin() {
        let clock = EpochClock::with_origin(50_000);
        let instant = clock.instant_at(52_250);
        assert_eq!(clock.to_millis(instant), 52_250);
    }

    #[tokio::test(start_paused = true)]
    async fn readings_before_origin_collapse_onto_origin() {
        let clock = EpochClock::with_origin(50_000);
        let instant = clock.instant_at(40_000);
        assert_eq!(clock.to_millis(instant), 50_000);
    }
}
