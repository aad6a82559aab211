//! Two-phase waits: a coarse timer followed by short fine-grained steps.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};

use crate::config::SchedulerTuning;

/// Smallest step of the fine phase.
const MIN_STEP: Duration = Duration::from_millis(1);

/// Sleeps until a deadline without relying on a single coarse timer.
///
/// The coarse phase ends `margin` before the deadline; the remaining time is covered
/// in `step` increments so the wake-up lands within one step of the deadline.
#[derive(Debug, Clone, Copy)]
pub struct PreciseSleep {
    margin: Duration,
    step: Duration,
}

impl PreciseSleep {
    /// Steps shorter than one millisecond are raised to it.
    pub fn new(margin: Duration, step: Duration) -> Self {
        Self {
            margin,
            step: step.max(MIN_STEP),
        }
    }

    /// Sleeper configured from the scheduler's spin settings.
    pub fn from_tuning(tuning: &SchedulerTuning) -> Self {
        Self::new(tuning.spin_margin, tuning.spin_step)
    }

    /// Return once `deadline` has been reached. Past deadlines return immediately.
    pub async fn until(self, deadline: Instant) {
        if let Some(coarse) = deadline.checked_sub(self.margin) {
            if coarse > Instant::now() {
                sleep_until(coarse).await;
            }
        }

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep_until((now + self.step).min(deadline)).await;
        }
    }
}
