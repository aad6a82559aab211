use std::collections::VecDeque;

/// Number of round-trip samples kept by default.
pub const DEFAULT_RTT_WINDOW: usize = 10;

/// Bounds applied when turning the observed latency into a lead time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadPolicy {
    /// Minimum lead time, always honoured.
    pub floor_ms: u64,
    /// Margin added on top of the 95th percentile round trip.
    pub headroom_ms: u64,
    /// Amount subtracted from the interval to obtain the lead ceiling.
    pub ceiling_slack_ms: u64,
    /// Lowest value the lead ceiling may take for short intervals.
    pub ceiling_floor_ms: u64,
}

impl Default for LeadPolicy {
    fn default() -> Self {
        Self {
            floor_ms: 2_000,
            headroom_ms: 500,
            ceiling_slack_ms: 800,
            ceiling_floor_ms: 1_000,
        }
    }
}

/// Rolling round-trip window deriving the adaptive lead time.
#[derive(Debug, Clone)]
pub struct LatencyEstimator {
    samples: VecDeque<u64>,
    capacity: usize,
    policy: LeadPolicy,
}

impl LatencyEstimator {
    /// Create an empty estimator keeping at most `capacity` samples.
    pub fn new(capacity: usize, policy: LeadPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            policy,
        }
    }

    /// Record a round trip, evicting the oldest sample once the window is full.
    pub fn record(&mut self, rtt_ms: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);
    }

    /// Samples currently held, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = u64> + '_ {
        self.samples.iter().copied()
    }

    /// Nearest-rank 95th percentile of the window.
    ///
    /// Windows shorter than twenty samples cannot separate the 95th percentile from the
    /// maximum, so the largest sample is returned for them.
    pub fn p95(&self) -> Option<u64> {
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let rank = (sorted.len() * 95).div_ceil(100);
        sorted.get(rank.checked_sub(1)?).copied()
    }

    /// Lead time to use for the given interval.
    ///
    /// The result is `p95 + headroom`, capped at `max(ceiling_floor, interval - slack)`.
    /// The lead floor wins over the ceiling when the two cross on short intervals.
    pub fn lead_for(&self, interval_ms: u64) -> u64 {
        let policy = &self.policy;
        let ceiling = policy
            .ceiling_floor_ms
            .max(interval_ms.saturating_sub(policy.ceiling_slack_ms));
        let wanted = self
            .p95()
            .map_or(policy.floor_ms, |p95| p95 + policy.headroom_ms);
        wanted.min(ceiling).max(policy.floor_ms)
    }
}

impl Default for LatencyEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_RTT_WINDOW, LeadPolicy::default())
    }
}
