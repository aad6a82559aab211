use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::state::{clock::EpochMillis, latency::LatencyEstimator};

/// Opaque identifier of the game being called.
pub type GameId = String;

/// Channel used to issue a call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Persistent low-latency push connection.
    Push,
    /// Request/response channel used while the push connection is down.
    Fallback,
}

impl Transport {
    /// Stable lowercase name used in logs and diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Push => "push",
            Transport::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number accepted by the authority for a call attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalledNumber {
    /// The called ball.
    pub number: u8,
    /// Game identifier echoed by the authority.
    pub game: String,
    /// Instant the authority scheduled the call to be played, when it provides one.
    pub play_at_ms: Option<EpochMillis>,
}

/// Result of a single dispatched call attempt as reported by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The authority accepted the call.
    Confirmed(CalledNumber),
    /// The authority rejected the timing and named the earliest acceptable instant.
    TooEarly {
        /// Earliest instant the authority will accept the call at.
        next_allowed_ms: EpochMillis,
    },
    /// Network or server failure with no further meaning.
    TransientError,
    /// The attempt was invalidated by a session stop or restart.
    Canceled,
}

impl AttemptOutcome {
    /// Short name used in structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Confirmed(_) => "confirmed",
            AttemptOutcome::TooEarly { .. } => "too_early",
            AttemptOutcome::TransientError => "transient_error",
            AttemptOutcome::Canceled => "canceled",
        }
    }
}

/// Outcome folded into the session once the confirmation gate has reconciled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The call was confirmed and becomes perceivable at `play_at_ms`.
    Confirmed {
        /// Effective play instant after late-acknowledgement reconciliation.
        play_at_ms: EpochMillis,
    },
    /// The current tick must be re-anchored on `next_allowed_ms`.
    TooEarly {
        /// Earliest instant accepted by the authority.
        next_allowed_ms: EpochMillis,
    },
    /// The attempt failed and the same tick must be retried.
    Failed,
    /// The attempt was canceled and must leave no trace.
    Canceled,
}

/// Explicit scheduling phases of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadencePhase {
    /// Nothing planned yet.
    Idle,
    /// Connectivity is down; no attempt will be made until it returns.
    Suspended,
    /// Waiting for the send instant of the next attempt.
    Scheduled {
        /// Instant the call should become perceivable.
        target_ms: EpochMillis,
        /// Instant the request will be dispatched.
        send_at_ms: EpochMillis,
    },
    /// A request has been dispatched and awaits its outcome.
    InFlight {
        /// Identifier of the pending attempt.
        attempt_id: Uuid,
        /// Target instant of the pending attempt.
        target_ms: EpochMillis,
    },
    /// Waiting out the retry delay after a transient failure.
    Backoff {
        /// End of the retry delay.
        until_ms: EpochMillis,
    },
}

impl CadencePhase {
    /// Short name used in logs and diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            CadencePhase::Idle => "idle",
            CadencePhase::Suspended => "suspended",
            CadencePhase::Scheduled { .. } => "scheduled",
            CadencePhase::InFlight { .. } => "in_flight",
            CadencePhase::Backoff { .. } => "backoff",
        }
    }
}

/// Next attempt computed from the anchor and tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPlan {
    /// Tick the attempt is for.
    pub tick: u64,
    /// Instant the call should become perceivable.
    pub target_ms: EpochMillis,
    /// Instant the request should be dispatched (`target_ms - lead_ms`).
    pub send_at_ms: EpochMillis,
    /// Interval in force when the plan was made.
    pub interval_ms: u64,
    /// Lead time in force when the plan was made.
    pub lead_ms: u64,
}

/// A dispatched request, kept until its outcome is folded into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallAttempt {
    /// Unique identifier of the attempt.
    pub id: Uuid,
    /// Tick the attempt is for.
    pub tick: u64,
    /// Instant the call should become perceivable.
    pub target_ms: EpochMillis,
    /// Instant the request was actually dispatched.
    pub sent_at_ms: EpochMillis,
    /// Interval hint sent along with the request.
    pub interval_ms: u64,
    /// Channel chosen for the request.
    pub transport: Transport,
}

/// How the session moved after an attempt was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The tick was confirmed and the session moved on.
    Advanced {
        /// Tick that was just played.
        played_tick: u64,
        /// Instant the call plays at.
        play_at_ms: EpochMillis,
        /// Round trip of the attempt.
        rtt_ms: u64,
    },
    /// The current tick was re-anchored on the authority's earliest instant.
    Reanchored {
        /// New target of the current tick.
        target_ms: EpochMillis,
    },
    /// The current tick must be retried after a backoff.
    Retry {
        /// Failures in a row since the last confirmation.
        consecutive_failures: u32,
    },
    /// The attempt was canceled; nothing changed.
    Dropped,
}

/// Contract violations on the session model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// An attempt is already pending; a second dispatch would break ordering.
    #[error("a call attempt is already in flight")]
    AlreadyInFlight,
    /// No attempt is pending.
    #[error("no call attempt is in flight")]
    NoAttemptInFlight,
    /// The settled attempt is not the pending one.
    #[error("attempt {got} does not match the in-flight attempt {expected}")]
    AttemptMismatch {
        /// Pending attempt identifier.
        expected: Uuid,
        /// Provided attempt identifier.
        got: Uuid,
    },
}

/// Read-only view of a session used for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Identifier of the session.
    pub session_id: Uuid,
    /// Game being called.
    pub game_id: GameId,
    /// Current tick.
    pub tick: u64,
    /// Origin of the tick grid.
    pub anchor_ms: EpochMillis,
    /// Spacing between calls.
    pub interval_ms: u64,
    /// Current adaptive lead time.
    pub lead_ms: u64,
    /// Target instant of the current tick.
    pub next_target_ms: EpochMillis,
    /// Dispatch instant of the current tick.
    pub next_send_ms: EpochMillis,
    /// Play instant of the most recent confirmed call.
    pub last_confirmed_play_ms: Option<EpochMillis>,
    /// Current scheduling phase.
    pub phase: CadencePhase,
    /// Whether an attempt is pending.
    pub in_flight: bool,
    /// Failed attempts in a row since the last confirmation.
    pub consecutive_failures: u32,
}

/// Transient scheduling state of one game being called.
///
/// Targets are computed as `anchor + tick * interval` so per-call timing errors never
/// accumulate, with `last_confirmed_play + interval` as a lower bound.
#[derive(Debug, Clone)]
pub struct CallSession {
    id: Uuid,
    game_id: GameId,
    anchor_ms: EpochMillis,
    tick: u64,
    interval_ms: u64,
    lead_ms: u64,
    last_confirmed_play_ms: Option<EpochMillis>,
    in_flight: Option<CallAttempt>,
    phase: CadencePhase,
    latency: LatencyEstimator,
    consecutive_failures: u32,
}

impl CallSession {
    /// Create a session anchored at `now_ms` with tick 1.
    pub fn new(
        game_id: impl Into<GameId>,
        interval_ms: u64,
        now_ms: EpochMillis,
        latency: LatencyEstimator,
    ) -> Self {
        let lead_ms = latency.lead_for(interval_ms);
        Self {
            id: Uuid::new_v4(),
            game_id: game_id.into(),
            anchor_ms: now_ms,
            tick: 1,
            interval_ms,
            lead_ms,
            last_confirmed_play_ms: None,
            in_flight: None,
            phase: CadencePhase::Idle,
            latency,
            consecutive_failures: 0,
        }
    }

    /// Identifier of this session.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Game being called.
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// Current tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Origin of the tick grid.
    pub fn anchor_ms(&self) -> EpochMillis {
        self.anchor_ms
    }

    /// Spacing between calls.
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Current adaptive lead time.
    pub fn lead_ms(&self) -> u64 {
        self.lead_ms
    }

    /// Play instant of the most recent confirmed call.
    pub fn last_confirmed_play_ms(&self) -> Option<EpochMillis> {
        self.last_confirmed_play_ms
    }

    /// Whether an attempt is pending.
    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Current scheduling phase.
    pub fn phase(&self) -> CadencePhase {
        self.phase
    }

    /// Failed attempts in a row since the last confirmation.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Target instant of the current tick.
    pub fn target_ms(&self) -> EpochMillis {
        let grid = self.grid_target_ms();
        match self.last_confirmed_play_ms {
            Some(last) => grid.max(last.saturating_add(self.interval_ms as EpochMillis)),
            None => grid,
        }
    }

    /// Plan the next attempt. Fails while another attempt is pending.
    pub fn plan(&mut self) -> Result<CallPlan, SessionError> {
        if self.in_flight.is_some() {
            return Err(SessionError::AlreadyInFlight);
        }

        let target_ms = self.target_ms();
        let send_at_ms = target_ms.saturating_sub(self.lead_ms as EpochMillis);
        self.phase = CadencePhase::Scheduled {
            target_ms,
            send_at_ms,
        };

        Ok(CallPlan {
            tick: self.tick,
            target_ms,
            send_at_ms,
            interval_ms: self.interval_ms,
            lead_ms: self.lead_ms,
        })
    }

    /// Mark an attempt for `plan` as dispatched at `now_ms`.
    pub fn begin_attempt(
        &mut self,
        plan: &CallPlan,
        transport: Transport,
        now_ms: EpochMillis,
    ) -> Result<CallAttempt, SessionError> {
        if self.in_flight.is_some() {
            return Err(SessionError::AlreadyInFlight);
        }

        let attempt = CallAttempt {
            id: Uuid::new_v4(),
            tick: plan.tick,
            target_ms: plan.target_ms,
            sent_at_ms: now_ms,
            interval_ms: plan.interval_ms,
            transport,
        };
        self.phase = CadencePhase::InFlight {
            attempt_id: attempt.id,
            target_ms: attempt.target_ms,
        };
        self.in_flight = Some(attempt.clone());

        Ok(attempt)
    }

    /// Drop the pending attempt without folding any outcome. Returns whether it was pending.
    pub fn release(&mut self, attempt_id: Uuid) -> bool {
        match &self.in_flight {
            Some(attempt) if attempt.id == attempt_id => {
                self.in_flight = None;
                self.phase = CadencePhase::Idle;
                true
            }
            _ => false,
        }
    }

    /// Fold the settled outcome of the pending attempt into the session.
    ///
    /// Only a confirmation advances the tick.
    pub fn settle(
        &mut self,
        attempt_id: Uuid,
        settlement: Settlement,
        now_ms: EpochMillis,
    ) -> Result<Resolution, SessionError> {
        let attempt = self
            .in_flight
            .take()
            .ok_or(SessionError::NoAttemptInFlight)?;

        if attempt.id != attempt_id {
            let expected = attempt.id;
            self.in_flight = Some(attempt);
            return Err(SessionError::AttemptMismatch {
                expected,
                got: attempt_id,
            });
        }

        self.phase = CadencePhase::Idle;

        let resolution = match settlement {
            Settlement::Confirmed { play_at_ms } => {
                let rtt_ms = (now_ms - attempt.sent_at_ms).max(0) as u64;
                self.latency.record(rtt_ms);
                self.lead_ms = self.latency.lead_for(self.interval_ms);
                self.consecutive_failures = 0;

                let played_tick = self.tick;
                self.tick += 1;
                self.last_confirmed_play_ms = Some(play_at_ms);
                self.enforce_floor();

                Resolution::Advanced {
                    played_tick,
                    play_at_ms,
                    rtt_ms,
                }
            }
            Settlement::TooEarly { next_allowed_ms } => {
                self.anchor_ms = next_allowed_ms - self.grid_offset_ms(self.tick);
                self.last_confirmed_play_ms =
                    Some(next_allowed_ms - self.interval_ms as EpochMillis);
                Resolution::Reanchored {
                    target_ms: self.target_ms(),
                }
            }
            Settlement::Failed => {
                self.consecutive_failures += 1;
                Resolution::Retry {
                    consecutive_failures: self.consecutive_failures,
                }
            }
            Settlement::Canceled => Resolution::Dropped,
        };

        Ok(resolution)
    }

    /// Fold a call that was played elsewhere, exactly as a confirmation would.
    ///
    /// A report older than the last confirmed play never moves the cadence earlier.
    /// Returns the tick that the external call consumed.
    pub fn observe_external_call(&mut self, play_at_ms: EpochMillis) -> Result<u64, SessionError> {
        if self.in_flight.is_some() {
            return Err(SessionError::AlreadyInFlight);
        }

        let played_at = self
            .last_confirmed_play_ms
            .map_or(play_at_ms, |last| last.max(play_at_ms));
        let played_tick = self.tick;
        self.tick += 1;
        self.last_confirmed_play_ms = Some(played_at);
        self.anchor_ms = played_at
            .saturating_add(self.interval_ms as EpochMillis)
            .saturating_sub(self.grid_offset_ms(self.tick));
        self.consecutive_failures = 0;
        self.phase = CadencePhase::Idle;

        Ok(played_tick)
    }

    /// Move the last confirmed play instant later when a redundant acknowledgement
    /// reports a later play time. Never moves it earlier.
    pub fn refine_last_play(&mut self, play_at_ms: EpochMillis) -> bool {
        match self.last_confirmed_play_ms {
            Some(last) if play_at_ms > last => {
                self.last_confirmed_play_ms = Some(play_at_ms);
                self.enforce_floor();
                true
            }
            _ => false,
        }
    }

    /// Change the interval for the next scheduling decision.
    ///
    /// The next target becomes one new interval after the last play (or after the
    /// anchor when nothing has been played yet); already played calls are untouched.
    pub fn set_interval(&mut self, interval_ms: u64) {
        let reference = self
            .last_confirmed_play_ms
            .unwrap_or(self.anchor_ms.saturating_add(self.grid_offset_ms(self.tick - 1)));
        self.interval_ms = interval_ms;
        self.anchor_ms = reference.saturating_sub(self.grid_offset_ms(self.tick - 1));
        self.lead_ms = self.latency.lead_for(interval_ms);
    }

    /// Enter the suspended phase while connectivity is down.
    pub fn suspend(&mut self) {
        if self.in_flight.is_none() {
            self.phase = CadencePhase::Suspended;
        }
    }

    /// Leave the suspended phase.
    pub fn resume(&mut self) {
        if self.phase == CadencePhase::Suspended {
            self.phase = CadencePhase::Idle;
        }
    }

    /// Record the retry delay after a failed attempt.
    pub fn back_off(&mut self, until_ms: EpochMillis) {
        if self.in_flight.is_none() {
            self.phase = CadencePhase::Backoff { until_ms };
        }
    }

    /// Capture the current state for diagnostics.
    pub fn snapshot(&self) -> SessionSnapshot {
        let next_target_ms = self.target_ms();
        SessionSnapshot {
            session_id: self.id,
            game_id: self.game_id.clone(),
            tick: self.tick,
            anchor_ms: self.anchor_ms,
            interval_ms: self.interval_ms,
            lead_ms: self.lead_ms,
            next_target_ms,
            next_send_ms: next_target_ms.saturating_sub(self.lead_ms as EpochMillis),
            last_confirmed_play_ms: self.last_confirmed_play_ms,
            phase: self.phase,
            in_flight: self.in_flight.is_some(),
            consecutive_failures: self.consecutive_failures,
        }
    }

    fn grid_offset_ms(&self, tick: u64) -> EpochMillis {
        (tick as EpochMillis).saturating_mul(self.interval_ms as EpochMillis)
    }

    fn grid_target_ms(&self) -> EpochMillis {
        self.anchor_ms.saturating_add(self.grid_offset_ms(self.tick))
    }

    /// Re-anchor the grid so the current target is not earlier than one interval
    /// after the last play.
    fn enforce_floor(&mut self) {
        if let Some(last) = self.last_confirmed_play_ms {
            let floor = last.saturating_add(self.interval_ms as EpochMillis);
            if floor > self.grid_target_ms() {
                self.anchor_ms = floor.saturating_sub(self.grid_offset_ms(self.tick));
            }
        }
    }
}
