//! The single path through which a called number becomes perceivable.

use std::{collections::HashSet, sync::Arc};

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::push::{PushAck, PushAckBody},
    services::{precise_sleep::PreciseSleep, transport_arbiter::TransportArbiter},
    state::{
        clock::{EpochClock, EpochMillis},
        events::{CallNotification, SchedulerEvent},
        session::{
            AttemptOutcome, CallAttempt, CallPlan, CallSession, CalledNumber, Resolution,
            SessionError, SessionSnapshot, Settlement,
        },
    },
};

/// Releases the in-flight attempt when dropped, whatever path the attempt took.
struct InFlightRelease<'a> {
    session: &'a mut CallSession,
    attempt_id: Uuid,
}

impl Drop for InFlightRelease<'_> {
    fn drop(&mut self) {
        if self.session.release(self.attempt_id) {
            debug!(attempt_id = %self.attempt_id, "released abandoned attempt");
        }
    }
}

/// Dispatches attempts one at a time, suppresses duplicate numbers and fires the
/// perceptible effect of each confirmed call at its play instant.
pub struct ConfirmationGate {
    arbiter: Arc<TransportArbiter>,
    clock: EpochClock,
    sleeper: PreciseSleep,
    events: broadcast::Sender<SchedulerEvent>,
    late_ack_threshold_ms: u64,
    applied: HashSet<u8>,
}

impl ConfirmationGate {
    /// Build a gate that dispatches through `arbiter` and announces effects on `events`.
    pub fn new(
        arbiter: Arc<TransportArbiter>,
        clock: EpochClock,
        sleeper: PreciseSleep,
        events: broadcast::Sender<SchedulerEvent>,
        late_ack_threshold_ms: u64,
    ) -> Self {
        Self {
            arbiter,
            clock,
            sleeper,
            events,
            late_ack_threshold_ms,
            applied: HashSet::new(),
        }
    }

    /// Numbers whose effect has already been fired in this session.
    pub fn applied(&self) -> &HashSet<u8> {
        &self.applied
    }

    /// Dispatch exactly one request for `plan` and fold its outcome into `session`.
    ///
    /// The in-flight state is published on `diagnostics` as soon as the request leaves.
    /// Canceling `cancel` abandons the request and suppresses any pending effect.
    pub async fn attempt(
        &mut self,
        session: &mut CallSession,
        plan: &CallPlan,
        diagnostics: &watch::Sender<SessionSnapshot>,
        cancel: &CancellationToken,
    ) -> Result<Resolution, SessionError> {
        let game_id = session.game_id().to_string();

        let transport = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Resolution::Dropped),
            transport = self.arbiter.prepare(&game_id, plan.interval_ms) => transport,
        };

        let attempt = session.begin_attempt(plan, transport, self.clock.now_ms())?;
        let release = InFlightRelease {
            session,
            attempt_id: attempt.id,
        };
        diagnostics.send_replace(release.session.snapshot());
        debug!(
            game_id = %game_id,
            session_id = %release.session.id(),
            tick = attempt.tick,
            target_ms = attempt.target_ms,
            lead_ms = plan.lead_ms,
            transport = %transport,
            "call attempt dispatched"
        );

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => AttemptOutcome::Canceled,
            outcome = self.arbiter.dispatch(&game_id, &attempt) => outcome,
        };

        let now_ms = self.clock.now_ms();
        debug!(
            game_id = %game_id,
            tick = attempt.tick,
            outcome = outcome.label(),
            rtt_ms = now_ms - attempt.sent_at_ms,
            "call attempt resolved"
        );

        let settlement = match outcome {
            AttemptOutcome::Confirmed(called) => {
                let play_at_ms = self.effective_play_ms(&attempt, &called, now_ms);
                self.apply(release.session, &attempt, &called, play_at_ms, cancel);
                Settlement::Confirmed { play_at_ms }
            }
            AttemptOutcome::TooEarly { next_allowed_ms } => Settlement::TooEarly { next_allowed_ms },
            AttemptOutcome::TransientError => Settlement::Failed,
            AttemptOutcome::Canceled => Settlement::Canceled,
        };

        release.session.settle(attempt.id, settlement, now_ms)
    }

    /// Handle a push acknowledgement that arrived while no attempt was waiting for it.
    ///
    /// A repeated number only refines the last play instant; anything else is ignored.
    pub fn observe_stray(&self, session: &mut CallSession, ack: &PushAck) {
        if ack.game_id != session.game_id() {
            return;
        }

        match &ack.body {
            PushAckBody::Called {
                number,
                play_at_epoch,
                ..
            } if self.applied.contains(number) => {
                if session.refine_last_play(*play_at_epoch) {
                    debug!(
                        game_id = %ack.game_id,
                        number,
                        play_at_ms = play_at_epoch,
                        "late duplicate refined the last play instant"
                    );
                }
            }
            PushAckBody::Called { number, .. } => {
                warn!(
                    game_id = %ack.game_id,
                    number,
                    "ignoring acknowledgement for a number this session never requested"
                );
            }
            PushAckBody::Status { status, .. } => {
                debug!(game_id = %ack.game_id, ?status, "ignoring stray status acknowledgement");
            }
        }
    }

    /// Play instant of a confirmed call.
    ///
    /// The authority's instant is honoured but never earlier than the planned target.
    /// An acknowledgement later than the threshold plays now instead of at a stale instant.
    fn effective_play_ms(
        &self,
        attempt: &CallAttempt,
        called: &CalledNumber,
        now_ms: EpochMillis,
    ) -> EpochMillis {
        let scheduled = called
            .play_at_ms
            .map_or(attempt.target_ms, |play_at| play_at.max(attempt.target_ms));

        if now_ms - scheduled > self.late_ack_threshold_ms as EpochMillis {
            warn!(
                game = %called.game,
                number = called.number,
                lateness_ms = now_ms - scheduled,
                "late acknowledgement; playing now"
            );
            now_ms
        } else {
            scheduled
        }
    }

    /// Fire the effect of a confirmed number unless it was already applied.
    fn apply(
        &mut self,
        session: &CallSession,
        attempt: &CallAttempt,
        called: &CalledNumber,
        play_at_ms: EpochMillis,
        cancel: &CancellationToken,
    ) {
        if !self.applied.insert(called.number) {
            warn!(
                game_id = %session.game_id(),
                number = called.number,
                "duplicate confirmation; effect suppressed"
            );
            return;
        }

        let notification = CallNotification {
            game_id: session.game_id().to_string(),
            session_id: session.id(),
            number: called.number,
            tick: attempt.tick,
            play_at_ms,
        };
        let deadline = self.clock.instant_at(play_at_ms);
        let sleeper = self.sleeper;
        let events = self.events.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(number = notification.number, "session stopped before the call played");
                    return;
                }
                _ = sleeper.until(deadline) => {}
            }

            info!(
                game_id = %notification.game_id,
                session_id = %notification.session_id,
                tick = notification.tick,
                number = notification.number,
                play_at_ms = notification.play_at_ms,
                "call played"
            );
            let _ = events.send(SchedulerEvent::CallPlayed(notification));
        });
    }
}
