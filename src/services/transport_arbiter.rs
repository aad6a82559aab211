//! Channel selection and outcome interpretation for call attempts.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        watch,
    },
    time::{sleep_until, timeout},
};
use tracing::{debug, warn};

use crate::{
    config::SchedulerTuning,
    dto::{
        fallback::FallbackCallRequest,
        push::{PushAck, PushAckBody, PushCallRequest, PushStatus},
    },
    state::{
        clock::{EpochClock, EpochMillis},
        session::{AttemptOutcome, CallAttempt, CalledNumber, GameId, Transport},
    },
    transport::{FallbackChannel, PushChannel, TransportError},
};

/// Push dispatch records older than this no longer affect spacing and are dropped.
const STALE_DISPATCH_MS: EpochMillis = 120_000;

/// Decides which channel carries an attempt and turns every channel result into an
/// [`AttemptOutcome`]. Transport errors never leave this type.
pub struct TransportArbiter {
    push: Arc<dyn PushChannel>,
    fallback: Arc<dyn FallbackChannel>,
    clock: EpochClock,
    fallback_timeout: Duration,
    push_rate_floor_ms: u64,
    last_push_dispatch: DashMap<GameId, EpochMillis>,
}

impl TransportArbiter {
    /// Arbiter over both channels; push spacing comes from `tuning`.
    pub fn new(
        push: Arc<dyn PushChannel>,
        fallback: Arc<dyn FallbackChannel>,
        clock: EpochClock,
        fallback_timeout: Duration,
        tuning: &SchedulerTuning,
    ) -> Self {
        Self {
            push,
            fallback,
            clock,
            fallback_timeout,
            push_rate_floor_ms: tuning.push_rate_floor_ms,
            last_push_dispatch: DashMap::new(),
        }
    }

    /// Channel the next attempt should use.
    pub fn select(&self) -> Transport {
        if self.push.is_connected() {
            Transport::Push
        } else {
            Transport::Fallback
        }
    }

    /// Whether the push socket is open.
    pub fn push_connected(&self) -> bool {
        self.push.is_connected()
    }

    /// Subscribe to every push acknowledgement, including ones no attempt is waiting for.
    pub fn subscribe_acks(&self) -> broadcast::Receiver<PushAck> {
        self.push.subscribe()
    }

    /// Select a channel and, for the push channel, wait until the per-game spacing
    /// since the previous push dispatch has elapsed.
    pub async fn prepare(&self, game_id: &str, interval_ms: u64) -> Transport {
        let transport = self.select();
        if transport == Transport::Push {
            if let Some(ready_at) = self.push_ready_at(game_id, interval_ms) {
                if ready_at > self.clock.now_ms() {
                    debug!(game_id, ready_at, "spacing push dispatch");
                    sleep_until(self.clock.instant_at(ready_at)).await;
                }
            }
        }
        transport
    }

    /// Issue `attempt` over its channel and wait for the outcome.
    ///
    /// Dropping the returned future abandons the request.
    pub async fn dispatch(&self, game_id: &str, attempt: &CallAttempt) -> AttemptOutcome {
        match attempt.transport {
            Transport::Push => self.dispatch_push(game_id, attempt).await,
            Transport::Fallback => self.dispatch_fallback(game_id, attempt).await,
        }
    }

    /// Minimum spacing between two push dispatches for one game.
    fn push_spacing_ms(&self, interval_ms: u64) -> u64 {
        self.push_rate_floor_ms.max(interval_ms / 2)
    }

    fn push_ready_at(&self, game_id: &str, interval_ms: u64) -> Option<EpochMillis> {
        let last = *self.last_push_dispatch.get(game_id)?;
        Some(last.saturating_add(self.push_spacing_ms(interval_ms) as EpochMillis))
    }

    async fn dispatch_push(&self, game_id: &str, attempt: &CallAttempt) -> AttemptOutcome {
        let mut acks = self.push.subscribe();
        let mut connection = self.push.connection();

        let request = PushCallRequest {
            game_id: game_id.to_string(),
            play_at_epoch: attempt.target_ms,
            min_interval_ms: attempt.interval_ms,
        };
        if let Err(err) = self.push.send_call(request) {
            warn!(game_id, attempt_id = %attempt.id, error = %err, "push dispatch failed");
            return AttemptOutcome::TransientError;
        }
        let now_ms = self.clock.now_ms();
        self.last_push_dispatch.insert(game_id.to_string(), now_ms);
        self.last_push_dispatch
            .retain(|_, dispatched_at| now_ms - *dispatched_at < STALE_DISPATCH_MS);

        loop {
            tokio::select! {
                received = acks.recv() => match received {
                    Ok(ack) if ack.game_id == game_id => return push_outcome(game_id, ack.body),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(game_id, skipped, "push acknowledgements lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        warn!(game_id, "push acknowledgement stream closed");
                        return AttemptOutcome::TransientError;
                    }
                },
                _ = disconnected(&mut connection) => {
                    warn!(game_id, attempt_id = %attempt.id, "push channel dropped while awaiting acknowledgement");
                    return AttemptOutcome::TransientError;
                }
            }
        }
    }

    async fn dispatch_fallback(&self, game_id: &str, attempt: &CallAttempt) -> AttemptOutcome {
        let request = FallbackCallRequest {
            game_id: game_id.to_string(),
            desired_number: None,
            min_interval_ms: attempt.interval_ms,
            play_at_epoch: attempt.target_ms,
        };

        let result = match timeout(self.fallback_timeout, self.fallback.request_call(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.fallback_timeout)),
        };

        match result {
            Ok(response) => AttemptOutcome::Confirmed(CalledNumber {
                number: response.called_number,
                game: response.game,
                play_at_ms: None,
            }),
            Err(TransportError::TooEarly { next_allowed_at }) => AttemptOutcome::TooEarly {
                next_allowed_ms: next_allowed_at,
            },
            Err(err) => {
                warn!(game_id, attempt_id = %attempt.id, error = %err, "fallback call failed");
                AttemptOutcome::TransientError
            }
        }
    }
}

/// Resolve once the push socket reports it is closed.
async fn disconnected(connection: &mut watch::Receiver<bool>) {
    let _ = connection.wait_for(|connected| !connected).await;
}

fn push_outcome(game_id: &str, body: PushAckBody) -> AttemptOutcome {
    match body {
        PushAckBody::Called {
            number,
            game,
            play_at_epoch,
        } => AttemptOutcome::Confirmed(CalledNumber {
            number,
            game,
            play_at_ms: Some(play_at_epoch),
        }),
        PushAckBody::Status {
            status: PushStatus::TooEarly,
            next_allowed_at: Some(next_allowed_ms),
        } => AttemptOutcome::TooEarly { next_allowed_ms },
        PushAckBody::Status { status, .. } => {
            warn!(game_id, ?status, "push call rejected");
            AttemptOutcome::TransientError
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::transport::fake::{FakeFallbackChannel, FakePushChannel, FallbackReply, PushReply};

    const T0: EpochMillis = 1_700_000_000_000;

    fn arbiter(
        push: &Arc<FakePushChannel>,
        fallback: &Arc<FakeFallbackChannel>,
    ) -> TransportArbiter {
        TransportArbiter::new(
            push.clone(),
            fallback.clone(),
            EpochClock::with_origin(T0),
            Duration::from_millis(3_000),
            &SchedulerTuning::default(),
        )
    }

    fn attempt(transport: Transport, target_ms: EpochMillis) -> CallAttempt {
        CallAttempt {
            id: Uuid::new_v4(),
            tick: 1,
            target_ms,
            sent_at_ms: T0,
            interval_ms: 1_000,
            transport,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn prefers_push_and_falls_back_when_disconnected() {
        let push = FakePushChannel::new(true);
        let fallback = FakeFallbackChannel::new(true);
        let arbiter = arbiter(&push, &fallback);

        assert_eq!(arbiter.select(), Transport::Push);
        push.set_connected(false);
        assert_eq!(arbiter.select(), Transport::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn push_ack_is_matched_by_game() {
        let push = FakePushChannel::new(true);
        let fallback = FakeFallbackChannel::new(true);
        let arbiter = arbiter(&push, &fallback);
        push.script(PushReply::called(250, 17, "hall-1", T0 + 1_000));

        let pusher = push.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            pusher.push_ack(
                "hall-2",
                PushAckBody::Called {
                    number: 3,
                    game: "hall-2".into(),
                    play_at_epoch: T0,
                },
            );
        });

        let outcome = arbiter
            .dispatch("hall-1", &attempt(Transport::Push, T0 + 1_000))
            .await;
        assert_eq!(
            outcome,
            AttemptOutcome::Confirmed(CalledNumber {
                number: 17,
                game: "hall-1".into(),
                play_at_ms: Some(T0 + 1_000),
            })
        );

        let sent = push.next_sent().await;
        assert_eq!(sent.play_at_epoch, T0 + 1_000);
        assert_eq!(sent.min_interval_ms, 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn push_statuses_map_to_outcomes() {
        let push = FakePushChannel::new(true);
        let fallback = FakeFallbackChannel::new(true);
        let arbiter = arbiter(&push, &fallback);

        push.script(PushReply::too_early(50, T0 + 1_500));
        let outcome = arbiter
            .dispatch("hall-1", &attempt(Transport::Push, T0 + 1_000))
            .await;
        assert_eq!(
            outcome,
            AttemptOutcome::TooEarly {
                next_allowed_ms: T0 + 1_500
            }
        );

        push.script(PushReply::error(50));
        let outcome = arbiter
            .dispatch("hall-1", &attempt(Transport::Push, T0 + 1_000))
            .await;
        assert_eq!(outcome, AttemptOutcome::TransientError);
    }

    #[tokio::test(start_paused = true)]
    async fn old_push_dispatch_records_are_dropped() {
        let push = FakePushChannel::new(true);
        let fallback = FakeFallbackChannel::new(true);
        let arbiter = arbiter(&push, &fallback);

        push.script(PushReply::called(50, 5, "hall-1", T0 + 1_000));
        arbiter
            .dispatch("hall-1", &attempt(Transport::Push, T0 + 1_000))
            .await;
        assert!(arbiter.last_push_dispatch.contains_key("hall-1"));

        tokio::time::sleep(Duration::from_secs(130)).await;
        push.script(PushReply::called(50, 6, "hall-2", T0 + 131_000));
        arbiter
            .dispatch("hall-2", &attempt(Transport::Push, T0 + 131_000))
            .await;

        assert_eq!(arbiter.last_push_dispatch.len(), 1);
        assert!(arbiter.last_push_dispatch.contains_key("hall-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn push_disconnect_fails_the_pending_attempt() {
        let push = FakePushChannel::new(true);
        let fallback = FakeFallbackChannel::new(true);
        let arbiter = arbiter(&push, &fallback);

        let dropper = push.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            dropper.set_connected(false);
        });

        let outcome = arbiter
            .dispatch("hall-1", &attempt(Transport::Push, T0 + 1_000))
            .await;
        assert_eq!(outcome, AttemptOutcome::TransientError);
    }

    #[tokio::test(start_paused = true)]
    async fn push_dispatches_are_spaced_per_game() {
        let push = FakePushChannel::new(true);
        let fallback = FakeFallbackChannel::new(true);
        let arbiter = arbiter(&push, &fallback);
        let clock = EpochClock::with_origin(T0);

        push.script(PushReply::called(10, 1, "hall-1", T0));
        arbiter
            .dispatch("hall-1", &attempt(Transport::Push, T0))
            .await;

        assert_eq!(arbiter.prepare("hall-1", 1_000).await, Transport::Push);
        assert_eq!(clock.now_ms(), T0 + 600);

        // Another game is not held back.
        assert_eq!(arbiter.prepare("hall-2", 1_000).await, Transport::Push);
        assert_eq!(clock.now_ms(), T0 + 600);

        // Slow sessions space dispatches by half their interval.
        push.script(PushReply::called(10, 2, "hall-1", T0));
        arbiter
            .dispatch("hall-1", &attempt(Transport::Push, T0))
            .await;
        arbiter.prepare("hall-1", 4_000).await;
        assert_eq!(clock.now_ms(), T0 + 600 + 2_000);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_results_map_to_outcomes() {
        let push = FakePushChannel::new(false);
        let fallback = FakeFallbackChannel::new(true);
        let arbiter = arbiter(&push, &fallback);

        fallback.script(FallbackReply::called(200, 33, "hall-1"));
        let outcome = arbiter
            .dispatch("hall-1", &attempt(Transport::Fallback, T0 + 2_000))
            .await;
        assert_eq!(
            outcome,
            AttemptOutcome::Confirmed(CalledNumber {
                number: 33,
                game: "hall-1".into(),
                play_at_ms: None,
            })
        );
        assert_eq!(fallback.sent()[0].play_at_epoch, T0 + 2_000);

        fallback.script(FallbackReply::failing(
            20,
            TransportError::TooEarly {
                next_allowed_at: T0 + 2_600,
            },
        ));
        let outcome = arbiter
            .dispatch("hall-1", &attempt(Transport::Fallback, T0 + 2_000))
            .await;
        assert_eq!(
            outcome,
            AttemptOutcome::TooEarly {
                next_allowed_ms: T0 + 2_600
            }
        );

        fallback.script(FallbackReply::failing(
            20,
            TransportError::Rejected {
                code: "GAME_OVER".into(),
            },
        ));
        let outcome = arbiter
            .dispatch("hall-1", &attempt(Transport::Fallback, T0 + 2_000))
            .await;
        assert_eq!(outcome, AttemptOutcome::TransientError);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_timeout_is_transient() {
        let push = FakePushChannel::new(false);
        let fallback = FakeFallbackChannel::new(true);
        let arbiter = arbiter(&push, &fallback);
        let clock = EpochClock::with_origin(T0);

        // Unscripted requests never complete.
        let outcome = arbiter
            .dispatch("hall-1", &attempt(Transport::Fallback, T0 + 2_000))
            .await;
        assert_eq!(outcome, AttemptOutcome::TransientError);
        assert_eq!(clock.now_ms(), T0 + 3_000);
    }
}
