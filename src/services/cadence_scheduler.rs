//! Per-session scheduling loop.
//!
//! One task owns the [`CallSession`] for its whole life. Outside influence arrives as
//! [`SessionCommand`]s and is only applied between attempts, so no attempt ever races
//! with an interval change or an externally observed call.

use std::time::Duration;

use rand::Rng;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc, watch,
    },
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::SchedulerTuning,
    dto::push::PushAck,
    services::{confirmation_gate::ConfirmationGate, precise_sleep::PreciseSleep},
    state::{
        clock::{EpochClock, EpochMillis},
        events::{SchedulerEvent, SchedulerStatus},
        session::{CallSession, Resolution, SessionSnapshot},
    },
};

/// Requests forwarded from the session controller to the running loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Use a new interval from the next scheduling decision on.
    SetInterval(u64),
    /// A call for this game was played elsewhere at `play_at_ms`.
    ExternalCall { play_at_ms: EpochMillis },
}

/// Whether the loop keeps going after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Why a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    /// The deadline was reached.
    Deadline,
    /// Session state changed; the current plan may be stale.
    Replan,
    /// The session is stopping.
    Canceled,
}

/// Everything a scheduling loop needs besides the session itself.
pub struct SchedulerLinks {
    /// Shared epoch timeline.
    pub clock: EpochClock,
    /// Reachability of the call authority.
    pub online: watch::Receiver<bool>,
    /// Requests from the controller, applied between waits.
    pub commands: mpsc::Receiver<SessionCommand>,
    /// Push acknowledgements no attempt was waiting for.
    pub strays: broadcast::Receiver<PushAck>,
    /// Played calls and status changes.
    pub events: broadcast::Sender<SchedulerEvent>,
    /// Latest session state for diagnostics readers.
    pub diagnostics: watch::Sender<SessionSnapshot>,
    /// Stops the loop and suppresses pending effects.
    pub cancel: CancellationToken,
}

/// Drives one call session: plans each tick, waits for its send instant, runs the
/// attempt through the confirmation gate and reacts to the outcome.
pub struct CadenceScheduler {
    session: CallSession,
    gate: ConfirmationGate,
    tuning: SchedulerTuning,
    sleeper: PreciseSleep,
    clock: EpochClock,
    online: watch::Receiver<bool>,
    commands: mpsc::Receiver<SessionCommand>,
    strays: Option<broadcast::Receiver<PushAck>>,
    events: broadcast::Sender<SchedulerEvent>,
    diagnostics: watch::Sender<SessionSnapshot>,
    cancel: CancellationToken,
}

impl CadenceScheduler {
    /// Wire a scheduler around `session`; nothing runs until [`CadenceScheduler::run`].
    pub fn new(
        session: CallSession,
        gate: ConfirmationGate,
        tuning: SchedulerTuning,
        links: SchedulerLinks,
    ) -> Self {
        Self {
            session,
            gate,
            sleeper: PreciseSleep::from_tuning(&tuning),
            tuning,
            clock: links.clock,
            online: links.online,
            commands: links.commands,
            strays: Some(links.strays),
            events: links.events,
            diagnostics: links.diagnostics,
            cancel: links.cancel,
        }
    }

    /// Run until the session is canceled.
    pub async fn run(mut self) {
        info!(
            game_id = %self.session.game_id(),
            session_id = %self.session.id(),
            interval_ms = self.session.interval_ms(),
            "cadence scheduler started"
        );

        while self.cycle().await == Flow::Continue {}

        info!(
            game_id = %self.session.game_id(),
            session_id = %self.session.id(),
            tick = self.session.tick(),
            "cadence scheduler stopped"
        );
    }

    async fn cycle(&mut self) -> Flow {
        if self.cancel.is_cancelled() {
            return Flow::Stop;
        }

        if self.session.in_flight() {
            return self.pause(self.tuning.in_flight_poll).await;
        }

        if !self.is_online() {
            return self.suspend_until_online().await;
        }

        let plan = match self.session.plan() {
            Ok(plan) => plan,
            Err(err) => {
                error!(game_id = %self.session.game_id(), error = %err, "cannot plan next call");
                return self.pause(self.tuning.in_flight_poll).await;
            }
        };
        self.publish();
        debug!(
            game_id = %self.session.game_id(),
            session_id = %self.session.id(),
            tick = plan.tick,
            target_ms = plan.target_ms,
            send_at_ms = plan.send_at_ms,
            lead_ms = plan.lead_ms,
            "next call planned"
        );

        match self.wait_until(plan.send_at_ms).await {
            Wake::Canceled => return Flow::Stop,
            Wake::Replan => return Flow::Continue,
            Wake::Deadline => {}
        }

        if !self.is_online() {
            return Flow::Continue;
        }

        let resolution = self
            .gate
            .attempt(&mut self.session, &plan, &self.diagnostics, &self.cancel)
            .await;
        self.publish();

        match resolution {
            Ok(Resolution::Advanced {
                played_tick,
                play_at_ms,
                rtt_ms,
            }) => {
                info!(
                    game_id = %self.session.game_id(),
                    session_id = %self.session.id(),
                    tick = played_tick,
                    play_at_ms,
                    rtt_ms,
                    lead_ms = self.session.lead_ms(),
                    "call confirmed"
                );
                Flow::Continue
            }
            Ok(Resolution::Reanchored { target_ms }) => {
                warn!(
                    game_id = %self.session.game_id(),
                    session_id = %self.session.id(),
                    tick = self.session.tick(),
                    target_ms,
                    "authority rejected the call as too early; re-anchored"
                );
                Flow::Continue
            }
            Ok(Resolution::Retry {
                consecutive_failures,
            }) => self.back_off(consecutive_failures).await,
            Ok(Resolution::Dropped) => Flow::Stop,
            Err(err) => {
                error!(game_id = %self.session.game_id(), error = %err, "call attempt rejected by the session");
                self.pause(self.tuning.in_flight_poll).await
            }
        }
    }

    /// Wait out a randomised retry delay without advancing the tick.
    async fn back_off(&mut self, consecutive_failures: u32) -> Flow {
        let delay = self.backoff_delay();
        let until_ms = self.clock.now_ms() + delay.as_millis() as EpochMillis;
        self.session.back_off(until_ms);
        self.publish();

        warn!(
            game_id = %self.session.game_id(),
            session_id = %self.session.id(),
            tick = self.session.tick(),
            consecutive_failures,
            delay_ms = delay.as_millis() as u64,
            "call attempt failed; retrying"
        );
        if consecutive_failures >= self.tuning.retry_alert_after {
            self.emit(SchedulerStatus::Retrying {
                game_id: self.session.game_id().to_string(),
                consecutive_failures,
            });
        }

        loop {
            match self.wait_until(until_ms).await {
                Wake::Canceled => return Flow::Stop,
                Wake::Deadline => return Flow::Continue,
                Wake::Replan => continue,
            }
        }
    }

    /// Hold the session while connectivity is down, polling for its return.
    async fn suspend_until_online(&mut self) -> Flow {
        self.session.suspend();
        self.publish();
        warn!(
            game_id = %self.session.game_id(),
            session_id = %self.session.id(),
            tick = self.session.tick(),
            "connectivity lost; call session suspended"
        );
        self.emit(SchedulerStatus::Suspended {
            game_id: self.session.game_id().to_string(),
        });

        while !self.is_online() {
            if self.pause(self.tuning.offline_poll).await == Flow::Stop {
                return Flow::Stop;
            }
        }

        self.session.resume();
        self.publish();
        info!(
            game_id = %self.session.game_id(),
            session_id = %self.session.id(),
            "connectivity restored; call session resumed"
        );
        self.emit(SchedulerStatus::Resumed {
            game_id: self.session.game_id().to_string(),
        });
        Flow::Continue
    }

    async fn pause(&mut self, duration: Duration) -> Flow {
        let until_ms = self.clock.now_ms() + duration.as_millis() as EpochMillis;
        match self.wait_until(until_ms).await {
            Wake::Canceled => Flow::Stop,
            Wake::Deadline | Wake::Replan => Flow::Continue,
        }
    }

    /// Sleep until `deadline_ms` while applying commands and stray acknowledgements.
    async fn wait_until(&mut self, deadline_ms: EpochMillis) -> Wake {
        let deadline = self.clock.instant_at(deadline_ms);
        if deadline <= Instant::now() && self.commands.is_empty() {
            return Wake::Deadline;
        }

        let interrupt = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Interrupt::Canceled,
            command = self.commands.recv() => Interrupt::Command(command),
            stray = next_stray(&mut self.strays) => Interrupt::Stray(stray),
            _ = self.sleeper.until(deadline) => Interrupt::Deadline,
        };

        match interrupt {
            Interrupt::Canceled | Interrupt::Command(None) => Wake::Canceled,
            Interrupt::Deadline => Wake::Deadline,
            Interrupt::Command(Some(command)) => {
                self.apply_command(command);
                self.publish();
                Wake::Replan
            }
            Interrupt::Stray(Ok(ack)) => {
                self.gate.observe_stray(&mut self.session, &ack);
                self.publish();
                Wake::Replan
            }
            Interrupt::Stray(Err(RecvError::Lagged(skipped))) => {
                warn!(game_id = %self.session.game_id(), skipped, "stray acknowledgements lagged");
                Wake::Replan
            }
            Interrupt::Stray(Err(RecvError::Closed)) => {
                self.strays = None;
                Wake::Replan
            }
        }
    }

    fn apply_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SetInterval(interval_ms) => {
                self.session.set_interval(interval_ms);
                info!(
                    game_id = %self.session.game_id(),
                    session_id = %self.session.id(),
                    interval_ms,
                    lead_ms = self.session.lead_ms(),
                    next_target_ms = self.session.target_ms(),
                    "interval changed"
                );
            }
            SessionCommand::ExternalCall { play_at_ms } => {
                match self.session.observe_external_call(play_at_ms) {
                    Ok(tick) => info!(
                        game_id = %self.session.game_id(),
                        session_id = %self.session.id(),
                        tick,
                        play_at_ms,
                        next_target_ms = self.session.target_ms(),
                        "external call folded into the session"
                    ),
                    Err(err) => warn!(
                        game_id = %self.session.game_id(),
                        error = %err,
                        "external call ignored"
                    ),
                }
            }
        }
    }

    fn backoff_delay(&self) -> Duration {
        let min = self.tuning.backoff_min.as_millis() as u64;
        let max = (self.tuning.backoff_max.as_millis() as u64).max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn publish(&self) {
        self.diagnostics.send_replace(self.session.snapshot());
    }

    fn emit(&self, status: SchedulerStatus) {
        let _ = self.events.send(SchedulerEvent::Status(status));
    }
}

enum Interrupt {
    Canceled,
    Deadline,
    Command(Option<SessionCommand>),
    Stray(Result<PushAck, RecvError>),
}

/// Next stray acknowledgement; pends forever once the stream is gone.
async fn next_stray(
    strays: &mut Option<broadcast::Receiver<PushAck>>,
) -> Result<PushAck, RecvError> {
    match strays {
        Some(receiver) => receiver.recv().await,
        None => futures::future::pending().await,
    }
}
