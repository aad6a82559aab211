//! Public entry point for starting, steering and stopping the call session.

use std::sync::Arc;

use tokio::{
    sync::{
        Mutex, broadcast,
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::SchedulerTuning,
    error::ServiceError,
    services::{
        cadence_scheduler::{CadenceScheduler, SchedulerLinks, SessionCommand},
        confirmation_gate::ConfirmationGate,
        precise_sleep::PreciseSleep,
        transport_arbiter::TransportArbiter,
    },
    state::{
        clock::{EpochClock, EpochMillis},
        events::{SchedulerEvent, SchedulerStatus},
        latency::LatencyEstimator,
        session::{CallSession, GameId, SessionSnapshot},
    },
};

const COMMAND_CAPACITY: usize = 16;
const EVENT_CAPACITY: usize = 64;
/// How far in the past an externally played call may be reported.
const EXTERNAL_CALL_MAX_AGE_MS: EpochMillis = 10 * 60 * 1_000;
/// How far in the future an externally played call may be reported.
const EXTERNAL_CALL_MAX_AHEAD_MS: EpochMillis = 5_000;

/// Handles of the running scheduling loop.
struct ActiveSession {
    game_id: GameId,
    session_id: Uuid,
    cancel: CancellationToken,
    commands: mpsc::Sender<SessionCommand>,
    diagnostics: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

/// Owns at most one call session and wires it to the transport arbiter.
///
/// Starting a session while another one runs stops the previous loop first, so two
/// loops never run at the same time.
pub struct SessionController {
    arbiter: Arc<TransportArbiter>,
    clock: EpochClock,
    tuning: SchedulerTuning,
    online: watch::Receiver<bool>,
    events: broadcast::Sender<SchedulerEvent>,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    /// Build an idle controller; no session runs until [`SessionController::start`].
    pub fn new(
        arbiter: Arc<TransportArbiter>,
        clock: EpochClock,
        tuning: SchedulerTuning,
        online: watch::Receiver<bool>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            arbiter,
            clock,
            tuning,
            online,
            events,
            active: Mutex::new(None),
        }
    }

    /// Subscribe to confirmed calls and status changes of every session.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Whether the authority is currently reachable.
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Whether the push channel is connected.
    pub fn push_connected(&self) -> bool {
        self.arbiter.push_connected()
    }

    /// Start calling `game_id` every `interval_ms`, anchored at the current instant.
    pub async fn start(
        &self,
        game_id: impl Into<GameId>,
        interval_ms: u64,
    ) -> Result<SessionSnapshot, ServiceError> {
        let game_id = game_id.into();
        if game_id.trim().is_empty() {
            return Err(ServiceError::InvalidInput("game id must not be empty".into()));
        }
        self.check_interval(interval_ms)?;

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.shutdown(previous, "superseded").await;
        }

        let latency = LatencyEstimator::new(self.tuning.rtt_window, self.tuning.lead_policy());
        let session = CallSession::new(game_id.clone(), interval_ms, self.clock.now_ms(), latency);
        let snapshot = session.snapshot();
        let session_id = session.id();

        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (diagnostics_tx, diagnostics_rx) = watch::channel(snapshot.clone());

        let gate = ConfirmationGate::new(
            self.arbiter.clone(),
            self.clock,
            PreciseSleep::from_tuning(&self.tuning),
            self.events.clone(),
            self.tuning.late_ack_threshold_ms,
        );
        let scheduler = CadenceScheduler::new(
            session,
            gate,
            self.tuning.clone(),
            SchedulerLinks {
                clock: self.clock,
                online: self.online.clone(),
                commands: commands_rx,
                strays: self.arbiter.subscribe_acks(),
                events: self.events.clone(),
                diagnostics: diagnostics_tx,
                cancel: cancel.clone(),
            },
        );
        let task = tokio::spawn(scheduler.run());

        info!(%game_id, %session_id, interval_ms, "call session started");
        *active = Some(ActiveSession {
            game_id,
            session_id,
            cancel,
            commands: commands_tx,
            diagnostics: diagnostics_rx,
            task,
        });

        Ok(snapshot)
    }

    /// Stop the running session, if any. Returns whether a session was stopped.
    pub async fn stop(&self) -> bool {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(previous) => {
                self.shutdown(previous, "stopped").await;
                true
            }
            None => false,
        }
    }

    /// Change the interval used from the next scheduling decision on.
    pub async fn set_interval(&self, interval_ms: u64) -> Result<(), ServiceError> {
        self.check_interval(interval_ms)?;
        self.send(SessionCommand::SetInterval(interval_ms)).await
    }

    /// Fold a call played elsewhere into the running session.
    ///
    /// The play instant must lie close to the current instant.
    pub async fn acknowledge_external_call(
        &self,
        play_at_ms: EpochMillis,
    ) -> Result<(), ServiceError> {
        let now_ms = self.clock.now_ms();
        let earliest = now_ms.saturating_sub(EXTERNAL_CALL_MAX_AGE_MS);
        let latest = now_ms.saturating_add(EXTERNAL_CALL_MAX_AHEAD_MS);
        if !(earliest..=latest).contains(&play_at_ms) {
            return Err(ServiceError::InvalidInput(format!(
                "external call instant {play_at_ms} is outside [{earliest}, {latest}]"
            )));
        }
        self.send(SessionCommand::ExternalCall { play_at_ms }).await
    }

    /// Latest published state of the running session.
    pub async fn diagnostics(&self) -> Option<SessionSnapshot> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .map(|session| session.diagnostics.borrow().clone())
    }

    fn check_interval(&self, interval_ms: u64) -> Result<(), ServiceError> {
        if interval_ms < self.tuning.min_interval_ms {
            return Err(ServiceError::InvalidInput(format!(
                "interval must be at least {} ms (got {interval_ms})",
                self.tuning.min_interval_ms
            )));
        }
        if interval_ms > self.tuning.max_interval_ms {
            return Err(ServiceError::InvalidInput(format!(
                "interval must be at most {} ms (got {interval_ms})",
                self.tuning.max_interval_ms
            )));
        }
        Ok(())
    }

    /// Queue a command without waiting; a full queue means the loop is busy dispatching.
    async fn send(&self, command: SessionCommand) -> Result<(), ServiceError> {
        let active = self.active.lock().await;
        let session = active.as_ref().ok_or(ServiceError::NoActiveSession)?;

        session.commands.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => {
                warn!(game_id = %session.game_id, "session command queue is full");
                ServiceError::SessionBusy
            }
            TrySendError::Closed(_) => ServiceError::SessionClosed,
        })
    }

    /// Cancel a session and wait for its loop to finish.
    async fn shutdown(&self, session: ActiveSession, reason: &'static str) {
        session.cancel.cancel();
        if let Err(err) = session.task.await {
            warn!(game_id = %session.game_id, error = %err, "cadence scheduler task failed");
        }

        info!(
            game_id = %session.game_id,
            session_id = %session.session_id,
            reason,
            "call session ended"
        );
        let _ = self.events.send(SchedulerEvent::Status(SchedulerStatus::Stopped {
            game_id: session.game_id,
        }));
    }
}
