//! Wiring shared by the scheduling tests: a controller over fake channels on a paused clock.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, watch},
    time::timeout,
};

use crate::{
    config::SchedulerTuning,
    services::{session_controller::SessionController, transport_arbiter::TransportArbiter},
    state::{
        clock::{EpochClock, EpochMillis},
        events::{CallNotification, SchedulerEvent, SchedulerStatus},
    },
    transport::fake::{FakeFallbackChannel, FakePushChannel},
};

pub const T0: EpochMillis = 1_700_000_000_000;

/// Longest a test waits for an event before failing.
const EVENT_WAIT: Duration = Duration::from_secs(120);

pub struct Harness {
    pub controller: SessionController,
    pub push: Arc<FakePushChannel>,
    pub fallback: Arc<FakeFallbackChannel>,
    pub online: watch::Sender<bool>,
    pub clock: EpochClock,
    pub events: broadcast::Receiver<SchedulerEvent>,
}

impl Harness {
    pub fn new(push_connected: bool, online: bool) -> Self {
        let clock = EpochClock::with_origin(T0);
        let tuning = SchedulerTuning::default();
        let push = FakePushChannel::new(push_connected);
        let fallback = FakeFallbackChannel::new(true);
        let arbiter = Arc::new(TransportArbiter::new(
            push.clone(),
            fallback.clone(),
            clock,
            Duration::from_millis(3_000),
            &tuning,
        ));
        let (online_tx, online_rx) = watch::channel(online);
        let controller = SessionController::new(arbiter, clock, tuning, online_rx);
        let events = controller.subscribe();

        Self {
            controller,
            push,
            fallback,
            online: online_tx,
            clock,
            events,
        }
    }

    pub async fn next_event(&mut self) -> SchedulerEvent {
        timeout(EVENT_WAIT, self.events.recv())
            .await
            .expect("no scheduler event in time")
            .expect("scheduler events closed")
    }

    /// Next played call, skipping status events.
    pub async fn next_played(&mut self) -> CallNotification {
        loop {
            if let SchedulerEvent::CallPlayed(call) = self.next_event().await {
                return call;
            }
        }
    }

    /// Next status event, skipping played calls.
    pub async fn next_status(&mut self) -> SchedulerStatus {
        loop {
            if let SchedulerEvent::Status(status) = self.next_event().await {
                return status;
            }
        }
    }

    /// Events already delivered, without waiting.
    pub fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
