use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    dto::sse::{CallPlayedEvent, SchedulerStatusEvent, ServerEvent},
    state::{
        SharedState,
        events::{CallNotification, SchedulerEvent, SchedulerStatus},
    },
};

const EVENT_CALL_PLAYED: &str = "call.played";
const EVENT_SCHEDULER_STATUS: &str = "scheduler.status";

/// Relay scheduler events onto the call stream until `cancel` fires.
pub async fn forward_scheduler_events(state: SharedState, cancel: CancellationToken) {
    let mut events = state.controller().subscribe();

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv() => received,
        };

        match received {
            Ok(SchedulerEvent::CallPlayed(call)) => broadcast_call_played(&state, &call),
            Ok(SchedulerEvent::Status(status)) => broadcast_scheduler_status(&state, &status),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "scheduler event relay lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }

    debug!("scheduler event relay stopped");
}

/// Broadcast a call at its play instant.
pub fn broadcast_call_played(state: &SharedState, call: &CallNotification) {
    send_public_event(state, EVENT_CALL_PLAYED, &CallPlayedEvent::from(call));
}

/// Broadcast a degraded or lifecycle status of the session.
pub fn broadcast_scheduler_status(state: &SharedState, status: &SchedulerStatus) {
    send_public_event(
        state,
        EVENT_SCHEDULER_STATUS,
        &SchedulerStatusEvent::from(status),
    );
}

fn send_public_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => {
            state.calls_sse().broadcast(event);
        }
        Err(err) => warn!(event, error = %err, "failed to serialize SSE payload"),
    }
}
