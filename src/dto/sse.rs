use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::format_epoch_millis,
    state::events::{CallNotification, SchedulerStatus},
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the call authority is currently reachable.
    pub online: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast at the exact play instant of each confirmed call.
pub struct CallPlayedEvent {
    pub game_id: String,
    pub session_id: Uuid,
    pub number: u8,
    pub tick: u64,
    pub play_at_ms: i64,
    /// RFC3339 rendering of `play_at_ms`.
    pub play_at: String,
}

impl From<&CallNotification> for CallPlayedEvent {
    fn from(call: &CallNotification) -> Self {
        Self {
            game_id: call.game_id.clone(),
            session_id: call.session_id,
            number: call.number,
            tick: call.tick,
            play_at_ms: call.play_at_ms,
            play_at: format_epoch_millis(call.play_at_ms),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the session degrades, recovers or stops.
pub struct SchedulerStatusEvent {
    /// `retrying`, `suspended`, `resumed` or `stopped`.
    pub status: String,
    pub game_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consecutive_failures: Option<u32>,
}

impl From<&SchedulerStatus> for SchedulerStatusEvent {
    fn from(status: &SchedulerStatus) -> Self {
        let consecutive_failures = match status {
            SchedulerStatus::Retrying {
                consecutive_failures,
                ..
            } => Some(*consecutive_failures),
            _ => None,
        };

        Self {
            status: status.label().to_string(),
            game_id: status.game_id().to_string(),
            consecutive_failures,
        }
    }
}
