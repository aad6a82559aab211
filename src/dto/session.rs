//! DTO definitions used by the session REST API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::{
        format_epoch_millis,
        validation::{validate_game_id, validate_interval_ms},
    },
    state::session::SessionSnapshot,
};

/// Payload starting (or superseding) the call session of a game.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StartSessionRequest {
    /// Game to call numbers for.
    pub game_id: String,
    /// Spacing between two calls, in milliseconds.
    pub interval_ms: u64,
}

impl Validate for StartSessionRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_game_id(&self.game_id) {
            errors.add("game_id", e);
        }
        if let Err(e) = validate_interval_ms(self.interval_ms) {
            errors.add("interval_ms", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Payload changing the interval of the running session.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateIntervalRequest {
    /// New spacing between two calls, in milliseconds.
    pub interval_ms: u64,
}

impl Validate for UpdateIntervalRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_interval_ms(self.interval_ms) {
            errors.add("interval_ms", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// A call played by someone else (for example a manual operator override).
#[derive(Debug, Deserialize, ToSchema)]
pub struct ExternalCallRequest {
    /// Epoch milliseconds at which the call was played.
    pub play_at_ms: i64,
}

impl Validate for ExternalCallRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.play_at_ms <= 0 {
            let mut err = validator::ValidationError::new("play_at_range");
            err.message = Some("play_at_ms must be a positive epoch timestamp".into());
            errors.add("play_at_ms", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Diagnostic view of the running session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionDiagnostics {
    /// Identifier of this session; changes on every start.
    pub session_id: Uuid,
    /// Game being called.
    pub game_id: String,
    /// Tick of the next call.
    pub tick: u64,
    /// Configured spacing between calls.
    pub interval_ms: u64,
    /// Current adaptive lead time.
    pub lead_ms: u64,
    /// Epoch milliseconds at which the next call should play.
    pub next_target_ms: i64,
    /// RFC3339 rendering of `next_target_ms`.
    pub next_target_at: String,
    /// Epoch milliseconds at which the next request will be dispatched.
    pub next_send_ms: i64,
    /// Play instant of the last confirmed call, absent before the first one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_confirmed_play_ms: Option<i64>,
    /// Scheduling phase (`idle`, `scheduled`, `in_flight`, `backoff`, `suspended`).
    pub phase: String,
    /// Whether a request is awaiting its answer.
    pub in_flight: bool,
    /// Failed attempts since the last confirmation.
    pub consecutive_failures: u32,
    /// Whether the authority is currently reachable.
    pub online: bool,
}

impl SessionDiagnostics {
    /// Build the diagnostic payload from a session snapshot and the connectivity flag.
    pub fn from_snapshot(snapshot: &SessionSnapshot, online: bool) -> Self {
        Self {
            session_id: snapshot.session_id,
            game_id: snapshot.game_id.clone(),
            tick: snapshot.tick,
            interval_ms: snapshot.interval_ms,
            lead_ms: snapshot.lead_ms,
            next_target_ms: snapshot.next_target_ms,
            next_target_at: format_epoch_millis(snapshot.next_target_ms),
            next_send_ms: snapshot.next_send_ms,
            last_confirmed_play_ms: snapshot.last_confirmed_play_ms,
            phase: snapshot.phase.label().to_string(),
            in_flight: snapshot.in_flight,
            consecutive_failures: snapshot.consecutive_failures,
            online,
        }
    }
}
