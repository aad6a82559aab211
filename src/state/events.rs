use uuid::Uuid;

use crate::state::{clock::EpochMillis, session::GameId};

/// Notifications crossing the scheduler boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A confirmed call reached its play instant.
    CallPlayed(CallNotification),
    /// Diagnostic status change of the running session.
    Status(SchedulerStatus),
}

/// Confirmed call, fired at the instant it should be played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallNotification {
    /// Game the call belongs to.
    pub game_id: GameId,
    /// Session that confirmed the call.
    pub session_id: Uuid,
    /// The called number.
    pub number: u8,
    /// Tick the call consumed.
    pub tick: u64,
    /// Instant the call is played at.
    pub play_at_ms: EpochMillis,
}

/// Degraded or lifecycle status of the running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerStatus {
    /// Attempts keep failing; the scheduler is still retrying.
    Retrying {
        /// Game concerned.
        game_id: GameId,
        /// Failures in a row since the last confirmation.
        consecutive_failures: u32,
    },
    /// Connectivity was lost and the scheduler is waiting for it.
    Suspended {
        /// Game concerned.
        game_id: GameId,
    },
    /// Connectivity came back and scheduling resumed.
    Resumed {
        /// Game concerned.
        game_id: GameId,
    },
    /// The session was stopped or superseded.
    Stopped {
        /// Game concerned.
        game_id: GameId,
    },
}

impl SchedulerStatus {
    /// Short name used on the wire and in logs.
    pub fn label(&self) -> &'static str {
        match self {
            SchedulerStatus::Retrying { .. } => "retrying",
            SchedulerStatus::Suspended { .. } => "suspended",
            SchedulerStatus::Resumed { .. } => "resumed",
            SchedulerStatus::Stopped { .. } => "stopped",
        }
    }

    /// Game the status refers to.
    pub fn game_id(&self) -> &str {
        match self {
            SchedulerStatus::Retrying { game_id, .. }
            | SchedulerStatus::Suspended { game_id }
            | SchedulerStatus::Resumed { game_id }
            | SchedulerStatus::Stopped { game_id } => game_id,
        }
    }
}
