use serde::{Deserialize, Serialize};

/// Status code the authority uses to reject a call that was requested too early.
pub const TOO_EARLY_CODE: &str = "TOO_EARLY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
/// Frames sent to the authority over the push channel.
pub enum PushOutboundMessage {
    /// Ask the authority to call the next number for a game.
    #[serde(rename = "call")]
    Call(PushCallRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Call request carried by the push channel.
pub struct PushCallRequest {
    /// Game to call a number for.
    pub game_id: String,
    /// Epoch milliseconds at which the number should become perceivable.
    pub play_at_epoch: i64,
    /// Interval hint of the session.
    pub min_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Acknowledgement pushed by the authority, correlated by game.
pub struct PushAck {
    /// Game the acknowledgement belongs to.
    pub game_id: String,
    /// Result carried by the acknowledgement.
    #[serde(flatten)]
    pub body: PushAckBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
/// Either a called number or a status rejection.
pub enum PushAckBody {
    /// The authority called a number.
    #[serde(rename_all = "camelCase")]
    Called {
        /// The called ball.
        number: u8,
        /// Game identifier echoed by the authority.
        game: String,
        /// Epoch milliseconds at which the number plays.
        play_at_epoch: i64,
    },
    /// The authority rejected the request.
    #[serde(rename_all = "camelCase")]
    Status {
        /// Rejection status.
        status: PushStatus,
        /// Earliest acceptable instant for `TOO_EARLY` rejections.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_allowed_at: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Rejection statuses understood by the scheduler.
pub enum PushStatus {
    /// The call was requested before the authority accepts it.
    #[serde(rename = "TOO_EARLY")]
    TooEarly,
    /// Generic authority failure.
    #[serde(rename = "ERROR")]
    Error,
    /// Any status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl PushAck {
    /// Parse an inbound text frame.
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
