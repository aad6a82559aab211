use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Body of a call request sent over the fallback channel.
pub struct FallbackCallRequest {
    /// Game to call a number for.
    pub game_id: String,
    /// Number the caller would like, when it has a preference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_number: Option<u8>,
    /// Interval hint of the session.
    pub min_interval_ms: u64,
    /// Epoch milliseconds at which the number should become perceivable.
    pub play_at_epoch: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Successful fallback response.
pub struct FallbackCallResponse {
    /// The called ball.
    pub called_number: u8,
    /// Game identifier echoed by the authority.
    pub game: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Machine-readable error body returned by the fallback channel.
pub struct FallbackErrorBody {
    /// Error code, `TOO_EARLY` for timing rejections.
    pub code: String,
    /// Earliest acceptable instant for `TOO_EARLY` rejections.
    #[serde(default)]
    pub next_allowed_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_missing_desired_number() {
        let request = FallbackCallRequest {
            game_id: "g-1".into(),
            desired_number: None,
            min_interval_ms: 1_000,
            play_at_epoch: 42,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "gameId": "g-1", "minIntervalMs": 1_000, "playAtEpoch": 42 })
        );
    }

    #[test]
    fn error_body_tolerates_missing_instant() {
        let body: FallbackErrorBody = serde_json::from_str(r#"{"code":"RATE_LIMITED"}"#).unwrap();
        assert_eq!(body.code, "RATE_LIMITED");
        assert_eq!(body.next_allowed_at, None);
    }
}
