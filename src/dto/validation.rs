//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest game identifier accepted by the API.
pub const MAX_GAME_ID_LEN: usize = 64;
/// Smallest interval an operator may request.
pub const MIN_INTERVAL_MS: u64 = 500;
/// Largest interval an operator may request.
pub const MAX_INTERVAL_MS: u64 = 120_000;

/// Validates that a game identifier is non-empty, bounded and free of whitespace.
///
/// # Examples
///
/// ```ignore
/// validate_game_id("hall-3-evening") // Ok
/// validate_game_id("")               // Err - empty
/// validate_game_id("hall 3")         // Err - whitespace
/// ```
pub fn validate_game_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_GAME_ID_LEN {
        let mut err = ValidationError::new("game_id_length");
        err.message = Some(
            format!(
                "Game ID must be between 1 and {MAX_GAME_ID_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        let mut err = ValidationError::new("game_id_format");
        err.message = Some("Game ID must not contain whitespace or control characters".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a call interval lies within the supported range.
pub fn validate_interval_ms(interval_ms: u64) -> Result<(), ValidationError> {
    if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&interval_ms) {
        let mut err = ValidationError::new("interval_range");
        err.message = Some(
            format!(
                "Interval must be between {MIN_INTERVAL_MS} and {MAX_INTERVAL_MS} ms (got {interval_ms})"
            )
            .into(),
        );
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_game_id_valid() {
        assert!(validate_game_id("hall-3-evening").is_ok());
        assert!(validate_game_id("7").is_ok());
        assert!(validate_game_id(&"g".repeat(MAX_GAME_ID_LEN)).is_ok());
    }

    #[test]
    fn test_validate_game_id_invalid_length() {
        assert!(validate_game_id("").is_err());
        assert!(validate_game_id(&"g".repeat(MAX_GAME_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_game_id_invalid_format() {
        assert!(validate_game_id("hall 3").is_err());
        assert!(validate_game_id("hall\t3").is_err());
    }

    #[test]
    fn test_validate_interval_bounds() {
        assert!(validate_interval_ms(500).is_ok());
        assert!(validate_interval_ms(4_000).is_ok());
        assert!(validate_interval_ms(499).is_err());
        assert!(validate_interval_ms(MAX_INTERVAL_MS + 1).is_err());
    }
}
