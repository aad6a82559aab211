use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod fallback;
pub mod health;
pub mod push;
pub mod session;
pub mod sse;
pub mod validation;

/// Render epoch milliseconds as an RFC3339 timestamp for diagnostics.
fn format_epoch_millis(epoch_ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(epoch_ms) * 1_000_000)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}
