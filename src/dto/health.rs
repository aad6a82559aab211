use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Whether the push channel socket is currently open.
    pub push_connected: bool,
    /// Whether a call session is running.
    pub session_active: bool,
}

impl HealthResponse {
    /// Create a health response indicating the authority is reachable.
    pub fn ok(push_connected: bool, session_active: bool) -> Self {
        Self {
            status: "ok".to_string(),
            push_connected,
            session_active,
        }
    }

    /// Create a health response indicating the authority is unreachable.
    pub fn degraded(push_connected: bool, session_active: bool) -> Self {
        Self {
            status: "degraded".to_string(),
            push_connected,
            session_active,
        }
    }
}
