use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report reachability of the call authority and whether a session is running.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let push_connected = state.push_connected();
    let session_active = state.controller().diagnostics().await.is_some();

    if state.is_online() {
        HealthResponse::ok(push_connected, session_active)
    } else {
        warn!(session_active, "call authority unreachable (offline mode)");
        HealthResponse::degraded(push_connected, session_active)
    }
}
