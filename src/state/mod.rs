pub mod clock;
pub mod events;
pub mod latency;
pub mod session;
mod sse;

use std::sync::Arc;

use crate::services::session_controller::SessionController;

pub use self::sse::SseHub;

pub type SharedState = Arc<AppState>;

/// Capacity of the call stream; slow clients skip what they missed.
const CALLS_SSE_CAPACITY: usize = 64;

/// Central application state shared by every HTTP handler and background task.
pub struct AppState {
    controller: SessionController,
    calls: SseHub,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(controller: SessionController) -> SharedState {
        Arc::new(Self {
            controller,
            calls: SseHub::new(CALLS_SSE_CAPACITY),
        })
    }

    /// Owner of the running call session.
    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Broadcast hub of the call stream.
    pub fn calls_sse(&self) -> &SseHub {
        &self.calls
    }

    /// Whether the call authority is currently reachable.
    pub fn is_online(&self) -> bool {
        self.controller.is_online()
    }

    /// Whether the push channel socket is open.
    pub fn push_connected(&self) -> bool {
        self.controller.push_connected()
    }
}
