//! Channels used to reach the call authority.

pub mod error;
#[cfg(test)]
pub mod fake;
pub mod http;
pub mod websocket;

use futures::future::BoxFuture;
use tokio::sync::{broadcast, watch};

use crate::dto::{
    fallback::{FallbackCallRequest, FallbackCallResponse},
    push::{PushAck, PushCallRequest},
};

pub use self::error::{TransportError, TransportResult};

/// Persistent low-latency connection to the authority.
///
/// Requests are fire-and-forget; acknowledgements arrive asynchronously on the
/// broadcast returned by [`PushChannel::subscribe`] and are correlated by game.
pub trait PushChannel: Send + Sync {
    /// Watch the connection state of the underlying socket.
    fn connection(&self) -> watch::Receiver<bool>;
    /// Register a new subscriber for inbound acknowledgements.
    fn subscribe(&self) -> broadcast::Receiver<PushAck>;
    /// Queue a call request for delivery.
    fn send_call(&self, request: PushCallRequest) -> TransportResult<()>;

    /// Whether the socket is currently open.
    fn is_connected(&self) -> bool {
        *self.connection().borrow()
    }
}

/// Request/response channel used while the push connection is down.
pub trait FallbackChannel: Send + Sync {
    /// Ask the authority for a number and wait for its answer.
    fn request_call(
        &self,
        request: FallbackCallRequest,
    ) -> BoxFuture<'static, TransportResult<FallbackCallResponse>>;
    /// Succeeds while the authority answers requests.
    fn health_check(&self) -> BoxFuture<'static, TransportResult<()>>;
}
