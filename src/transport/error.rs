//! Error types shared by the push and fallback channel implementations.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Convenient result alias returning [`TransportError`] failures.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures that can occur while talking to the call authority.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The push socket is not open.
    #[error("push channel is not connected")]
    NotConnected,
    /// The push writer task is gone or its queue is full.
    #[error("push channel writer is unavailable")]
    ChannelClosed,
    /// An outbound frame could not be encoded.
    #[error("failed to encode push frame")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build fallback HTTP client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// A fallback request could not be sent.
    #[error("failed to send fallback request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The fallback endpoint answered with an unexpected status and no usable error body.
    #[error("unexpected fallback response status {status} for `{path}`")]
    RequestStatus { path: String, status: StatusCode },
    /// A fallback response body could not be decoded.
    #[error("failed to decode fallback response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The authority refused the call because it was requested too early.
    #[error("call requested too early; next allowed at {next_allowed_at}")]
    TooEarly { next_allowed_at: i64 },
    /// The authority refused the call with another machine-readable code.
    #[error("call rejected by the authority with code `{code}`")]
    Rejected { code: String },
    /// The fallback request did not complete in time.
    #[error("fallback request timed out after {0:?}")]
    Timeout(Duration),
}
