use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/calls",
    tag = "sse",
    responses((status = 200, description = "Played calls and scheduler status", content_type = "text/event-stream", body = String))
)]
/// Stream every call at its play instant, along with scheduler status changes.
pub async fn calls_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let receiver = sse_service::subscribe_calls(&state);
    info!("New call SSE connection");
    sse_service::broadcast_handshake(state.calls_sse(), state.is_online());
    sse_service::to_sse_stream(receiver)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/calls", get(calls_stream))
}
