use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    state::{SharedState, SseHub},
};

const EVENT_HANDSHAKE: &str = "handshake";

/// Subscribe to the call stream.
pub fn subscribe_calls(state: &SharedState) -> broadcast::Receiver<ServerEvent> {
    state.calls_sse().subscribe()
}

/// Convert a broadcast receiver into an SSE response, forwarding events until the
/// client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }

                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Missed calls are gone; keep the stream alive.
                            warn!(skipped, "SSE client lagging behind the call stream");
                            continue;
                        }
                    }
                }
            }
        }

        info!("call SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Greet a newly connected client with the current connectivity.
pub fn broadcast_handshake(hub: &SseHub, online: bool) {
    match ServerEvent::json(
        Some(EVENT_HANDSHAKE.to_string()),
        &Handshake {
            message: "call stream connected".into(),
            online,
        },
    ) {
        Ok(event) => {
            let receivers = hub.broadcast(event);
            debug!(receivers, "handshake sent");
        }
        Err(err) => warn!(error = %err, "failed to serialize SSE handshake"),
    }
}
