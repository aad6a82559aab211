use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc, watch},
    time::sleep,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dto::push::{PushAck, PushCallRequest, PushOutboundMessage};

use super::{PushChannel, TransportError, TransportResult};

const OUTBOUND_CAPACITY: usize = 32;
const ACK_CAPACITY: usize = 64;
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(1_000);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Push channel backed by a WebSocket client that reconnects on its own.
pub struct WebSocketPushChannel {
    outbound: mpsc::Sender<String>,
    acks: broadcast::Sender<PushAck>,
    connected: watch::Receiver<bool>,
}

impl WebSocketPushChannel {
    /// Start the connection task for `url`; it runs until `cancel` fires.
    pub fn spawn(url: String, cancel: CancellationToken) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (acks, _) = broadcast::channel(ACK_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(false);

        tokio::spawn(run_connection(
            url,
            outbound_rx,
            acks.clone(),
            connected_tx,
            cancel,
        ));

        Arc::new(Self {
            outbound: outbound_tx,
            acks,
            connected: connected_rx,
        })
    }
}

impl PushChannel for WebSocketPushChannel {
    fn connection(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<PushAck> {
        self.acks.subscribe()
    }

    fn send_call(&self, request: PushCallRequest) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let frame = serde_json::to_string(&PushOutboundMessage::Call(request))
            .map_err(|source| TransportError::Encode { source })?;
        self.outbound
            .try_send(frame)
            .map_err(|_| TransportError::ChannelClosed)
    }
}

/// Why a connected socket stopped being pumped.
enum PumpExit {
    /// Shutdown requested or the channel handle was dropped.
    Shutdown,
    /// The remote closed the socket or it failed.
    Disconnected(String),
}

/// Keep a socket open to `url`, reconnecting with exponential backoff.
async fn run_connection(
    url: String,
    mut outbound: mpsc::Receiver<String>,
    acks: broadcast::Sender<PushAck>,
    connected: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    let mut delay = INITIAL_RECONNECT_DELAY;

    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = connect_async(url.as_str()) => attempt,
        };

        match attempt {
            Ok((socket, _response)) => {
                info!(%url, "push channel connected");
                delay = INITIAL_RECONNECT_DELAY;

                // Frames queued while disconnected belong to attempts that already failed.
                while outbound.try_recv().is_ok() {}
                connected.send_replace(true);

                let exit = pump(socket, &mut outbound, &acks, &cancel).await;
                connected.send_replace(false);

                match exit {
                    PumpExit::Shutdown => break,
                    PumpExit::Disconnected(reason) => {
                        warn!(%url, %reason, "push channel disconnected");
                    }
                }
            }
            Err(err) => {
                warn!(%url, error = %err, delay_ms = delay.as_millis() as u64, "push channel connection failed");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
    }

    connected.send_replace(false);
    info!(%url, "push channel stopped");
}

/// Move frames both ways until the socket closes or shutdown is requested.
async fn pump(
    socket: Socket,
    outbound: &mut mpsc::Receiver<String>,
    acks: &broadcast::Sender<PushAck>,
    cancel: &CancellationToken,
) -> PumpExit {
    let (mut sink, mut source) = socket.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return PumpExit::Shutdown;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.close().await;
                    return PumpExit::Shutdown;
                };
                if let Err(err) = sink.send(Message::text(frame)).await {
                    return PumpExit::Disconnected(err.to_string());
                }
            }
            inbound = source.next() => match inbound {
                Some(Ok(Message::Text(text))) => dispatch_ack(text.as_str(), acks),
                Some(Ok(Message::Ping(_))) => {
                    // tungstenite queues the pong itself; flush it out.
                    if let Err(err) = sink.flush().await {
                        return PumpExit::Disconnected(err.to_string());
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .unwrap_or_else(|| "closed by peer".into());
                    return PumpExit::Disconnected(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return PumpExit::Disconnected(err.to_string()),
                None => return PumpExit::Disconnected("stream ended".into()),
            }
        }
    }
}

fn dispatch_ack(raw: &str, acks: &broadcast::Sender<PushAck>) {
    match PushAck::from_json_str(raw) {
        Ok(ack) => {
            debug!(game_id = %ack.game_id, "push acknowledgement received");
            let _ = acks.send(ack);
        }
        Err(err) => warn!(error = %err, "ignoring malformed push frame"),
    }
}
