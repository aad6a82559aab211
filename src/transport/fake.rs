//! In-memory channels used by the scheduler tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::{
    sync::{broadcast, mpsc, watch},
    time::sleep,
};

use crate::dto::{
    fallback::{FallbackCallRequest, FallbackCallResponse},
    push::{PushAck, PushAckBody, PushCallRequest, PushStatus},
};

use super::{FallbackChannel, PushChannel, TransportError, TransportResult};

/// Scripted reply of the fake push channel.
pub struct PushReply {
    pub after: Duration,
    pub body: PushAckBody,
}

impl PushReply {
    pub fn called(after_ms: u64, number: u8, game: &str, play_at_epoch: i64) -> Self {
        Self {
            after: Duration::from_millis(after_ms),
            body: PushAckBody::Called {
                number,
                game: game.to_string(),
                play_at_epoch,
            },
        }
    }

    pub fn too_early(after_ms: u64, next_allowed_at: i64) -> Self {
        Self {
            after: Duration::from_millis(after_ms),
            body: PushAckBody::Status {
                status: PushStatus::TooEarly,
                next_allowed_at: Some(next_allowed_at),
            },
        }
    }

    pub fn error(after_ms: u64) -> Self {
        Self {
            after: Duration::from_millis(after_ms),
            body: PushAckBody::Status {
                status: PushStatus::Error,
                next_allowed_at: None,
            },
        }
    }
}

/// Push channel that records requests and answers from a script.
///
/// Requests without a scripted reply stay unanswered.
pub struct FakePushChannel {
    connected: watch::Sender<bool>,
    acks: broadcast::Sender<PushAck>,
    script: Mutex<VecDeque<PushReply>>,
    sent_tx: mpsc::UnboundedSender<PushCallRequest>,
    sent_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PushCallRequest>>,
}

impl FakePushChannel {
    pub fn new(connected: bool) -> Arc<Self> {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            connected: watch::channel(connected).0,
            acks: broadcast::channel(64).0,
            script: Mutex::new(VecDeque::new()),
            sent_tx,
            sent_rx: tokio::sync::Mutex::new(sent_rx),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    pub fn script(&self, reply: PushReply) {
        self.script.lock().unwrap().push_back(reply);
    }

    /// Broadcast an acknowledgement as if the authority had pushed it.
    pub fn push_ack(&self, game_id: &str, body: PushAckBody) {
        let _ = self.acks.send(PushAck {
            game_id: game_id.to_string(),
            body,
        });
    }

    /// Wait for the next request the channel accepted.
    pub async fn next_sent(&self) -> PushCallRequest {
        self.sent_rx.lock().await.recv().await.unwrap()
    }

    /// Next accepted request, if one is already queued.
    pub async fn try_next_sent(&self) -> Option<PushCallRequest> {
        self.sent_rx.lock().await.try_recv().ok()
    }
}

impl PushChannel for FakePushChannel {
    fn connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    fn subscribe(&self) -> broadcast::Receiver<PushAck> {
        self.acks.subscribe()
    }

    fn send_call(&self, request: PushCallRequest) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        if let Some(reply) = self.script.lock().unwrap().pop_front() {
            let acks = self.acks.clone();
            let game_id = request.game_id.clone();
            tokio::spawn(async move {
                sleep(reply.after).await;
                let _ = acks.send(PushAck {
                    game_id,
                    body: reply.body,
                });
            });
        }

        let _ = self.sent_tx.send(request);
        Ok(())
    }
}

/// Scripted reply of the fake fallback channel.
pub struct FallbackReply {
    pub after: Duration,
    pub result: TransportResult<FallbackCallResponse>,
}

impl FallbackReply {
    pub fn called(after_ms: u64, number: u8, game: &str) -> Self {
        Self {
            after: Duration::from_millis(after_ms),
            result: Ok(FallbackCallResponse {
                called_number: number,
                game: game.to_string(),
            }),
        }
    }

    pub fn failing(after_ms: u64, error: TransportError) -> Self {
        Self {
            after: Duration::from_millis(after_ms),
            result: Err(error),
        }
    }
}

/// Fallback channel answering from a script; unscripted requests never complete.
pub struct FakeFallbackChannel {
    healthy: AtomicBool,
    script: Mutex<VecDeque<FallbackReply>>,
    sent: Mutex<Vec<FallbackCallRequest>>,
}

impl FakeFallbackChannel {
    pub fn new(healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(healthy),
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn script(&self, reply: FallbackReply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn sent(&self) -> Vec<FallbackCallRequest> {
        self.sent.lock().unwrap().clone()
    }
}

impl FallbackChannel for FakeFallbackChannel {
    fn request_call(
        &self,
        request: FallbackCallRequest,
    ) -> BoxFuture<'static, TransportResult<FallbackCallResponse>> {
        self.sent.lock().unwrap().push(request);
        let reply = self.script.lock().unwrap().pop_front();
        Box::pin(async move {
            match reply {
                Some(reply) => {
                    sleep(reply.after).await;
                    reply.result
                }
                None => futures::future::pending().await,
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'static, TransportResult<()>> {
        let healthy = self.healthy.load(Ordering::SeqCst);
        Box::pin(async move {
            if healthy {
                Ok(())
            } else {
                Err(TransportError::Rejected {
                    code: "UNHEALTHY".into(),
                })
            }
        })
    }
}
