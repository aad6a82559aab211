use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Response};

use crate::dto::{
    fallback::{FallbackCallRequest, FallbackCallResponse, FallbackErrorBody},
    push::TOO_EARLY_CODE,
};

use super::{FallbackChannel, TransportError, TransportResult};

const CALLS_PATH: &str = "calls";
const HEALTH_PATH: &str = "health";

/// Fallback channel speaking JSON over HTTP.
#[derive(Clone)]
pub struct HttpFallbackChannel {
    client: Client,
    base_url: Arc<str>,
}

impl HttpFallbackChannel {
    /// Build a client for `base_url` whose requests give up after `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| TransportError::ClientBuilder { source })?;

        Ok(Self {
            client,
            base_url: Arc::<str>::from(base_url.trim_end_matches('/')),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post_call(&self, request: FallbackCallRequest) -> TransportResult<FallbackCallResponse> {
        let response = self
            .client
            .post(self.url(CALLS_PATH))
            .json(&request)
            .send()
            .await
            .map_err(|source| TransportError::RequestSend {
                path: CALLS_PATH.to_string(),
                source,
            })?;

        if response.status().is_success() {
            return response
                .json::<FallbackCallResponse>()
                .await
                .map_err(|source| TransportError::DecodeResponse {
                    path: CALLS_PATH.to_string(),
                    source,
                });
        }

        Err(rejection(CALLS_PATH, response).await)
    }

    async fn get_health(&self) -> TransportResult<()> {
        let response = self
            .client
            .get(self.url(HEALTH_PATH))
            .send()
            .await
            .map_err(|source| TransportError::RequestSend {
                path: HEALTH_PATH.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::RequestStatus {
                path: HEALTH_PATH.to_string(),
                status: response.status(),
            })
        }
    }
}

/// Interpret a non-success response, preferring the machine-readable error body.
async fn rejection(path: &str, response: Response) -> TransportError {
    let status = response.status();
    match response.json::<FallbackErrorBody>().await {
        Ok(FallbackErrorBody {
            code,
            next_allowed_at: Some(next_allowed_at),
        }) if code == TOO_EARLY_CODE => TransportError::TooEarly { next_allowed_at },
        Ok(body) => TransportError::Rejected { code: body.code },
        Err(_) => TransportError::RequestStatus {
            path: path.to_string(),
            status,
        },
    }
}

impl FallbackChannel for HttpFallbackChannel {
    fn request_call(
        &self,
        request: FallbackCallRequest,
    ) -> BoxFuture<'static, TransportResult<FallbackCallResponse>> {
        let channel = self.clone();
        Box::pin(async move { channel.post_call(request).await })
    }

    fn health_check(&self) -> BoxFuture<'static, TransportResult<()>> {
        let channel = self.clone();
        Box::pin(async move { channel.get_health().await })
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        Json, Router,
        http::StatusCode,
        routing::{get, post},
    };
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn request() -> FallbackCallRequest {
        FallbackCallRequest {
            game_id: "hall-1".into(),
            desired_number: None,
            min_interval_ms: 4_000,
            play_at_epoch: 1_700_000_004_000,
        }
    }

    #[tokio::test]
    async fn successful_call_decodes_number() {
        let router = Router::new().route(
            "/calls",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["gameId"], "hall-1");
                assert_eq!(body["playAtEpoch"], 1_700_000_004_000_i64);
                Json(json!({ "calledNumber": 42, "game": "hall-1" }))
            }),
        );
        let channel =
            HttpFallbackChannel::new(&serve(router).await, Duration::from_secs(2)).unwrap();

        let response = channel.request_call(request()).await.unwrap();
        assert_eq!(
            response,
            FallbackCallResponse {
                called_number: 42,
                game: "hall-1".into(),
            }
        );
    }

    #[tokio::test]
    async fn too_early_body_maps_to_too_early() {
        let router = Router::new().route(
            "/calls",
            post(|| async {
                (
                    StatusCode::CONFLICT,
                    Json(json!({ "code": "TOO_EARLY", "nextAllowedAt": 1_700_000_005_500_i64 })),
                )
            }),
        );
        let channel =
            HttpFallbackChannel::new(&serve(router).await, Duration::from_secs(2)).unwrap();

        let err = channel.request_call(request()).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::TooEarly {
                next_allowed_at: 1_700_000_005_500
            }
        ));
    }

    #[tokio::test]
    async fn other_failures_keep_their_code_or_status() {
        let router = Router::new()
            .route(
                "/calls",
                post(|| async {
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        Json(json!({ "code": "RATE_LIMITED" })),
                    )
                }),
            )
            .route("/health", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let channel =
            HttpFallbackChannel::new(&serve(router).await, Duration::from_secs(2)).unwrap();

        let err = channel.request_call(request()).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { ref code } if code == "RATE_LIMITED"));

        let err = channel.health_check().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::RequestStatus {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                ..
            }
        ));
    }
}
