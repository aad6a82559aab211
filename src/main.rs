//! Bingo caller binary entrypoint wiring the authority channels, the call session and the REST/SSE layers.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::{net::TcpListener, sync::watch};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bingo_caller::{
    config::AppConfig,
    routes,
    services::{
        connectivity, session_controller::SessionController, sse_events,
        transport_arbiter::TransportArbiter,
    },
    state::{AppState, SharedState, clock::EpochClock},
    transport::{
        FallbackChannel, PushChannel, http::HttpFallbackChannel,
        websocket::WebSocketPushChannel,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let shutdown = CancellationToken::new();
    let clock = EpochClock::new();

    let push: Arc<dyn PushChannel> =
        WebSocketPushChannel::spawn(config.authority.push_url.clone(), shutdown.child_token());
    let fallback: Arc<dyn FallbackChannel> = Arc::new(
        HttpFallbackChannel::new(
            &config.authority.fallback_url,
            config.authority.fallback_timeout,
        )
        .context("building fallback client")?,
    );

    let (online_tx, online_rx) = watch::channel(false);
    tokio::spawn(connectivity::run(
        push.clone(),
        fallback.clone(),
        online_tx,
        config.connectivity.clone(),
        shutdown.child_token(),
    ));

    let arbiter = Arc::new(TransportArbiter::new(
        push,
        fallback,
        clock,
        config.authority.fallback_timeout,
        &config.scheduler,
    ));
    let controller = SessionController::new(arbiter, clock, config.scheduler.clone(), online_rx);
    let app_state = AppState::new(controller);

    tokio::spawn(sse_events::forward_scheduler_events(
        app_state.clone(),
        shutdown.child_token(),
    ));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, push_url = %config.authority.push_url, fallback_url = %config.authority.fallback_url, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    stop_background_work(&app_state, &shutdown).await;
    Ok(())
}

/// Stop the running session before tearing down the authority channels.
async fn stop_background_work(state: &SharedState, shutdown: &CancellationToken) {
    if state.controller().stop().await {
        info!("call session stopped on shutdown");
    }
    shutdown.cancel();
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "cannot install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
