use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
};
use axum_valid::Valid;

use crate::{
    dto::session::{
        ExternalCallRequest, SessionDiagnostics, StartSessionRequest, UpdateIntervalRequest,
    },
    error::AppError,
    state::SharedState,
};

/// Routes steering the call session.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/session", get(get_session))
        .route("/session/start", post(start_session))
        .route("/session/stop", post(stop_session))
        .route("/session/interval", put(update_interval))
        .route("/session/external-call", post(external_call))
}

/// Start calling a game, superseding any running session.
#[utoipa::path(
    post,
    path = "/session/start",
    tag = "session",
    request_body = StartSessionRequest,
    responses(
        (status = 200, description = "Session started", body = SessionDiagnostics),
        (status = 400, description = "Invalid game id or interval")
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<StartSessionRequest>>,
) -> Result<Json<SessionDiagnostics>, AppError> {
    let snapshot = state
        .controller()
        .start(payload.game_id, payload.interval_ms)
        .await?;
    Ok(Json(SessionDiagnostics::from_snapshot(
        &snapshot,
        state.is_online(),
    )))
}

/// Stop the running session. Stopping when nothing runs is not an error.
#[utoipa::path(
    post,
    path = "/session/stop",
    tag = "session",
    responses((status = 204, description = "Session stopped"))
)]
pub async fn stop_session(State(state): State<SharedState>) -> StatusCode {
    state.controller().stop().await;
    StatusCode::NO_CONTENT
}

/// Change the interval of the running session from its next call on.
#[utoipa::path(
    put,
    path = "/session/interval",
    tag = "session",
    request_body = UpdateIntervalRequest,
    responses(
        (status = 202, description = "Interval change queued"),
        (status = 400, description = "Interval out of range"),
        (status = 404, description = "No session is running"),
        (status = 503, description = "Session queue is full")
    )
)]
pub async fn update_interval(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<UpdateIntervalRequest>>,
) -> Result<StatusCode, AppError> {
    state.controller().set_interval(payload.interval_ms).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Record a call that was played outside this service.
#[utoipa::path(
    post,
    path = "/session/external-call",
    tag = "session",
    request_body = ExternalCallRequest,
    responses(
        (status = 202, description = "External call queued"),
        (status = 400, description = "Play instant too far from now"),
        (status = 404, description = "No session is running"),
        (status = 503, description = "Session queue is full")
    )
)]
pub async fn external_call(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ExternalCallRequest>>,
) -> Result<StatusCode, AppError> {
    state
        .controller()
        .acknowledge_external_call(payload.play_at_ms)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// Inspect the running session.
#[utoipa::path(
    get,
    path = "/session",
    tag = "session",
    responses(
        (status = 200, description = "Current session state", body = SessionDiagnostics),
        (status = 404, description = "No session is running")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
) -> Result<Json<SessionDiagnostics>, AppError> {
    let snapshot = state
        .controller()
        .diagnostics()
        .await
        .ok_or_else(|| AppError::NotFound("no call session is running".into()))?;
    Ok(Json(SessionDiagnostics::from_snapshot(
        &snapshot,
        state.is_online(),
    )))
}
