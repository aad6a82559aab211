use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification of the bingo caller.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::calls_stream,
        crate::routes::session::start_session,
        crate::routes::session::stop_session,
        crate::routes::session::update_interval,
        crate::routes::session::external_call,
        crate::routes::session::get_session,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::StartSessionRequest,
            crate::dto::session::UpdateIntervalRequest,
            crate::dto::session::ExternalCallRequest,
            crate::dto::session::SessionDiagnostics,
            crate::dto::sse::Handshake,
            crate::dto::sse::CallPlayedEvent,
            crate::dto::sse::SchedulerStatusEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "session", description = "Call session control and diagnostics"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
