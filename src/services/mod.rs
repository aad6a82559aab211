/// Cadence scheduling loop of a call session.
pub mod cadence_scheduler;
/// Single-flight dispatch and perceptible effect of confirmed calls.
pub mod confirmation_gate;
/// Reachability supervision of the call authority.
pub mod connectivity;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Sleep with a fine-grained final approach to the deadline.
pub mod precise_sleep;
/// Start, stop and steering of the call session.
pub mod session_controller;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Transport selection and outcome mapping.
pub mod transport_arbiter;

#[cfg(test)]
pub(crate) mod test_support;
