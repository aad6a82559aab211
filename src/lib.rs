//! Library crate for bingo-caller, exposing modules for binaries and tests.

/// Configuration loading.
pub mod config;
/// Wire and REST payloads.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// HTTP routes.
pub mod routes;
/// Scheduling, connectivity and SSE services.
pub mod services;
/// Shared application and session state.
pub mod state;
/// Channels to the call authority.
pub mod transport;
