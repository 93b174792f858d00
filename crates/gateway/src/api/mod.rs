//! HTTP/SSE boundary.
//!
//! JSON in, JSON out; every event-shaped thing the core does is also
//! observable on the `/event` SSE stream, so callers `prompt` and then
//! watch the bus rather than polling.

pub mod events;
pub mod permissions;
pub mod router;
pub mod sessions;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use sy_domain::error::Error;

/// Map a domain error onto the wire.
pub(crate) fn error_response(error: Error) -> Response {
    let status = match &error {
        Error::SessionNotFound(_)
        | Error::AgentNotFound(_)
        | Error::PermissionNotFound(_)
        | Error::ToolNotFound(_) => StatusCode::NOT_FOUND,
        Error::SessionLocked(_) => StatusCode::CONFLICT,
        Error::Validation(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}
