//! Permission API endpoints.
//!
//! - `POST /permission/respond`        — answer a pending permission
//! - `GET  /session/:id/permissions`   — list pending for a session

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use sy_domain::ident::Id;
use sy_domain::permission::PermissionResponse;

use crate::state::AppState;

use super::error_response;

#[derive(Debug, Deserialize)]
pub struct RespondBody {
    pub session_id: Id,
    pub permission_id: Id,
    /// `"once" | "always" | "reject"` or the object forms
    /// (`{type:"reject",message}`, `{type:"once",answers}`,
    /// `{type:"pin",pin}`).
    pub response: PermissionResponse,
}

pub async fn respond(
    State(state): State<AppState>,
    Json(body): Json<RespondBody>,
) -> impl IntoResponse {
    match state
        .permissions
        .respond(&body.session_id, &body.permission_id, &body.response)
    {
        Ok(responded) => Json(serde_json::json!({ "responded": responded })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn pending(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    Json(state.permissions.pending(&Id::from_string(id)))
}
