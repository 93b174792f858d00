//! Session API endpoints.
//!
//! - `POST   /session`               — create
//! - `GET    /session`               — list
//! - `GET    /session/:id`           — get
//! - `DELETE /session/:id`           — remove (aborts + rejects pending)
//! - `POST   /session/:id/prompt`    — run a turn (events on `/event`)
//! - `POST   /session/:id/abort`     — cancel the running turn
//! - `POST   /session/:id/agent`     — switch agent (abortive or graceful)
//! - `POST   /session/:id/revert`    — drop history from a message onward
//! - `POST   /session/:id/compact`   — standalone compaction
//! - `GET    /session/:id/messages`  — message/part log
//! - `GET    /session/:id/todo`      — todo list

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use sy_domain::ident::Id;
use sy_domain::message::SessionSource;
use sy_sessions::store::CreateSession;

use crate::runtime::compact::{self, CompactRequest};
use crate::runtime::{agent, run_turn, InputPart, PromptInput};
use crate::state::AppState;

use super::error_response;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Create / list / get / remove
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize, Default)]
pub struct CreateBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub parent_id: Option<Id>,
    #[serde(default)]
    pub container_profile: Option<String>,
    #[serde(default)]
    pub source: Option<SessionSource>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateBody>,
) -> impl IntoResponse {
    let result = state.sessions.create(CreateSession {
        title: body.title,
        parent_id: body.parent_id,
        container_profile: body.container_profile,
        source: body.source.unwrap_or(SessionSource::Sdk),
    });
    match result {
        Ok(session) => Json(session).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn list(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sessions.list())
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.sessions.get(&Id::from_string(id)) {
        Ok(session) => Json(session).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = Id::from_string(id);
    state.locks.abort(&id);
    state.permissions.reject_session(&id);
    if let Err(e) = state.log.remove_session(&id) {
        return error_response(e);
    }
    match state.sessions.remove(&id) {
        Ok(()) => Json(serde_json::json!({ "removed": true })).into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PromptBody {
    pub parts: Vec<InputPart>,
    #[serde(default)]
    pub tools: Option<HashMap<String, bool>>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Run one turn and return the terminal assistant message. Progress
/// streams on `/event`; callers are expected to subscribe before
/// prompting.
pub async fn prompt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PromptBody>,
) -> impl IntoResponse {
    let input = PromptInput {
        session_id: Id::from_string(id),
        parts: body.parts,
        tools: body.tools,
        agent: body.agent,
        model: body.model,
    };
    match run_turn(state, input).await {
        Ok(message) => Json(message).into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Abort / switch / revert
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn abort(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let aborted = state.locks.abort(&Id::from_string(id));
    Json(serde_json::json!({ "aborted": aborted }))
}

#[derive(Debug, Deserialize)]
pub struct SwitchBody {
    pub agent: String,
    /// When true, the running turn finishes its current step first.
    #[serde(default)]
    pub graceful: bool,
}

pub async fn switch_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SwitchBody>,
) -> impl IntoResponse {
    let id = Id::from_string(id);
    if state.config.get().agent(&body.agent).is_none() {
        return error_response(sy_domain::error::Error::AgentNotFound(body.agent));
    }
    if body.graceful {
        state.locks.request_graceful_switch(&id, &body.agent);
    } else {
        state.locks.switch_agent(&id, &body.agent);
    }
    Json(serde_json::json!({ "agent": body.agent })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct RevertBody {
    pub message_id: Id,
}

/// Drop the log from `message_id` onward (the history/revert UI).
pub async fn revert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RevertBody>,
) -> impl IntoResponse {
    let id = Id::from_string(id);
    if let Err(e) = state.locks.assert_unlocked(&id) {
        return error_response(e);
    }
    if let Err(e) = state.log.truncate_from(&id, &body.message_id) {
        return error_response(e);
    }
    match state.sessions.update(&id, |_| {}) {
        Ok(session) => Json(session).into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compact
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Standalone compaction: takes the session lock itself, so it refuses
/// to run concurrently with a turn.
pub async fn compact_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = Id::from_string(id);
    let guard = match state.locks.acquire(&id) {
        Ok(guard) => guard,
        Err(e) => return error_response(e),
    };

    let config = state.config.get();
    let resolved = agent::resolve_agent(&config, &state.locks, &id, None)
        .and_then(|agent| agent::resolve_model(&config, &state.providers, &agent, None));
    let model = match resolved {
        Ok(model) => model,
        Err(e) => return error_response(e),
    };

    let result = compact::run(
        &state,
        CompactRequest {
            session_id: id.clone(),
            provider_id: model.model.provider_id.clone(),
            model_id: model.model.model_id.clone(),
        },
        guard.token(),
    )
    .await;
    match result {
        Ok(()) => Json(serde_json::json!({ "compacted": true })).into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    Json(state.log.messages(&Id::from_string(id)))
}

pub async fn todos(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    Json(state.todos.get(&Id::from_string(id)))
}
