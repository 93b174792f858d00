//! Route table and middleware stack.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

use super::{events, permissions, sessions};

pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/event", get(events::subscribe))
        .route("/session", post(sessions::create).get(sessions::list))
        .route(
            "/session/:id",
            get(sessions::get).delete(sessions::remove),
        )
        .route("/session/:id/prompt", post(sessions::prompt))
        .route("/session/:id/abort", post(sessions::abort))
        .route("/session/:id/agent", post(sessions::switch_agent))
        .route("/session/:id/revert", post(sessions::revert))
        .route("/session/:id/compact", post(sessions::compact_session))
        .route("/session/:id/messages", get(sessions::messages))
        .route("/session/:id/todo", get(sessions::todos))
        .route("/session/:id/permissions", get(permissions::pending))
        .route("/permission/respond", post(permissions::respond))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
