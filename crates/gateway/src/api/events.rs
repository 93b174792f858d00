//! Event stream endpoint.
//!
//! - `GET /event`               — SSE of every bus envelope
//! - `GET /event?session=<id>`  — filtered to one session
//!
//! Delivery is at-most-once: a subscriber that lags past the broadcast
//! ring simply misses events and is expected to re-read current state.
//! Disconnects drop the subscriber silently.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_core::Stream;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use sy_domain::ident::Id;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub session: Option<String>,
}

pub async fn subscribe(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let mut rx = state.bus.subscribe();
    let filter = query.session.map(Id::from_string);

    let stream: std::pin::Pin<
        Box<dyn Stream<Item = Result<Event, std::convert::Infallible>> + Send>,
    > = Box::pin(async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(filter) = &filter {
                        if event.session_id() != Some(filter) {
                            continue;
                        }
                    }
                    match serde_json::to_string(&event) {
                        Ok(json) => yield Ok(Event::default().data(json)),
                        Err(e) => {
                            tracing::warn!(error = %e, "event serialization failed");
                        }
                    }
                }
                // Lagged subscribers skip ahead; terminal state remains
                // readable from session/message storage.
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "sse subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
