//! The process-wide event bus.
//!
//! Every session-observable state change is published here and fanned out
//! to subscribers (SSE connections, in-process listeners, child-session
//! plumbing). Delivery is at-most-once per subscriber with per-subscriber
//! ordering; a subscriber that falls behind drops the oldest events
//! (terminal state is always recoverable from storage, so no replay is
//! attempted).

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use sy_domain::ident::Id;
use sy_domain::message::{Message, Part, Session};
use sy_domain::permission::Permission;

use crate::todo::Todo;

/// Wire shape: `{"type": "...", "properties": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "properties")]
pub enum BusEvent {
    #[serde(rename = "session.updated")]
    SessionUpdated { session: Session },

    #[serde(rename = "session.completed")]
    SessionCompleted { session_id: Id },

    #[serde(rename = "session.aborted")]
    SessionAborted { session_id: Id },

    #[serde(rename = "session.agent_switch")]
    SessionAgentSwitch { session_id: Id, agent: String },

    #[serde(rename = "session.error")]
    SessionError { session_id: Id, error: String },

    #[serde(rename = "session.compacted")]
    SessionCompacted { session_id: Id },

    #[serde(rename = "session.compacting.progress")]
    CompactingProgress {
        session_id: Id,
        step: String,
        #[serde(skip_serializing_if = "Value::is_null")]
        data: Value,
    },

    #[serde(rename = "message.updated")]
    MessageUpdated { message: Message },

    #[serde(rename = "message.part.updated")]
    MessagePartUpdated {
        part: Part,
        /// Advisory streamed-text delta; receivers may recompute from
        /// `part.text`.
        #[serde(skip_serializing_if = "Option::is_none")]
        delta: Option<String>,
    },

    #[serde(rename = "permission.updated")]
    PermissionUpdated { permission: Permission },

    #[serde(rename = "permission.replied")]
    PermissionReplied {
        session_id: Id,
        permission_id: Id,
        response: String,
    },

    #[serde(rename = "todo.updated")]
    TodoUpdated { session_id: Id, todos: Vec<Todo> },

    #[serde(rename = "command.executed")]
    CommandExecuted { session_id: Id, command: String },

    #[serde(rename = "bash.executed")]
    BashExecuted {
        session_id: Id,
        command: String,
        exit_code: Option<i32>,
    },
}

impl BusEvent {
    /// The session an event belongs to, for per-session SSE filters.
    pub fn session_id(&self) -> Option<&Id> {
        match self {
            BusEvent::SessionUpdated { session } => Some(&session.id),
            BusEvent::SessionCompleted { session_id }
            | BusEvent::SessionAborted { session_id }
            | BusEvent::SessionAgentSwitch { session_id, .. }
            | BusEvent::SessionError { session_id, .. }
            | BusEvent::SessionCompacted { session_id }
            | BusEvent::CompactingProgress { session_id, .. }
            | BusEvent::PermissionReplied { session_id, .. }
            | BusEvent::TodoUpdated { session_id, .. }
            | BusEvent::CommandExecuted { session_id, .. }
            | BusEvent::BashExecuted { session_id, .. } => Some(session_id),
            BusEvent::MessageUpdated { message } => Some(message.session_id()),
            BusEvent::MessagePartUpdated { part, .. } => Some(&part.session_id),
            BusEvent::PermissionUpdated { permission } => Some(&permission.session_id),
        }
    }

    /// The `type` discriminant as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            BusEvent::SessionUpdated { .. } => "session.updated",
            BusEvent::SessionCompleted { .. } => "session.completed",
            BusEvent::SessionAborted { .. } => "session.aborted",
            BusEvent::SessionAgentSwitch { .. } => "session.agent_switch",
            BusEvent::SessionError { .. } => "session.error",
            BusEvent::SessionCompacted { .. } => "session.compacted",
            BusEvent::CompactingProgress { .. } => "session.compacting.progress",
            BusEvent::MessageUpdated { .. } => "message.updated",
            BusEvent::MessagePartUpdated { .. } => "message.part.updated",
            BusEvent::PermissionUpdated { .. } => "permission.updated",
            BusEvent::PermissionReplied { .. } => "permission.replied",
            BusEvent::TodoUpdated { .. } => "todo.updated",
            BusEvent::CommandExecuted { .. } => "command.executed",
            BusEvent::BashExecuted { .. } => "bash.executed",
        }
    }
}

/// Capacity of the broadcast ring. Slow subscribers past this many
/// undelivered events start losing the oldest ones.
const BUS_CAPACITY: usize = 1024;

pub struct Bus {
    tx: broadcast::Sender<BusEvent>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Non-blocking publish. No subscribers is not an error.
    pub fn publish(&self, event: BusEvent) {
        tracing::trace!(kind = event.kind(), "bus publish");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
