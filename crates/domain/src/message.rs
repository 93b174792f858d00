//! The session / message / part model.
//!
//! A session owns an ordered log of messages; each message owns an ordered
//! log of parts. Parts are the unit of streamed content: text grows by
//! deltas until its end time is set, tool parts walk a small state machine,
//! and step markers bracket each provider round-trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ident::Id;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a session was started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    #[default]
    Tui,
    Sdk,
    Background,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTime {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Set while a compaction run is in flight; cleared on every exit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compacting: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Id,
    pub title: String,
    /// Present on child sessions spawned by the `task` tool. The child
    /// reads approvals through the parent and forwards pending
    /// permissions upward.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_profile: Option<String>,
    #[serde(default)]
    pub source: SessionSource,
    pub time: SessionTime,
}

impl Session {
    pub fn new(title: impl Into<String>, source: SessionSource) -> Self {
        let now = Utc::now();
        Self {
            id: Id::session(),
            title: title.into(),
            parent_id: None,
            container_profile: None,
            source,
            time: SessionTime {
                created: now,
                updated: now,
                compacting: None,
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token accounting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CacheUsage {
    pub read: u64,
    pub write: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
    pub cache: CacheUsage,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.reasoning += other.reasoning;
        self.cache.read += other.cache.read;
        self.cache.write += other.cache.write;
    }

    /// The quantity the overflow predicate compares against the usable
    /// context window.
    pub fn context_weight(&self) -> u64 {
        self.input + self.cache.read + self.output
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTime {
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

/// Terminal error embedded in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum MessageError {
    Aborted {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Provider {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        id: Id,
        session_id: Id,
        time: MessageTime,
    },
    Assistant {
        id: Id,
        session_id: Id,
        /// The user message that triggered this turn.
        parent_id: Id,
        provider_id: String,
        model_id: String,
        #[serde(default)]
        tokens: TokenUsage,
        #[serde(default)]
        cost: f64,
        /// Marks a compaction summary message; acts as the history anchor.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        summary: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<MessageError>,
        time: MessageTime,
    },
}

impl Message {
    pub fn user(session_id: Id) -> Self {
        Message::User {
            id: Id::message(),
            session_id,
            time: MessageTime {
                created: Utc::now(),
                completed: None,
            },
        }
    }

    pub fn assistant(
        session_id: Id,
        parent_id: Id,
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Message::Assistant {
            id: Id::message(),
            session_id,
            parent_id,
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            tokens: TokenUsage::default(),
            cost: 0.0,
            summary: false,
            error: None,
            time: MessageTime {
                created: Utc::now(),
                completed: None,
            },
        }
    }

    pub fn id(&self) -> &Id {
        match self {
            Message::User { id, .. } | Message::Assistant { id, .. } => id,
        }
    }

    pub fn session_id(&self) -> &Id {
        match self {
            Message::User { session_id, .. } | Message::Assistant { session_id, .. } => session_id,
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self, Message::Assistant { summary: true, .. })
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Message::Assistant { .. })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TextTime {
    pub start: DateTime<Utc>,
    /// Set when the provider closes the text block; text is append-only
    /// until then.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Tool invocation lifecycle. A completed tool part is final except for
/// the `compacted` timestamp set by pruning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolState {
    Pending,
    Running {
        input: Value,
    },
    Completed {
        input: Value,
        output: String,
        title: String,
        time: TimeRange,
        #[serde(default)]
        metadata: Value,
        /// When set, the output body is excluded from provider assemblies.
        #[serde(skip_serializing_if = "Option::is_none")]
        compacted: Option<DateTime<Utc>>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartBody {
    Text {
        text: String,
        time: TextTime,
        /// Injected content (e.g. the compaction resume context);
        /// excluded from title derivation and history filters.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        synthetic: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    Tool {
        call_id: String,
        tool: String,
        state: ToolState,
    },
    File {
        mime: String,
        url: String,
    },
    StepStart {
        #[serde(skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },
    StepFinish {
        tokens: TokenUsage,
        cost: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },
    Retry {
        attempt: u32,
        error: String,
    },
    Patch {
        files: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub id: Id,
    pub session_id: Id,
    pub message_id: Id,
    #[serde(flatten)]
    pub body: PartBody,
}

impl Part {
    pub fn new(session_id: Id, message_id: Id, body: PartBody) -> Self {
        Self {
            id: Id::part(),
            session_id,
            message_id,
            body,
        }
    }

    pub fn text(session_id: Id, message_id: Id, text: impl Into<String>) -> Self {
        Self::new(
            session_id,
            message_id,
            PartBody::Text {
                text: text.into(),
                time: TextTime {
                    start: Utc::now(),
                    end: None,
                },
                synthetic: false,
                metadata: None,
            },
        )
    }

    pub fn synthetic_text(session_id: Id, message_id: Id, text: impl Into<String>) -> Self {
        let mut part = Self::text(session_id, message_id, text);
        if let PartBody::Text { synthetic, .. } = &mut part.body {
            *synthetic = true;
        }
        part
    }

    pub fn tool(
        session_id: Id,
        message_id: Id,
        call_id: impl Into<String>,
        tool: impl Into<String>,
    ) -> Self {
        Self::new(
            session_id,
            message_id,
            PartBody::Tool {
                call_id: call_id.into(),
                tool: tool.into(),
                state: ToolState::Pending,
            },
        )
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            PartBody::Text { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// A message together with its ordered parts — the unit yielded by the
/// log's `messages`/`stream` reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageWithParts {
    #[serde(flatten)]
    pub message: Message,
    pub parts: Vec<Part>,
}
