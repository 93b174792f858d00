//! Provider-agnostic streaming events.
//!
//! Every provider adapter converts its wire format into this event set;
//! the turn runner consumes them without knowing which provider is on the
//! other end.

use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::message::TokenUsage;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// Incremental assistant text.
    TextDelta { text: String },

    /// The current text block is complete.
    TextEnd,

    /// The model opened a tool call; arguments follow as deltas.
    ToolInputStart { call_id: String, tool: String },

    /// Incremental tool-call argument JSON.
    ToolInputDelta { call_id: String, delta: String },

    /// A tool call is complete with parsed arguments.
    ToolCall {
        call_id: String,
        tool: String,
        input: serde_json::Value,
    },

    /// One provider step finished; carries the step's token usage.
    StepFinish {
        tokens: TokenUsage,
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
}

impl StreamEvent {
    pub fn is_step_finish(&self) -> bool {
        matches!(self, StreamEvent::StepFinish { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_kebab_case() {
        let event = StreamEvent::TextDelta { text: "hi".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "text-delta");

        let event = StreamEvent::StepFinish {
            tokens: TokenUsage::default(),
            finish_reason: Some("stop".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step-finish");
    }
}
