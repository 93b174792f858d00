//! Core runtime — the orchestrator that ties the session lock, prompt
//! assembly, provider streaming, permission-gated tool dispatch, and
//! compaction into one cooperative loop per session.
//!
//! Entry point: [`turn::run_turn`].

pub mod agent;
pub mod compact;
pub mod lock;
pub mod permission;
pub mod prune;
pub mod retry;
pub mod tools;
pub mod turn;

pub use turn::{run_turn, InputPart, PromptInput};

use sy_domain::message::{MessageWithParts, Part, PartBody, ToolState};
use sy_providers::{ProviderMessage, ProviderToolCall};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Placeholder body for tool outputs excluded by pruning.
const PRUNED_OUTPUT: &str = "[tool output pruned to save context]";

/// Flatten the message/part log into the provider conversation.
///
/// History before the most recent `summary:true` anchor is dropped — the
/// anchor's text (the summary) and the synthetic resume message that
/// follows it stand in for everything older. Tool outputs marked
/// `compacted` are replaced by a placeholder.
pub fn assemble_provider_messages(messages: &[MessageWithParts]) -> Vec<ProviderMessage> {
    let start = messages
        .iter()
        .rposition(|m| m.message.is_summary())
        .unwrap_or(0);

    let mut out = Vec::new();
    for entry in &messages[start..] {
        if entry.message.is_assistant() {
            assemble_assistant(entry, &mut out);
        } else {
            let text = joined_text(&entry.parts);
            if !text.is_empty() {
                out.push(ProviderMessage::User { content: text });
            }
        }
    }
    out
}

fn assemble_assistant(entry: &MessageWithParts, out: &mut Vec<ProviderMessage>) {
    let content = joined_text(&entry.parts);
    let mut tool_calls = Vec::new();
    let mut results = Vec::new();

    for part in &entry.parts {
        if let PartBody::Tool {
            call_id,
            tool,
            state,
        } = &part.body
        {
            match state {
                ToolState::Completed {
                    input,
                    output,
                    compacted,
                    ..
                } => {
                    tool_calls.push(ProviderToolCall {
                        call_id: call_id.clone(),
                        tool: tool.clone(),
                        input: input.clone(),
                    });
                    results.push(ProviderMessage::Tool {
                        call_id: call_id.clone(),
                        content: if compacted.is_some() {
                            PRUNED_OUTPUT.to_string()
                        } else {
                            output.clone()
                        },
                    });
                }
                ToolState::Error { message } => {
                    tool_calls.push(ProviderToolCall {
                        call_id: call_id.clone(),
                        tool: tool.clone(),
                        input: serde_json::Value::Object(Default::default()),
                    });
                    results.push(ProviderMessage::Tool {
                        call_id: call_id.clone(),
                        content: format!("Error: {message}"),
                    });
                }
                // A part still pending/running never reaches assembly in
                // a healthy log; skip rather than fabricate a result.
                ToolState::Pending | ToolState::Running { .. } => {}
            }
        }
    }

    if content.is_empty() && tool_calls.is_empty() {
        return;
    }
    out.push(ProviderMessage::Assistant {
        content,
        tool_calls,
    });
    out.extend(results);
}

fn joined_text(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(Part::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rough token estimate used by pruning and compaction bookkeeping.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Truncate for previews and log fields.
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &s[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sy_domain::ident::Id;
    use sy_domain::message::{Message, TimeRange};

    fn tool_part(
        session: &Id,
        message: &Id,
        call_id: &str,
        output: &str,
        compacted: bool,
    ) -> Part {
        let mut part = Part::tool(session.clone(), message.clone(), call_id, "bash");
        if let PartBody::Tool { state, .. } = &mut part.body {
            *state = ToolState::Completed {
                input: serde_json::json!({ "command": "x" }),
                output: output.to_string(),
                title: "x".into(),
                time: TimeRange {
                    start: Utc::now(),
                    end: Utc::now(),
                },
                metadata: serde_json::Value::Null,
                compacted: compacted.then(Utc::now),
            };
        }
        part
    }

    fn with_parts(message: Message, parts: Vec<Part>) -> MessageWithParts {
        MessageWithParts { message, parts }
    }

    #[test]
    fn assembly_starts_at_last_summary_anchor() {
        let session = Id::session();

        let old_user = Message::user(session.clone());
        let old_user_parts = vec![Part::text(session.clone(), old_user.id().clone(), "old")];

        let mut anchor = Message::assistant(session.clone(), old_user.id().clone(), "p", "m");
        if let Message::Assistant { summary, .. } = &mut anchor {
            *summary = true;
        }
        let anchor_parts = vec![Part::text(
            session.clone(),
            anchor.id().clone(),
            "summary of everything",
        )];

        let resume = Message::user(session.clone());
        let resume_parts = vec![Part::synthetic_text(
            session.clone(),
            resume.id().clone(),
            "resume context",
        )];

        let assembled = assemble_provider_messages(&[
            with_parts(old_user, old_user_parts),
            with_parts(anchor, anchor_parts),
            with_parts(resume, resume_parts),
        ]);

        assert_eq!(assembled.len(), 2);
        assert!(matches!(
            &assembled[0],
            ProviderMessage::Assistant { content, .. } if content == "summary of everything"
        ));
        assert!(matches!(
            &assembled[1],
            ProviderMessage::User { content } if content == "resume context"
        ));
    }

    #[test]
    fn compacted_outputs_are_elided() {
        let session = Id::session();
        let user = Message::user(session.clone());
        let user_parts = vec![Part::text(session.clone(), user.id().clone(), "go")];
        let assistant = Message::assistant(session.clone(), user.id().clone(), "p", "m");
        let aid = assistant.id().clone();
        let parts = vec![
            tool_part(&session, &aid, "c1", "huge output", true),
            tool_part(&session, &aid, "c2", "fresh output", false),
        ];

        let assembled = assemble_provider_messages(&[
            with_parts(user, user_parts),
            with_parts(assistant, parts),
        ]);

        let tool_contents: Vec<&str> = assembled
            .iter()
            .filter_map(|m| match m {
                ProviderMessage::Tool { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tool_contents, vec![PRUNED_OUTPUT, "fresh output"]);
    }

    #[test]
    fn error_tool_parts_surface_as_errors() {
        let session = Id::session();
        let user = Message::user(session.clone());
        let user_parts = vec![Part::text(session.clone(), user.id().clone(), "go")];
        let assistant = Message::assistant(session.clone(), user.id().clone(), "p", "m");
        let aid = assistant.id().clone();
        let mut part = Part::tool(session.clone(), aid, "c1", "bash");
        if let PartBody::Tool { state, .. } = &mut part.body {
            *state = ToolState::Error {
                message: "rejected".into(),
            };
        }

        let assembled = assemble_provider_messages(&[
            with_parts(user, user_parts),
            with_parts(assistant, vec![part]),
        ]);
        assert!(assembled.iter().any(|m| matches!(
            m,
            ProviderMessage::Tool { content, .. } if content == "Error: rejected"
        )));
    }

    #[test]
    fn estimate_and_truncate() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("0123456789abc", 10), "0123456789…");
    }
}
