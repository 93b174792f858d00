//! Conversation compaction.
//!
//! When the provider request approaches the model's usable context, the
//! history since the last anchor is summarized into a new assistant
//! message marked `summary:true`, followed by a synthetic resume user
//! message carrying the structured state of the work (original request,
//! git state, open todos, file activity, diffs, and the summary). Future
//! provider assemblies start at the anchor.

use chrono::Utc;
use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use sy_domain::config::CompactionConfig;
use sy_domain::error::{Error, Result};
use sy_domain::ident::Id;
use sy_domain::message::{Message, MessageWithParts, Part, PartBody, TokenUsage, ToolState};
use sy_domain::stream::StreamEvent;
use sy_providers::{ModelInfo, StreamRequest};
use sy_sessions::BusEvent;

use crate::state::AppState;

use super::retry::{bounded_delay, sleep_cancellable};
use super::{estimate_tokens, truncate_str};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Overflow predicate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Context available for input after reserving room for output.
pub fn usable_context(info: &ModelInfo, config: &CompactionConfig) -> u64 {
    info.context_limit
        .saturating_sub(info.output_limit.min(config.output_token_max))
}

/// True when the last step's usage no longer fits the usable context.
pub fn is_overflow(last_step: &TokenUsage, info: &ModelInfo, config: &CompactionConfig) -> bool {
    last_step.context_weight() > usable_context(info, config)
}

/// Auto-compaction gate: the config switch plus the escape-hatch env var.
pub fn autocompact_enabled(config: &CompactionConfig) -> bool {
    config.auto && std::env::var_os("AUTOCOMPACT_OFF").is_none()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CompactRequest {
    pub session_id: Id,
    pub provider_id: String,
    pub model_id: String,
}

const SUMMARY_PROMPT: &str = "You are summarizing a coding session so it can continue in a \
fresh context. Preserve:\n\
1. The current goal and plan being worked on\n\
2. Key decisions made and their reasons\n\
3. Open questions or unfinished threads\n\
4. Important facts learned about the codebase\n\
5. Tool state (running processes, files being edited, pending work)\n\n\
Be concise but keep every actionable detail. Write in present tense.\n\n\
CONVERSATION:\n";

/// How much of the original request survives into the resume context.
const ORIGINAL_REQUEST_CHARS: usize = 500;
/// File-activity histogram cap.
const FILE_HISTOGRAM_CAP: usize = 15;

/// Run one compaction. The caller must already hold the session's turn
/// lock (a turn yielding at step-finish) or have acquired it for a
/// standalone run; `abort` is that holder's cancellation token.
///
/// `session.time.compacting` is set for the duration and cleared on
/// every exit path.
pub async fn run(state: &AppState, req: CompactRequest, abort: CancellationToken) -> Result<()> {
    state
        .sessions
        .set_compacting(&req.session_id, Some(Utc::now()))?;
    let outcome = run_inner(state, &req, abort).await;
    // Clear on success, failure, and abort alike.
    if let Err(e) = state.sessions.set_compacting(&req.session_id, None) {
        tracing::warn!(error = %e, "clearing compacting timestamp failed");
    }
    outcome
}

async fn run_inner(
    state: &AppState,
    req: &CompactRequest,
    abort: CancellationToken,
) -> Result<()> {
    let messages = state.log.messages(&req.session_id);
    let transcript = build_transcript(&messages);
    if transcript.is_empty() {
        return Ok(());
    }

    state.bus.publish(BusEvent::CompactingProgress {
        session_id: req.session_id.clone(),
        step: "started".to_string(),
        data: json!({
            "messages_count": messages.len(),
            "tokens_input": estimate_tokens(&transcript),
        }),
    });

    // ── Summarize (streamed, retried) ────────────────────────────────
    let parent_id = messages
        .iter()
        .rev()
        .find(|m| !m.message.is_assistant())
        .map(|m| m.message.id().clone())
        .unwrap_or_else(Id::message);

    let mut summary_msg = Message::assistant(
        req.session_id.clone(),
        parent_id,
        &req.provider_id,
        &req.model_id,
    );
    if let Message::Assistant { summary, .. } = &mut summary_msg {
        *summary = true;
    }
    let summary_id = summary_msg.id().clone();
    state.log.update_message(summary_msg.clone())?;

    let stream_req = StreamRequest {
        model: req.model_id.clone(),
        system: String::new(),
        messages: vec![sy_providers::ProviderMessage::User {
            content: format!("{SUMMARY_PROMPT}{transcript}"),
        }],
        tools: Vec::new(),
        temperature: Some(0.1),
        top_p: None,
        max_tokens: None,
        abort: abort.clone(),
    };

    let summary_text =
        stream_summary(state, req, &summary_id, stream_req, &abort).await?;

    if let Message::Assistant { time, .. } = &mut summary_msg {
        time.completed = Some(Utc::now());
    }
    state.log.update_message(summary_msg)?;

    // ── Resume context ───────────────────────────────────────────────
    state.bus.publish(BusEvent::CompactingProgress {
        session_id: req.session_id.clone(),
        step: "context".to_string(),
        data: serde_json::Value::Null,
    });

    let resume = build_resume_context(state, req, &messages, &summary_text).await;
    let resume_msg = Message::user(req.session_id.clone());
    let resume_id = resume_msg.id().clone();
    state.log.update_message(resume_msg)?;
    state.log.update_part(
        {
            let mut part = Part::synthetic_text(req.session_id.clone(), resume_id, resume);
            if let PartBody::Text { time, .. } = &mut part.body {
                time.end = Some(Utc::now());
            }
            part
        },
        None,
    )?;

    state.bus.publish(BusEvent::SessionCompacted {
        session_id: req.session_id.clone(),
    });
    state.bus.publish(BusEvent::CompactingProgress {
        session_id: req.session_id.clone(),
        step: "done".to_string(),
        data: serde_json::Value::Null,
    });
    tracing::info!(session_id = %req.session_id, "session compacted");
    Ok(())
}

/// Stream the summary text into a text part under the summary message,
/// retrying transient provider failures with the standard policy.
async fn stream_summary(
    state: &AppState,
    req: &CompactRequest,
    summary_id: &Id,
    stream_req: StreamRequest,
    abort: &CancellationToken,
) -> Result<String> {
    let retry = state.config.get().retry;
    let started = tokio::time::Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        if abort.is_cancelled() {
            return Err(Error::Aborted);
        }

        match try_stream_summary(state, req, summary_id, stream_req.clone()).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retryable() && attempt < retry.chat_max_retries => {
                let Some(delay) = bounded_delay(&retry, &e, attempt, started) else {
                    return Err(e);
                };
                tracing::warn!(
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "summary step failed, retrying"
                );
                sleep_cancellable(delay, abort).await?;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn try_stream_summary(
    state: &AppState,
    req: &CompactRequest,
    summary_id: &Id,
    stream_req: StreamRequest,
) -> Result<String> {
    let provider = state
        .providers
        .get(&req.provider_id)
        .ok_or_else(|| Error::Validation(format!("unknown provider `{}`", req.provider_id)))?;

    let mut stream = provider.stream(stream_req).await?;
    let mut part: Option<Part> = None;
    let mut text = String::new();

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::TextDelta { text: delta } => {
                text.push_str(&delta);
                let updated = match &mut part {
                    Some(part) => {
                        if let PartBody::Text { text: t, .. } = &mut part.body {
                            t.push_str(&delta);
                        }
                        part.clone()
                    }
                    None => {
                        let fresh =
                            Part::text(req.session_id.clone(), summary_id.clone(), delta.clone());
                        part = Some(fresh.clone());
                        fresh
                    }
                };
                state.log.update_part(updated, Some(delta))?;
            }
            StreamEvent::TextEnd => {
                if let Some(part) = &mut part {
                    if let PartBody::Text { time, .. } = &mut part.body {
                        time.end = Some(Utc::now());
                    }
                    state.log.update_part(part.clone(), None)?;
                }
            }
            StreamEvent::StepFinish { .. } => break,
            // A summarize request carries no tools; stray tool events
            // are ignored.
            _ => {}
        }
    }
    Ok(text)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript & resume context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Plain-text transcript of the history since the last summary anchor.
fn build_transcript(messages: &[MessageWithParts]) -> String {
    let start = messages
        .iter()
        .rposition(|m| m.message.is_summary())
        .map(|i| i + 1)
        .unwrap_or(0);

    let mut buf = String::new();
    for entry in &messages[start..] {
        let role = if entry.message.is_assistant() {
            "Assistant"
        } else {
            "User"
        };
        for part in &entry.parts {
            match &part.body {
                PartBody::Text { text, .. } => {
                    buf.push_str(role);
                    buf.push_str(": ");
                    buf.push_str(text);
                    buf.push('\n');
                }
                PartBody::Tool {
                    tool,
                    state: ToolState::Completed { title, output, .. },
                    ..
                } => {
                    buf.push_str("Tool ");
                    buf.push_str(tool);
                    buf.push_str(" (");
                    buf.push_str(title);
                    buf.push_str("): ");
                    // Long tool outputs are trimmed so the summary prompt
                    // stays manageable.
                    buf.push_str(&truncate_str(output, 2_000));
                    buf.push('\n');
                }
                _ => {}
            }
        }
    }
    buf
}

/// Assemble the synthetic resume user message.
async fn build_resume_context(
    state: &AppState,
    req: &CompactRequest,
    messages: &[MessageWithParts],
    summary: &str,
) -> String {
    let mut sections = Vec::new();

    if let Some(original) = original_request(messages) {
        sections.push(format!(
            "Original request:\n{}",
            truncate_str(&original, ORIGINAL_REQUEST_CHARS)
        ));
    }

    let git = state.snapshot.git_state().await;
    if !git.is_empty() {
        let mut lines = Vec::new();
        if let Some(branch) = &git.branch {
            lines.push(format!("branch: {branch}"));
        }
        if !git.staged.is_empty() {
            lines.push(format!("staged: {}", git.staged.join(", ")));
        }
        if !git.uncommitted.is_empty() {
            lines.push(format!("uncommitted: {}", git.uncommitted.join(", ")));
        }
        sections.push(format!("Git state:\n{}", lines.join("\n")));
    }

    let todos = state.todos.open(&req.session_id);
    if !todos.is_empty() {
        let lines: Vec<String> = todos
            .iter()
            .map(|t| format!("- [{:?}] {}", t.status, t.content))
            .collect();
        sections.push(format!("Pending todos:\n{}", lines.join("\n")));
    }

    let histogram = file_activity(messages);
    if !histogram.is_empty() {
        sections.push(format!("Most active files:\n{histogram}"));
    }

    if let Some(diff) = state.snapshot.diff().await {
        // Kept on disk too, for the history/revert UI.
        if let Err(e) = state
            .storage
            .write(&["session_diff", req.session_id.as_str()], &diff)
        {
            tracing::warn!(error = %e, "persisting session diff failed");
        }
        sections.push(format!("Session diff:\n{}", truncate_str(&diff, 4_000)));
    }

    sections.push(format!("Summary of the conversation so far:\n{summary}"));

    format!(
        "This session was compacted to fit the context window. Continue \
         from the state below.\n\n{}",
        sections.join("\n\n")
    )
}

/// First ≤500 chars of the user text that started the session, skipping
/// synthetic resume messages from earlier compactions.
fn original_request(messages: &[MessageWithParts]) -> Option<String> {
    messages
        .iter()
        .filter(|m| !m.message.is_assistant())
        .flat_map(|m| m.parts.iter())
        .find_map(|part| match &part.body {
            PartBody::Text {
                text,
                synthetic: false,
                ..
            } if !text.trim().is_empty() => Some(text.clone()),
            _ => None,
        })
}

/// Histogram of file paths touched by completed read/edit/write tool
/// calls, capped with an "and N more" tail.
fn file_activity(messages: &[MessageWithParts]) -> String {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for part in messages.iter().flat_map(|m| m.parts.iter()) {
        let PartBody::Tool { tool, state, .. } = &part.body else {
            continue;
        };
        if !matches!(tool.as_str(), "read" | "edit" | "write") {
            continue;
        }
        let ToolState::Completed { input, .. } = state else {
            continue;
        };
        let Some(path) = input
            .get("file_path")
            .or_else(|| input.get("path"))
            .and_then(|p| p.as_str())
        else {
            continue;
        };
        match counts.iter_mut().find(|entry| entry.0 == path) {
            Some(entry) => entry.1 += 1,
            None => counts.push((path.to_string(), 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let shown: Vec<String> = counts
        .iter()
        .take(FILE_HISTOGRAM_CAP)
        .map(|(path, n)| format!("- {path} ({n})"))
        .collect();
    let mut out = shown.join("\n");
    if counts.len() > FILE_HISTOGRAM_CAP {
        out.push_str(&format!("\n… and {} more", counts.len() - FILE_HISTOGRAM_CAP));
    }
    out
}
