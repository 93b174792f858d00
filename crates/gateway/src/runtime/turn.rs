//! Turn execution — one `prompt` invocation from lock acquisition to a
//! terminal assistant message.
//!
//! The loop alternates provider steps and tool execution: stream events
//! mutate parts as they arrive, tools run one at a time (a suspension on
//! a permission or on tool I/O blocks only this session), and every step
//! boundary updates token accounting and checks the overflow predicate
//! before the next provider call.

use std::collections::HashMap;

use chrono::Utc;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use sy_domain::config::Config;
use sy_domain::error::{Error, Result};
use sy_domain::ident::Id;
use sy_domain::message::{
    Message, MessageError, Part, PartBody, TimeRange, TokenUsage, ToolState,
};
use sy_domain::stream::StreamEvent;
use sy_domain::tool::ToolContext;
use sy_providers::StreamRequest;
use sy_sessions::BusEvent;

use crate::state::AppState;

use super::agent::{resolve_agent, resolve_model, ResolvedAgent, ResolvedModel};
use super::compact::{self, CompactRequest};
use super::prune::prune;
use super::retry::{bounded_delay, sleep_cancellable};
use super::{assemble_provider_messages, truncate_str};

/// Ceiling on provider steps per turn; a runaway tool loop stops here.
const MAX_STEPS: usize = 50;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputPart {
    Text { text: String },
    File { mime: String, url: String },
}

#[derive(Debug, Clone)]
pub struct PromptInput {
    pub session_id: Id,
    pub parts: Vec<InputPart>,
    /// Tool enable overrides, merged last over config and agent maps.
    pub tools: Option<HashMap<String, bool>>,
    pub agent: Option<String>,
    /// `provider/model` override.
    pub model: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn — entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one full turn. Returns the terminal assistant message; progress
/// is observed on the event bus. Fails fast with `SessionLocked` when a
/// turn is already in flight.
pub async fn run_turn(state: AppState, input: PromptInput) -> Result<Message> {
    let session = state.sessions.get(&input.session_id)?;
    let guard = state.locks.acquire(&session.id)?;
    let abort = guard.token();
    state.status.working();

    let span = tracing::info_span!("turn", session_id = %session.id);
    let outcome = run_turn_inner(&state, &input, abort).instrument(span).await;
    state.status.idle();
    // Guard drops here: `session.completed` is published if this turn is
    // still the registered owner (an abort suppresses it).
    outcome
}

async fn run_turn_inner(
    state: &AppState,
    input: &PromptInput,
    abort: CancellationToken,
) -> Result<Message> {
    let session_id = input.session_id.clone();

    // ── User message ─────────────────────────────────────────────────
    let user = Message::user(session_id.clone());
    let user_id = user.id().clone();
    state.log.update_message(user)?;
    for part in &input.parts {
        let part = match part {
            InputPart::Text { text } => {
                state.sessions.set_title_from_text(&session_id, text);
                let mut p = Part::text(session_id.clone(), user_id.clone(), text.clone());
                if let PartBody::Text { time, .. } = &mut p.body {
                    time.end = Some(Utc::now());
                }
                p
            }
            InputPart::File { mime, url } => Part::new(
                session_id.clone(),
                user_id.clone(),
                PartBody::File {
                    mime: mime.clone(),
                    url: url.clone(),
                },
            ),
        };
        state.log.update_part(part, None)?;
    }

    // ── Resolution ───────────────────────────────────────────────────
    let config = state.config.get();
    let mut agent = resolve_agent(&config, &state.locks, &session_id, input.agent.as_deref())?;
    let mut model = resolve_model(&config, &state.providers, &agent, input.model.as_deref())?;

    // ── Assistant message ────────────────────────────────────────────
    let mut assistant = Message::assistant(
        session_id.clone(),
        user_id,
        &model.model.provider_id,
        &model.model.model_id,
    );
    state.log.update_message(assistant.clone())?;

    let drive = drive_steps(
        state,
        input,
        &config,
        &mut agent,
        &mut model,
        &mut assistant,
        &abort,
    )
    .await;

    // ── Finalize ─────────────────────────────────────────────────────
    match drive {
        Ok(()) => {
            set_completed(&mut assistant, None);
            state.log.update_message(assistant.clone())?;
        }
        Err(Error::Aborted) => {
            set_completed(
                &mut assistant,
                Some(MessageError::Aborted { message: None }),
            );
            state.log.update_message(assistant.clone())?;
        }
        Err(e) => {
            set_completed(
                &mut assistant,
                Some(MessageError::Provider {
                    message: e.to_string(),
                }),
            );
            state.log.update_message(assistant.clone())?;
            state.bus.publish(BusEvent::SessionError {
                session_id: session_id.clone(),
                error: e.to_string(),
            });
        }
    }
    Ok(assistant)
}

fn set_completed(message: &mut Message, error: Option<MessageError>) {
    if let Message::Assistant {
        time, error: slot, ..
    } = message
    {
        time.completed = Some(Utc::now());
        if error.is_some() {
            *slot = error;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn drive_steps(
    state: &AppState,
    input: &PromptInput,
    config: &Config,
    agent: &mut ResolvedAgent,
    model: &mut ResolvedModel,
    assistant: &mut Message,
    abort: &CancellationToken,
) -> Result<()> {
    let session_id = assistant.session_id().clone();
    let assistant_id = assistant.id().clone();

    for _step in 0..MAX_STEPS {
        if abort.is_cancelled() {
            return Err(Error::Aborted);
        }

        // A graceful switch staged mid-turn takes effect here.
        if state.locks.pending_switch(&session_id).is_some() {
            *agent = resolve_agent(config, &state.locks, &session_id, input.agent.as_deref())?;
            *model = resolve_model(config, &state.providers, agent, input.model.as_deref())?;
        }

        let system = build_system_prompt(config, agent, &model.model.provider_id);
        let assembled = assemble_provider_messages(&state.log.messages(&session_id));
        let tool_defs = if model.info.tool_call {
            state
                .tools
                .definitions(&agent.config.tools, input.tools.as_ref())
        } else {
            Vec::new()
        };

        state.log.update_part(
            Part::new(
                session_id.clone(),
                assistant_id.clone(),
                PartBody::StepStart { snapshot: None },
            ),
            None,
        )?;

        let request = StreamRequest {
            model: model.model.model_id.clone(),
            system,
            messages: assembled,
            tools: tool_defs,
            temperature: agent.config.temperature,
            top_p: agent.config.top_p,
            max_tokens: None,
            abort: abort.clone(),
        };

        let outcome = stream_step(state, &session_id, &assistant_id, model, request, abort).await?;

        // ── Accounting ───────────────────────────────────────────────
        let step_cost = pricing_for(config, &model.model.provider_id, &model.model.model_id)
            .map(|p| p.cost(&outcome.tokens))
            .unwrap_or(0.0);
        if let Message::Assistant { tokens, cost, .. } = assistant {
            tokens.add(&outcome.tokens);
            *cost += step_cost;
        }
        state.log.update_message(assistant.clone())?;
        state.log.update_part(
            Part::new(
                session_id.clone(),
                assistant_id.clone(),
                PartBody::StepFinish {
                    tokens: outcome.tokens,
                    cost: step_cost,
                    snapshot: None,
                },
            ),
            None,
        )?;

        // ── Natural finish ───────────────────────────────────────────
        if outcome.tool_parts.is_empty() {
            return Ok(());
        }

        // ── Tool execution (sequential: one suspension at a time) ────
        for part in outcome.tool_parts {
            execute_tool(state, agent, part, abort).await?;
        }

        // ── Compaction check at the step boundary ────────────────────
        let compaction = &config.compaction;
        if compact::autocompact_enabled(compaction)
            && compact::is_overflow(&outcome.tokens, &model.info, compaction)
        {
            let excess = outcome
                .tokens
                .context_weight()
                .saturating_sub(compact::usable_context(&model.info, compaction));
            if let Err(e) = prune(&state.log, compaction, &session_id, excess) {
                tracing::warn!(error = %e, "prune failed");
            }
            let result = compact::run(
                state,
                CompactRequest {
                    session_id: session_id.clone(),
                    provider_id: model.model.provider_id.clone(),
                    model_id: model.model.model_id.clone(),
                },
                abort.clone(),
            )
            .await;
            match result {
                Ok(()) => {}
                Err(Error::Aborted) => return Err(Error::Aborted),
                // A failed compaction is not fatal to the turn; the next
                // step runs with the unreduced history.
                Err(e) => tracing::warn!(error = %e, "auto-compaction failed"),
            }
        }
    }

    Err(Error::Other(format!(
        "turn exceeded {MAX_STEPS} provider steps"
    )))
}

fn pricing_for<'c>(
    config: &'c Config,
    provider_id: &str,
    model_id: &str,
) -> Option<&'c sy_domain::config::ModelPricing> {
    config
        .providers
        .get(provider_id)?
        .models
        .get(model_id)?
        .price
        .as_ref()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One provider step (streamed, retried)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StepOutcome {
    /// Tool parts in `running` state, ready for execution, in call order.
    tool_parts: Vec<Part>,
    tokens: TokenUsage,
}

async fn stream_step(
    state: &AppState,
    session_id: &Id,
    assistant_id: &Id,
    model: &ResolvedModel,
    request: StreamRequest,
    abort: &CancellationToken,
) -> Result<StepOutcome> {
    let retry = state.config.get().retry;
    let started = tokio::time::Instant::now();
    let mut attempt: u32 = 0;

    let span = tracing::info_span!(
        "llm.call",
        provider = %model.model.provider_id,
        model = %model.model.model_id,
    );

    loop {
        attempt += 1;
        if abort.is_cancelled() {
            return Err(Error::Aborted);
        }

        match try_stream_step(state, session_id, assistant_id, model, request.clone(), abort)
            .instrument(span.clone())
            .await
        {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_retryable() && attempt < retry.chat_max_retries => {
                state.log.update_part(
                    Part::new(
                        session_id.clone(),
                        assistant_id.clone(),
                        PartBody::Retry {
                            attempt,
                            error: truncate_str(&e.to_string(), 400),
                        },
                    ),
                    None,
                )?;
                let Some(delay) = bounded_delay(&retry, &e, attempt, started) else {
                    return Err(e);
                };
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "provider step failed, retrying"
                );
                sleep_cancellable(delay, abort).await?;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn try_stream_step(
    state: &AppState,
    session_id: &Id,
    assistant_id: &Id,
    model: &ResolvedModel,
    request: StreamRequest,
    abort: &CancellationToken,
) -> Result<StepOutcome> {
    let mut stream = tokio::select! {
        r = model.provider.stream(request) => r?,
        _ = abort.cancelled() => return Err(Error::Aborted),
    };

    let mut text_part: Option<Part> = None;
    let mut tool_parts: Vec<Part> = Vec::new();
    // call_id -> index into tool_parts.
    let mut call_index: HashMap<String, usize> = HashMap::new();
    let mut tokens = TokenUsage::default();

    let outcome = loop {
        let event = tokio::select! {
            ev = stream.next() => ev,
            _ = abort.cancelled() => break Err(Error::Aborted),
        };
        let Some(event) = event else {
            break Ok(());
        };
        let event = match event {
            Ok(event) => event,
            Err(e) => break Err(e),
        };

        match event {
            StreamEvent::TextDelta { text } => {
                let part = match &mut text_part {
                    Some(part) => {
                        if let PartBody::Text { text: t, .. } = &mut part.body {
                            t.push_str(&text);
                        }
                        part.clone()
                    }
                    None => {
                        let fresh =
                            Part::text(session_id.clone(), assistant_id.clone(), text.clone());
                        text_part = Some(fresh.clone());
                        fresh
                    }
                };
                state.log.update_part(part, Some(text))?;
            }
            StreamEvent::TextEnd => {
                if let Some(part) = text_part.take() {
                    state.log.update_part(close_text(part), None)?;
                }
            }
            StreamEvent::ToolInputStart { call_id, tool } => {
                let part = Part::tool(
                    session_id.clone(),
                    assistant_id.clone(),
                    call_id.clone(),
                    tool,
                );
                state.log.update_part(part.clone(), None)?;
                call_index.insert(call_id, tool_parts.len());
                tool_parts.push(part);
            }
            StreamEvent::ToolInputDelta { .. } => {
                // Argument fragments are advisory; the assembled call
                // arrives as its own event.
            }
            StreamEvent::ToolCall {
                call_id,
                tool,
                input,
            } => {
                let index = match call_index.get(&call_id) {
                    Some(index) => *index,
                    None => {
                        // Providers that skip input-start events.
                        let part = Part::tool(
                            session_id.clone(),
                            assistant_id.clone(),
                            call_id.clone(),
                            tool.clone(),
                        );
                        call_index.insert(call_id.clone(), tool_parts.len());
                        tool_parts.push(part);
                        tool_parts.len() - 1
                    }
                };
                let part = &mut tool_parts[index];
                if let PartBody::Tool { state: s, .. } = &mut part.body {
                    *s = ToolState::Running { input };
                }
                state.log.update_part(part.clone(), None)?;
            }
            StreamEvent::StepFinish {
                tokens: step_tokens,
                ..
            } => {
                tokens = step_tokens;
            }
        }
    };

    match outcome {
        Ok(()) => {
            if let Some(part) = text_part.take() {
                state.log.update_part(close_text(part), None)?;
            }
            Ok(StepOutcome { tool_parts, tokens })
        }
        Err(e) => {
            // Close out partial state from the failed attempt. On the
            // abort path this must not emit events.
            let quiet = matches!(e, Error::Aborted);
            if let Some(part) = text_part.take() {
                let part = close_text(part);
                if quiet {
                    state.log.update_part_quiet(part)?;
                } else {
                    state.log.update_part(part, None)?;
                }
            }
            for mut part in tool_parts {
                if let PartBody::Tool { state: s, .. } = &mut part.body {
                    *s = ToolState::Error {
                        message: if quiet {
                            "aborted".to_string()
                        } else {
                            "interrupted before execution".to_string()
                        },
                    };
                }
                if quiet {
                    state.log.update_part_quiet(part)?;
                } else {
                    state.log.update_part(part, None)?;
                }
            }
            Err(e)
        }
    }
}

fn close_text(mut part: Part) -> Part {
    if let PartBody::Text { time, .. } = &mut part.body {
        if time.end.is_none() {
            time.end = Some(Utc::now());
        }
    }
    part
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one tool call to a terminal part state. Tool failures (including
/// permission rejections) become error parts and the turn continues;
/// only an abort propagates.
async fn execute_tool(
    state: &AppState,
    agent: &ResolvedAgent,
    mut part: Part,
    abort: &CancellationToken,
) -> Result<()> {
    let PartBody::Tool {
        call_id,
        tool: tool_name,
        state: ToolState::Running { input },
    } = part.body.clone()
    else {
        return Ok(());
    };

    if abort.is_cancelled() {
        return finish_aborted(state, part);
    }

    let ctx = ToolContext {
        session_id: part.session_id.clone(),
        message_id: part.message_id.clone(),
        call_id: Some(call_id),
        agent: agent.name.clone(),
        abort: abort.clone(),
        permissions: state.permissions.clone(),
    };

    let started = Utc::now();
    let span = tracing::info_span!("tool.call", tool = %tool_name);
    let result = async {
        let tool = state.tools.get(&tool_name)?;
        tool.execute(input.clone(), &ctx).await
    }
    .instrument(span)
    .await;

    match result {
        Ok(output) => {
            if let PartBody::Tool { state: s, .. } = &mut part.body {
                *s = ToolState::Completed {
                    input,
                    output: output.output,
                    title: output.title,
                    time: TimeRange {
                        start: started,
                        end: Utc::now(),
                    },
                    metadata: output.metadata,
                    compacted: None,
                };
            }
            state.log.update_part(part, None)?;
            Ok(())
        }
        Err(Error::Aborted) => finish_aborted(state, part),
        Err(e) => {
            if let PartBody::Tool { state: s, .. } = &mut part.body {
                *s = ToolState::Error {
                    message: e.to_string(),
                };
            }
            state.log.update_part(part, None)?;
            Ok(())
        }
    }
}

/// Abort path: record the terminal part state without publishing, then
/// surface the abort to the step loop.
fn finish_aborted(state: &AppState, mut part: Part) -> Result<()> {
    if let PartBody::Tool { state: s, .. } = &mut part.body {
        *s = ToolState::Error {
            message: "aborted".to_string(),
        };
    }
    state.log.update_part_quiet(part)?;
    Err(Error::Aborted)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// System prompt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_system_prompt(config: &Config, agent: &ResolvedAgent, provider_id: &str) -> String {
    let mut sections = vec![header(provider_id)];
    if let Some(prompt) = &agent.config.prompt {
        sections.push(prompt.clone());
    }
    sections.push(environment());
    if let Some(custom) = &config.instructions {
        sections.push(custom.clone());
    }
    sections.join("\n\n")
}

fn header(provider_id: &str) -> String {
    format!(
        "You are Switchyard, a coding agent orchestrated over the \
         {provider_id} provider. Work step by step, use the available \
         tools for anything that touches the workspace, and stop when \
         the task is done."
    )
}

fn environment() -> String {
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!(
        "Environment:\n  cwd: {cwd}\n  os: {}\n  date: {}",
        std::env::consts::OS,
        Utc::now().format("%Y-%m-%d"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sy_domain::config::AgentConfig;

    #[test]
    fn system_prompt_layers_in_order() {
        let mut config = Config::default();
        config.instructions = Some("Always answer in haiku.".to_string());
        let agent = ResolvedAgent {
            name: "default".to_string(),
            config: AgentConfig {
                prompt: Some("You review code.".to_string()),
                ..Default::default()
            },
        };
        let prompt = build_system_prompt(&config, &agent, "openai");
        let header_pos = prompt.find("Switchyard").unwrap();
        let agent_pos = prompt.find("You review code.").unwrap();
        let env_pos = prompt.find("Environment:").unwrap();
        let custom_pos = prompt.find("haiku").unwrap();
        assert!(header_pos < agent_pos);
        assert!(agent_pos < env_pos);
        assert!(env_pos < custom_pos);
    }

    #[test]
    fn input_part_deserializes_wire_shape() {
        let part: InputPart = serde_json::from_value(serde_json::json!({
            "type": "text",
            "text": "run: echo hi",
        }))
        .unwrap();
        assert!(matches!(part, InputPart::Text { text } if text == "run: echo hi"));

        let part: InputPart = serde_json::from_value(serde_json::json!({
            "type": "file",
            "mime": "image/png",
            "url": "file:///tmp/shot.png",
        }))
        .unwrap();
        assert!(matches!(part, InputPart::File { mime, .. } if mime == "image/png"));
    }
}
