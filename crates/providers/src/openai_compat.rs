//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure-style gateways, Ollama, vLLM, and any other
//! endpoint that follows the chat completions contract. Tool-call
//! fragments are assembled here so the turn runner only ever sees whole
//! `ToolCall` events before the step finishes.

use std::collections::HashMap;

use serde_json::{json, Value};

use sy_domain::config::{ModelConfig, ProviderConfig};
use sy_domain::error::{Error, Result};
use sy_domain::message::{CacheUsage, TokenUsage};
use sy_domain::stream::{BoxStream, StreamEvent};

use crate::sse::sse_response_stream;
use crate::traits::{LlmProvider, ModelInfo, ProviderMessage, StreamRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    models: HashMap<String, ModelConfig>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_config(id: &str, cfg: &ProviderConfig) -> Result<Self> {
        let api_key = match &cfg.api_key_env {
            Some(var) => std::env::var(var).ok().or_else(|| cfg.api_key.clone()),
            None => cfg.api_key.clone(),
        };
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("building http client: {e}")))?;
        Ok(Self {
            id: id.to_string(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            models: cfg.models.clone(),
            client,
        })
    }

    fn build_body(&self, req: &StreamRequest) -> Value {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);
        if !req.system.is_empty() {
            messages.push(json!({ "role": "system", "content": req.system }));
        }
        for message in &req.messages {
            messages.push(wire_message(message));
        }

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            },
                        })
                    })
                    .collect(),
            );
        }
        if let Some(temperature) = req.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = req.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(max_tokens) = req.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn info(&self, model_id: &str) -> ModelInfo {
        self.models
            .get(model_id)
            .map(|m| ModelInfo {
                context_limit: m.context_limit,
                output_limit: m.output_limit,
                tool_call: m.tool_call,
            })
            .unwrap_or_default()
    }

    async fn stream(
        &self,
        req: StreamRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req);

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let abort = req.abort.clone();
        let response = tokio::select! {
            r = request.send() => r,
            _ = abort.cancelled() => return Err(Error::Aborted),
        }
        .map_err(|e| Error::Provider {
            provider: self.id.clone(),
            message: e.to_string(),
            retryable: true,
            retry_after: None,
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("{status}: {message}"),
                retryable: is_retryable_status(status.as_u16()),
                retry_after,
            });
        }

        let mut state = StreamState::default();
        Ok(sse_response_stream(
            response,
            self.id.clone(),
            move |data| state.parse(data),
        ))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504 | 529)
}

fn wire_message(message: &ProviderMessage) -> Value {
    match message {
        ProviderMessage::User { content } => json!({ "role": "user", "content": content }),
        ProviderMessage::Assistant {
            content,
            tool_calls,
        } => {
            let mut m = json!({ "role": "assistant", "content": content });
            if !tool_calls.is_empty() {
                m["tool_calls"] = Value::Array(
                    tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.call_id,
                                "type": "function",
                                "function": {
                                    "name": tc.tool,
                                    "arguments": tc.input.to_string(),
                                },
                            })
                        })
                        .collect(),
                );
            }
            m
        }
        ProviderMessage::Tool { call_id, content } => json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": content,
        }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunk parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assembly state across SSE chunks: the wire fragments tool calls by
/// index, and usage may arrive in its own trailing chunk.
#[derive(Default)]
struct StreamState {
    /// index -> (call_id, tool name, argument buffer)
    calls: Vec<(String, String, String)>,
    text_open: bool,
    finish_reason: Option<String>,
    finished: bool,
}

impl StreamState {
    fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data.trim() == "[DONE]" {
            return self.finish(None);
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());

        // Usage-only chunk (stream_options.include_usage) closes the step.
        let Some(choice) = choice else {
            if let Some(usage) = v.get("usage").map(parse_usage) {
                return self.finish(Some(usage));
            }
            return Vec::new();
        };

        let mut events = Vec::new();
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                self.text_open = true;
                events.push(Ok(StreamEvent::TextDelta {
                    text: text.to_string(),
                }));
            }
        }

        if let Some(fragments) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for fragment in fragments {
                events.extend(self.tool_fragment(fragment));
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            self.finish_reason = Some(reason.to_string());
            // Some servers attach usage to the finish chunk instead of a
            // trailing one.
            if let Some(usage) = v.get("usage").filter(|u| !u.is_null()).map(parse_usage) {
                events.extend(self.finish(Some(usage)));
            }
        }

        events
    }

    fn tool_fragment(&mut self, fragment: &Value) -> Vec<Result<StreamEvent>> {
        let index = fragment
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(self.calls.len().saturating_sub(1) as u64) as usize;

        let mut events = Vec::new();
        if let Some(id) = fragment.get("id").and_then(|i| i.as_str()) {
            let tool = fragment
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|n| n.as_str())
                .unwrap_or("")
                .to_string();
            while self.calls.len() <= index {
                self.calls.push(Default::default());
            }
            self.calls[index] = (id.to_string(), tool.clone(), String::new());
            events.push(Ok(StreamEvent::ToolInputStart {
                call_id: id.to_string(),
                tool,
            }));
        }
        if let Some(args) = fragment
            .get("function")
            .and_then(|f| f.get("arguments"))
            .and_then(|a| a.as_str())
        {
            if let Some((call_id, _, buffer)) = self.calls.get_mut(index) {
                buffer.push_str(args);
                events.push(Ok(StreamEvent::ToolInputDelta {
                    call_id: call_id.clone(),
                    delta: args.to_string(),
                }));
            }
        }
        events
    }

    /// Close the step: end any open text block, flush assembled tool
    /// calls, then emit `StepFinish`. Idempotent.
    fn finish(&mut self, usage: Option<TokenUsage>) -> Vec<Result<StreamEvent>> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        if self.text_open {
            self.text_open = false;
            events.push(Ok(StreamEvent::TextEnd));
        }
        for (call_id, tool, buffer) in self.calls.drain(..) {
            let input: Value = if buffer.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&buffer).unwrap_or_else(|e| {
                    tracing::warn!(
                        call_id = %call_id,
                        tool = %tool,
                        error = %e,
                        "tool call arguments are not valid JSON; defaulting to empty object"
                    );
                    Value::Object(Default::default())
                })
            };
            events.push(Ok(StreamEvent::ToolCall {
                call_id,
                tool,
                input,
            }));
        }
        events.push(Ok(StreamEvent::StepFinish {
            tokens: usage.unwrap_or_default(),
            finish_reason: self.finish_reason.take(),
        }));
        events
    }
}

fn parse_usage(v: &Value) -> TokenUsage {
    let prompt = v.get("prompt_tokens").and_then(|t| t.as_u64()).unwrap_or(0);
    let completion = v
        .get("completion_tokens")
        .and_then(|t| t.as_u64())
        .unwrap_or(0);
    let cached = v
        .get("prompt_tokens_details")
        .and_then(|d| d.get("cached_tokens"))
        .and_then(|t| t.as_u64())
        .unwrap_or(0);
    let reasoning = v
        .get("completion_tokens_details")
        .and_then(|d| d.get("reasoning_tokens"))
        .and_then(|t| t.as_u64())
        .unwrap_or(0);
    TokenUsage {
        input: prompt.saturating_sub(cached),
        output: completion,
        reasoning,
        cache: CacheUsage {
            read: cached,
            write: 0,
        },
    }
}
