use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use sy_domain::error::{Error, Result};
use sy_domain::stream::{BoxStream, StreamEvent};
use sy_domain::tool::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry of the assembled conversation sent to a provider. The turn
/// runner flattens the part log into this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ProviderMessage {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ProviderToolCall>,
    },
    Tool {
        call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderToolCall {
    pub call_id: String,
    pub tool: String,
    pub input: serde_json::Value,
}

/// A streaming chat request.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ProviderMessage>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u64>,
    /// The turn's cancellation token; adapters abort in-flight I/O on it.
    pub abort: CancellationToken,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model references
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

/// Parse a `provider/model` reference. The model half may itself
/// contain slashes (`openrouter/anthropic/claude-sonnet-4`).
pub fn parse_model(reference: &str) -> Result<ModelRef> {
    match reference.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => Ok(ModelRef {
            provider_id: provider.to_string(),
            model_id: model.to_string(),
        }),
        _ => Err(Error::Validation(format!(
            "model reference `{reference}` is not of the form provider/model"
        ))),
    }
}

/// Advertised limits and capabilities for one model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelInfo {
    pub context_limit: u64,
    pub output_limit: u64,
    pub tool_call: bool,
}

impl Default for ModelInfo {
    fn default() -> Self {
        Self {
            context_limit: 200_000,
            output_limit: 32_000,
            tool_call: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter implements.
///
/// `stream` opens one provider step and yields events until the step
/// finishes; classification of failures into retryable/fatal happens
/// here (`Error::Provider { retryable, retry_after }`).
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Limits for a model of this provider.
    fn info(&self, model_id: &str) -> ModelInfo;

    async fn stream(
        &self,
        req: StreamRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_model_splits_on_first_slash() {
        let parsed = parse_model("openrouter/anthropic/claude-sonnet-4").unwrap();
        assert_eq!(parsed.provider_id, "openrouter");
        assert_eq!(parsed.model_id, "anthropic/claude-sonnet-4");
    }

    #[test]
    fn parse_model_rejects_bare_names() {
        assert!(parse_model("gpt-4o").is_err());
        assert!(parse_model("/gpt-4o").is_err());
        assert!(parse_model("openai/").is_err());
    }
}
