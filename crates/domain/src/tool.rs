//! The tool seam.
//!
//! Tools are the only way a turn touches the outside world. Each tool
//! declares a JSON-schema'd input, executes against a [`ToolContext`],
//! and may suspend on a permission via the [`PermissionGate`] seam (the
//! broker implements it in the gateway).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::ident::Id;
use crate::permission::PermissionKind;

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

/// What a tool hands back to the runner.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Short human label for the invocation (e.g. the command line).
    pub title: String,
    /// Body fed back to the model.
    pub output: String,
    pub metadata: Value,
}

/// A permission request as a tool issues it.
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub kind: PermissionKind,
    /// Approval keys; empty means "the kind itself".
    pub patterns: Vec<String>,
    pub session_id: Id,
    pub message_id: Id,
    pub call_id: Option<String>,
    /// Agent the turn runs as; its permission overrides apply first.
    pub agent: String,
    pub title: String,
    pub metadata: Value,
}

/// Seam to the permission broker. `ask` returns once the request is
/// approved and fails with `Error::PermissionRejected` otherwise. The
/// returned value is the permission's final metadata: object responses
/// merge operator-supplied fields (`user_message`, `answers`,
/// `selected_agent`) into it; auto-approved requests return `Null`.
#[async_trait::async_trait]
pub trait PermissionGate: Send + Sync {
    async fn ask(&self, req: AskRequest) -> Result<Value>;
}

/// Everything a tool handler gets to work with.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: Id,
    pub message_id: Id,
    pub call_id: Option<String>,
    /// Resolved agent name for the running turn.
    pub agent: String,
    /// The turn's cancellation token; long-running tools must propagate
    /// it into their own I/O.
    pub abort: CancellationToken,
    pub permissions: Arc<dyn PermissionGate>,
}

impl ToolContext {
    pub fn ask(
        &self,
        kind: PermissionKind,
        patterns: Vec<String>,
        title: impl Into<String>,
        metadata: Value,
    ) -> AskRequest {
        AskRequest {
            kind,
            patterns,
            session_id: self.session_id.clone(),
            message_id: self.message_id.clone(),
            call_id: self.call_id.clone(),
            agent: self.agent.clone(),
            title: title.into(),
            metadata,
        }
    }
}

/// Trait every tool implements.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON Schema for the input object.
    fn schema(&self) -> Value;
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutput>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.schema(),
        }
    }
}
