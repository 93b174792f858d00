//! The `task` tool: delegate a sub-task to a child session.
//!
//! The child is created with `parent_id` pointing at the caller, so its
//! permission requests forward to the parent and parent approvals apply
//! read-through. The child's final answer is returned as ordinary tool
//! output; aborting the parent aborts the child.

use serde_json::{json, Value};

use sy_domain::error::{Error, Result};
use sy_domain::message::{Message, SessionSource};
use sy_domain::tool::{Tool, ToolContext, ToolOutput};
use sy_sessions::store::CreateSession;

use crate::runtime::{run_turn, truncate_str, InputPart, PromptInput};
use crate::state::AppState;

pub struct TaskTool {
    state: AppState,
}

impl TaskTool {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &'static str {
        "task"
    }

    fn description(&self) -> &'static str {
        "Spawn a sub-agent session to work on a self-contained task and \
         return its final answer."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The task for the sub-agent"
                },
                "agent": {
                    "type": "string",
                    "description": "Agent to run the sub-task as"
                }
            },
            "required": ["prompt"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let prompt = input
            .get("prompt")
            .and_then(|p| p.as_str())
            .ok_or_else(|| Error::Validation("task: `prompt` is required".to_string()))?
            .to_string();
        let agent = input
            .get("agent")
            .and_then(|a| a.as_str())
            .map(str::to_string);

        let child = self.state.sessions.create(CreateSession {
            title: Some(format!("task: {}", truncate_str(&prompt, 60))),
            parent_id: Some(ctx.session_id.clone()),
            container_profile: None,
            source: SessionSource::Background,
        })?;

        let child_id = child.id.clone();
        let turn = run_turn(
            self.state.clone(),
            PromptInput {
                session_id: child_id.clone(),
                parts: vec![InputPart::Text { text: prompt }],
                tools: None,
                agent,
                model: None,
            },
        );

        // Parent abort cascades into the child turn.
        let message = tokio::select! {
            r = turn => r?,
            _ = ctx.abort.cancelled() => {
                self.state.locks.abort(&child_id);
                return Err(Error::Aborted);
            }
        };

        let output = final_text(&self.state, &message);
        let failed = matches!(
            &message,
            Message::Assistant { error: Some(_), .. }
        );
        if failed && output.is_empty() {
            return Err(Error::Other("sub-agent turn failed".to_string()));
        }

        Ok(ToolOutput {
            title: self
                .state
                .sessions
                .get(&child_id)
                .map(|s| s.title)
                .unwrap_or_else(|_| "task".to_string()),
            output,
            metadata: json!({ "session_id": child_id }),
        })
    }
}

/// The child's final assistant text.
fn final_text(state: &AppState, message: &Message) -> String {
    state
        .log
        .parts(message.session_id(), message.id())
        .iter()
        .filter_map(|p| p.as_text().map(str::to_string))
        .collect::<Vec<_>>()
        .join("\n")
}
