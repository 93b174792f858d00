//! The `ask_user` tool: put a question to the operator through the
//! permission protocol and return their answer.

use serde_json::{json, Value};

use sy_domain::error::{Error, Result};
use sy_domain::permission::PermissionKind;
use sy_domain::tool::{Tool, ToolContext, ToolOutput};

pub struct AskUserTool;

#[async_trait::async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &'static str {
        "ask_user"
    }

    fn description(&self) -> &'static str {
        "Ask the user a question and wait for their answer. Use when a \
         decision genuinely needs human input."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to ask"
                },
                "choices": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional fixed choices"
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let question = input
            .get("question")
            .and_then(|q| q.as_str())
            .ok_or_else(|| Error::Validation("ask_user: `question` is required".to_string()))?
            .to_string();

        let metadata = ctx
            .permissions
            .ask(ctx.ask(
                PermissionKind::AskUser,
                Vec::new(),
                question.clone(),
                json!({ "questions": [input.clone()] }),
            ))
            .await?;

        // The operator's reply arrives in the resolved metadata.
        let answer = metadata
            .get("answers")
            .and_then(|a| a.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|a| !a.is_empty())
            .or_else(|| {
                metadata
                    .get("user_message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "(approved without an answer)".to_string());

        Ok(ToolOutput {
            title: question,
            output: answer,
            metadata,
        })
    }
}
