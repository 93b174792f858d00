//! The `todo_write` tool: replace the session's todo list.

use std::sync::Arc;

use serde_json::{json, Value};

use sy_domain::error::{Error, Result};
use sy_domain::tool::{Tool, ToolContext, ToolOutput};
use sy_sessions::{Todo, TodoStore};

pub struct TodoWriteTool {
    todos: Arc<TodoStore>,
}

impl TodoWriteTool {
    pub fn new(todos: Arc<TodoStore>) -> Self {
        Self { todos }
    }
}

#[async_trait::async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &'static str {
        "todo_write"
    }

    fn description(&self) -> &'static str {
        "Replace the session's todo list with an updated plan."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed"]
                            },
                            "priority": { "type": "integer" }
                        },
                        "required": ["content"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let todos: Vec<Todo> = serde_json::from_value(
            input
                .get("todos")
                .cloned()
                .ok_or_else(|| Error::Validation("todo_write: `todos` is required".to_string()))?,
        )?;

        let count = todos.len();
        self.todos.set(&ctx.session_id, todos)?;

        Ok(ToolOutput {
            title: format!("{count} todos"),
            output: format!("Updated the todo list ({count} items)."),
            metadata: Value::Null,
        })
    }
}
