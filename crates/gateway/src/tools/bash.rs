//! The `bash` tool: run a shell command, gated by the `bash` permission.

use std::process::Stdio;
use std::sync::Arc;

use serde_json::{json, Value};

use sy_domain::error::{Error, Result};
use sy_domain::permission::PermissionKind;
use sy_domain::tool::{Tool, ToolContext, ToolOutput};
use sy_sessions::{Bus, BusEvent};

/// Output bytes kept from each stream before truncation.
const OUTPUT_LIMIT: usize = 30_000;

pub struct BashTool {
    bus: Arc<Bus>,
}

impl BashTool {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self { bus }
    }
}

/// Approval keys for a command: the literal command plus its leading-word
/// wildcard, so an `always` on `echo hi` also remembers `echo *`.
fn command_patterns(command: &str) -> Vec<String> {
    let mut patterns = vec![command.to_string()];
    if let Some(word) = command.split_whitespace().next() {
        let prefix = format!("{word} *");
        if prefix != command {
            patterns.push(prefix);
        }
    }
    patterns
}

#[async_trait::async_trait]
impl Tool for BashTool {
    fn name(&self) -> &'static str {
        "bash"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the workspace and return its output."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Optional wall-clock limit in milliseconds"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let command = input
            .get("command")
            .and_then(|c| c.as_str())
            .ok_or_else(|| Error::Validation("bash: `command` is required".to_string()))?
            .to_string();
        let timeout_ms = input.get("timeout_ms").and_then(|t| t.as_u64());

        ctx.permissions
            .ask(ctx.ask(
                PermissionKind::Bash,
                command_patterns(&command),
                command.clone(),
                json!({ "command": command }),
            ))
            .await?;

        let child = tokio::process::Command::new("bash")
            .arg("-lc")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the future (abort, timeout) kills the child via
        // kill_on_drop.
        let wait = child.wait_with_output();

        let collected = match timeout_ms {
            Some(ms) => {
                let limit = std::time::Duration::from_millis(ms);
                tokio::select! {
                    r = tokio::time::timeout(limit, wait) => r
                        .map_err(|_| Error::Other(format!("command timed out after {ms}ms")))??,
                    _ = ctx.abort.cancelled() => return Err(Error::Aborted),
                }
            }
            None => tokio::select! {
                r = wait => r?,
                _ = ctx.abort.cancelled() => return Err(Error::Aborted),
            },
        };

        let status = collected.status;
        let mut output = String::from_utf8_lossy(&collected.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&collected.stderr));
        let exit_code = status.code();
        self.bus.publish(BusEvent::BashExecuted {
            session_id: ctx.session_id.clone(),
            command: command.clone(),
            exit_code,
        });
        self.bus.publish(BusEvent::CommandExecuted {
            session_id: ctx.session_id.clone(),
            command: command.clone(),
        });

        let mut body = output;
        if body.len() > OUTPUT_LIMIT {
            body.truncate(OUTPUT_LIMIT);
            body.push_str("\n[output truncated]");
        }
        if !status.success() {
            body.push_str(&format!("\n(exit code {})", exit_code.unwrap_or(-1)));
        }

        Ok(ToolOutput {
            title: command,
            output: body,
            metadata: json!({ "exit_code": exit_code }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_include_literal_and_prefix() {
        assert_eq!(
            command_patterns("echo hi"),
            vec!["echo hi".to_string(), "echo *".to_string()]
        );
        assert_eq!(
            command_patterns("ls"),
            vec!["ls".to_string(), "ls *".to_string()]
        );
        // A command that already is its own prefix pattern stays single.
        assert_eq!(command_patterns("echo *"), vec!["echo *".to_string()]);
    }
}
