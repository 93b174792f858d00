//! Shared test fixture: an in-process AppState over a temp storage root
//! and a scripted provider whose streams are declared per test.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use sy_domain::config::{Config, ModelConfig, ModelPricing, ProviderConfig};
use sy_domain::error::{Error, Result};
use sy_domain::ident::Id;
use sy_domain::message::TokenUsage;
use sy_domain::permission::PermissionKind;
use sy_domain::stream::{BoxStream, StreamEvent};
use sy_domain::tool::{Tool, ToolContext, ToolOutput};
use sy_gateway::bootstrap;
use sy_gateway::state::AppState;
use sy_providers::{LlmProvider, ModelInfo, StreamRequest};
use sy_sessions::bus::BusEvent;

pub const PROVIDER: &str = "scripted";
pub const MODEL: &str = "test-model";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub enum ScriptItem {
    Event(StreamEvent),
    /// Sleep mid-stream (keeps a turn in flight for lock/abort tests).
    Wait(u64),
    /// Fail the stream mid-flight.
    Fail { retryable: bool },
}

pub struct ScriptedProvider {
    info: Mutex<ModelInfo>,
    scripts: Mutex<VecDeque<Vec<ScriptItem>>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            info: Mutex::new(ModelInfo::default()),
            scripts: Mutex::new(VecDeque::new()),
        })
    }

    pub fn set_info(&self, info: ModelInfo) {
        *self.info.lock() = info;
    }

    /// Queue the events of the next `stream` call.
    pub fn push(&self, items: Vec<ScriptItem>) {
        self.scripts.lock().push_back(items);
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        PROVIDER
    }

    fn info(&self, _model_id: &str) -> ModelInfo {
        *self.info.lock()
    }

    async fn stream(
        &self,
        _req: StreamRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let items = self.scripts.lock().pop_front().ok_or_else(|| Error::Provider {
            provider: PROVIDER.to_string(),
            message: "script exhausted".to_string(),
            retryable: false,
            retry_after: None,
        })?;
        Ok(Box::pin(async_stream::stream! {
            for item in items {
                match item {
                    ScriptItem::Event(event) => yield Ok(event),
                    ScriptItem::Wait(ms) => {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                    }
                    ScriptItem::Fail { retryable } => {
                        yield Err(Error::Provider {
                            provider: PROVIDER.to_string(),
                            message: "scripted failure".to_string(),
                            retryable,
                            retry_after: None,
                        });
                        return;
                    }
                }
            }
        }))
    }
}

// ── Script building helpers ─────────────────────────────────────────

pub fn text(text: &str) -> ScriptItem {
    ScriptItem::Event(StreamEvent::TextDelta {
        text: text.to_string(),
    })
}

pub fn text_end() -> ScriptItem {
    ScriptItem::Event(StreamEvent::TextEnd)
}

pub fn tool_call(call_id: &str, tool: &str, input: Value) -> ScriptItem {
    ScriptItem::Event(StreamEvent::ToolCall {
        call_id: call_id.to_string(),
        tool: tool.to_string(),
        input,
    })
}

pub fn step_finish(input: u64, output: u64) -> ScriptItem {
    ScriptItem::Event(StreamEvent::StepFinish {
        tokens: TokenUsage {
            input,
            output,
            ..Default::default()
        },
        finish_reason: None,
    })
}

/// A plain final-answer step.
pub fn final_step(answer: &str) -> Vec<ScriptItem> {
    vec![text(answer), text_end(), step_finish(10, 5)]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test-only edit tool (exercises the edit permission)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EditTool;

#[async_trait::async_trait]
impl Tool for EditTool {
    fn name(&self) -> &'static str {
        "edit"
    }
    fn description(&self) -> &'static str {
        "Edit a file (test stub)."
    }
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "file_path": { "type": "string" } },
            "required": ["file_path"]
        })
    }
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = input
            .get("file_path")
            .and_then(|p| p.as_str())
            .unwrap_or("unknown")
            .to_string();
        ctx.permissions
            .ask(ctx.ask(
                PermissionKind::Edit,
                Vec::new(),
                format!("edit {path}"),
                json!({ "file_path": path }),
            ))
            .await?;
        Ok(ToolOutput {
            title: path,
            output: "edited".to_string(),
            metadata: Value::Null,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixture
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Fixture {
    pub _dir: tempfile::TempDir,
    pub state: AppState,
    pub provider: Arc<ScriptedProvider>,
}

pub fn fixture(mutate: impl FnOnce(&mut Config)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.server.data_dir = dir.path().to_path_buf();
    // Fast retries so transient-failure tests finish quickly.
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;

    let mut models = std::collections::HashMap::new();
    models.insert(
        MODEL.to_string(),
        ModelConfig {
            price: Some(ModelPricing {
                input: 3.0,
                output: 15.0,
                cache_read: 0.3,
                cache_write: 3.75,
            }),
            ..Default::default()
        },
    );
    config.providers.insert(
        PROVIDER.to_string(),
        ProviderConfig {
            default_model: Some(MODEL.to_string()),
            models,
            ..Default::default()
        },
    );

    mutate(&mut config);

    let state = bootstrap::build_default(Arc::new(
        sy_domain::config::ConfigStore::in_memory(config),
    ))
    .unwrap();

    // Swap the HTTP adapter for the scripted one and add the test edit
    // tool.
    let provider = ScriptedProvider::new();
    state.providers.insert(provider.clone());
    state.tools.register(Arc::new(EditTool));

    Fixture {
        _dir: dir,
        state,
        provider,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receive until an event satisfies `pred`, with a test-level timeout.
pub async fn wait_for(
    rx: &mut tokio::sync::broadcast::Receiver<BusEvent>,
    pred: impl Fn(&BusEvent) -> bool,
) -> BusEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Drain everything currently buffered.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<BusEvent>) -> Vec<BusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Assert that `kinds` appear in this order in `events` (other events
/// may interleave).
pub fn assert_ordered(events: &[BusEvent], kinds: &[&str]) {
    let mut want = kinds.iter();
    let mut current = want.next();
    for event in events {
        if let Some(kind) = current {
            if event.kind() == *kind {
                current = want.next();
            }
        }
    }
    assert!(
        current.is_none(),
        "missing event `{}` in order; saw: {:?}",
        current.unwrap(),
        events.iter().map(|e| e.kind()).collect::<Vec<_>>()
    );
}

/// First pending permission for a session, waiting for it to appear.
pub async fn wait_pending(state: &AppState, session_id: &Id) -> sy_domain::permission::Permission {
    for _ in 0..500 {
        if let Some(p) = state.permissions.pending(session_id).into_iter().next() {
            return p;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("permission never became pending");
}
