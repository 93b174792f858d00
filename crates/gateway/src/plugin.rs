//! Plugin hook chain.
//!
//! Hooks observe or veto core decisions by name (`permission.ask`,
//! `tool.execute.before`, ...). The first plugin returning a verdict
//! other than `Ask` settles the question.

use std::sync::Arc;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDecision {
    /// No opinion; fall through to the normal flow.
    Ask,
    Allow,
    Deny,
}

#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    async fn trigger(&self, hook: &str, payload: &Value) -> HookDecision;
}

#[derive(Default)]
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginChain {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub async fn trigger(&self, hook: &str, payload: &Value) -> HookDecision {
        for plugin in &self.plugins {
            let decision = plugin.trigger(hook, payload).await;
            if decision != HookDecision::Ask {
                tracing::debug!(plugin = plugin.name(), hook, ?decision, "hook settled");
                return decision;
            }
        }
        HookDecision::Ask
    }
}
