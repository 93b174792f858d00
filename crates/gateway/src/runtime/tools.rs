//! Tool registry and enable-map resolution.
//!
//! Tools register once at boot. Which of them a turn actually exposes to
//! the model is the merge of three enable maps (config defaults, agent
//! config, request overrides), with presets already expanded into the
//! agent layer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use sy_domain::config::merge_tool_maps;
use sy_domain::error::{Error, Result};
use sy_domain::tool::{Tool, ToolDefinition};

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.write().insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    /// Resolve the effective enable map and return definitions for every
    /// tool not switched off. Unknown names in override maps are ignored.
    pub fn definitions(
        &self,
        agent_tools: &HashMap<String, bool>,
        request_tools: Option<&HashMap<String, bool>>,
    ) -> Vec<ToolDefinition> {
        let empty = HashMap::new();
        let merged = merge_tool_maps(&[
            agent_tools,
            request_tools.unwrap_or(&empty),
        ]);

        let tools = self.tools.read();
        let mut names: Vec<&String> = tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter(|name| *merged.get(*name).unwrap_or(&true))
            .map(|name| tools[name].definition())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use sy_domain::tool::{ToolContext, ToolOutput};

    struct Dummy(&'static str);

    #[async_trait::async_trait]
    impl Tool for Dummy {
        fn name(&self) -> &'static str {
            self.0
        }
        fn description(&self) -> &'static str {
            "dummy"
        }
        fn schema(&self) -> Value {
            serde_json::json!({ "type": "object" })
        }
        async fn execute(&self, _input: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            Ok(ToolOutput::default())
        }
    }

    #[test]
    fn enable_maps_merge_last_wins() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Dummy("bash")));
        registry.register(Arc::new(Dummy("task")));

        // Agent disables bash; request re-enables it and disables task.
        let mut agent = HashMap::new();
        agent.insert("bash".to_string(), false);
        let mut request = HashMap::new();
        request.insert("bash".to_string(), true);
        request.insert("task".to_string(), false);

        let defs = registry.definitions(&agent, Some(&request));
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["bash"]);
    }

    #[test]
    fn default_is_enabled() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Dummy("bash")));
        let defs = registry.definitions(&HashMap::new(), None);
        assert_eq!(defs.len(), 1);
    }

    #[test]
    fn unknown_tool_errors() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.get("ghost"),
            Err(Error::ToolNotFound(_))
        ));
    }
}
