use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::permission::{BashRule, PermissionConfig, Rule};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where an agent may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Primary,
    Subagent,
    #[default]
    All,
}

/// One agent's options. Every field is optional so definitions can be
/// layered: preset ← user config ← request overrides, last wins.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    /// Tool enable map (`name -> bool`). Merged, not replaced.
    #[serde(default)]
    pub tools: HashMap<String, bool>,
    /// Per-agent permission overrides; falls back to the global rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<PermissionConfig>,
    /// `provider/model` override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Agent system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub mode: AgentMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub disable: bool,
}

impl AgentConfig {
    /// Layer `overlay` on top of `self`; overlay fields win, tool maps
    /// merge key-wise.
    pub fn merged_with(&self, overlay: &AgentConfig) -> AgentConfig {
        let mut tools = self.tools.clone();
        tools.extend(overlay.tools.clone());
        AgentConfig {
            tools,
            permission: overlay.permission.clone().or_else(|| self.permission.clone()),
            model: overlay.model.clone().or_else(|| self.model.clone()),
            temperature: overlay.temperature.or(self.temperature),
            top_p: overlay.top_p.or(self.top_p),
            prompt: overlay.prompt.clone().or_else(|| self.prompt.clone()),
            mode: if overlay.mode == AgentMode::All {
                self.mode
            } else {
                overlay.mode
            },
            color: overlay.color.clone().or_else(|| self.color.clone()),
            disable: overlay.disable || self.disable,
        }
    }
}

/// Merge tool enable maps in precedence order (earliest is weakest).
pub fn merge_tool_maps(layers: &[&HashMap<String, bool>]) -> HashMap<String, bool> {
    let mut merged = HashMap::new();
    for layer in layers {
        merged.extend((*layer).clone());
    }
    merged
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in presets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Expand a built-in preset name into its option set. Presets are
/// shorthand: they produce the same shape as a user-defined agent and
/// merge by the same rules.
pub fn expand_preset(name: &str) -> Option<AgentConfig> {
    match name {
        "default" => Some(AgentConfig::default()),
        "yolo" => {
            let mut permission = PermissionConfig::default();
            permission.edit = Rule::Allow;
            permission.write = Rule::Allow;
            permission.webfetch = Rule::Allow;
            permission.websearch = Rule::Allow;
            permission.external_directory = Rule::Allow;
            permission.bash = BashRule::Simple(Rule::Allow);
            permission.network = BashRule::Simple(Rule::Allow);
            Some(AgentConfig {
                permission: Some(permission),
                ..Default::default()
            })
        }
        "readonly" => {
            let mut tools = HashMap::new();
            tools.insert("bash".to_string(), false);
            tools.insert("task".to_string(), false);
            tools.insert("todo_write".to_string(), false);
            let mut permission = PermissionConfig::default();
            permission.edit = Rule::Deny;
            permission.write = Rule::Deny;
            permission.bash = BashRule::Simple(Rule::Deny);
            Some(AgentConfig {
                tools,
                permission: Some(permission),
                ..Default::default()
            })
        }
        "readwrite" => {
            let mut permission = PermissionConfig::default();
            permission.edit = Rule::Allow;
            permission.write = Rule::Allow;
            Some(AgentConfig {
                permission: Some(permission),
                ..Default::default()
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_expand() {
        let yolo = expand_preset("yolo").unwrap();
        assert_eq!(yolo.permission.unwrap().edit, Rule::Allow);

        let readonly = expand_preset("readonly").unwrap();
        assert_eq!(readonly.tools.get("bash"), Some(&false));

        assert!(expand_preset("custom").is_none());
    }

    #[test]
    fn overlay_wins_on_scalars_merges_tools() {
        let mut base = AgentConfig::default();
        base.tools.insert("bash".into(), true);
        base.model = Some("openai/gpt-4o".into());

        let mut overlay = AgentConfig::default();
        overlay.tools.insert("task".into(), false);
        overlay.temperature = Some(0.3);

        let merged = base.merged_with(&overlay);
        assert_eq!(merged.tools.get("bash"), Some(&true));
        assert_eq!(merged.tools.get("task"), Some(&false));
        assert_eq!(merged.model.as_deref(), Some("openai/gpt-4o"));
        assert_eq!(merged.temperature, Some(0.3));
    }

    #[test]
    fn tool_map_precedence_last_wins() {
        let mut defaults = HashMap::new();
        defaults.insert("bash".to_string(), true);
        let mut agent = HashMap::new();
        agent.insert("bash".to_string(), false);
        let mut request = HashMap::new();
        request.insert("bash".to_string(), true);

        let merged = merge_tool_maps(&[&defaults, &agent, &request]);
        assert_eq!(merged.get("bash"), Some(&true));
    }
}
