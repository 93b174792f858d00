//! Configuration tree.
//!
//! One file per concern, serde defaults throughout so a missing section
//! or a missing key never fails the load. The file format is TOML; the
//! store persists `always` permission approvals back into the same file.

mod agent;
mod compaction;
mod permission;
mod provider;
mod retry;
mod server;

pub use agent::{expand_preset, merge_tool_maps, AgentConfig, AgentMode};
pub use compaction::CompactionConfig;
pub use permission::{BashRule, PermissionConfig, Rule};
pub use provider::{ModelConfig, ModelPricing, ProviderConfig, ProvidersConfig};
pub use retry::RetryConfig;
pub use server::ServerConfig;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Agent used when a prompt names none.
    #[serde(default = "d_default_agent")]
    pub default_agent: String,
    /// Extra system prompt appended after the agent prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Global permission rules; agents may override per-agent.
    #[serde(default)]
    pub permission: PermissionConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Agent definitions (key = agent name). Built-in presets
    /// (`yolo`, `readonly`, `readwrite`, `default`) are always available
    /// and expanded before these entries are merged on top.
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
}

fn d_default_agent() -> String {
    "default".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_agent: d_default_agent(),
            instructions: None,
            server: ServerConfig::default(),
            providers: ProvidersConfig::default(),
            permission: PermissionConfig::default(),
            compaction: CompactionConfig::default(),
            retry: RetryConfig::default(),
            agents: HashMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("serializing config: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Resolve an agent config by name: built-in preset first, then the
    /// user's `[agents.<name>]` table merged on top.
    pub fn agent(&self, name: &str) -> Option<AgentConfig> {
        let preset = expand_preset(name);
        let user = self.agents.get(name).cloned();
        match (preset, user) {
            (Some(base), Some(overlay)) => Some(base.merged_with(&overlay)),
            (Some(base), None) => Some(base),
            (None, Some(overlay)) => Some(overlay),
            (None, None) => None,
        }
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.providers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "no providers configured; turns will fail until one is added".into(),
            });
        }
        if self.agent(&self.default_agent).is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: format!("default_agent `{}` is not defined", self.default_agent),
            });
        }
        for (name, agent) in &self.agents {
            if let Some(model) = &agent.model {
                if !model.contains('/') {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Warning,
                        message: format!(
                            "agent `{name}`: model `{model}` is not of the form provider/model"
                        ),
                    });
                }
            }
        }
        issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared handle around the loaded config. Mutations go through
/// [`ConfigStore::update`], which persists back to the source file so
/// remembered approvals survive restarts.
pub struct ConfigStore {
    path: PathBuf,
    inner: RwLock<Config>,
}

impl ConfigStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let config = Config::load(&path)?;
        Ok(Self {
            path,
            inner: RwLock::new(config),
        })
    }

    pub fn in_memory(config: Config) -> Self {
        Self {
            path: PathBuf::new(),
            inner: RwLock::new(config),
        }
    }

    pub fn get(&self) -> Config {
        self.inner.read().clone()
    }

    /// Apply a patch and persist. Persistence failures are logged, not
    /// raised; a failed write must never sink the turn that triggered it.
    pub fn update(&self, patch: impl FnOnce(&mut Config)) {
        let snapshot = {
            let mut config = self.inner.write();
            patch(&mut config);
            config.clone()
        };
        if self.path.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = snapshot.save(&self.path) {
            tracing::warn!(error = %e, path = %self.path.display(), "config persist failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_resolves_default_agent() {
        let config = Config::default();
        assert!(config.agent("default").is_some());
        assert!(config.agent("yolo").is_some());
        assert!(config.agent("nope").is_none());
        assert!(config.validate().iter().all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn toml_round_trip_with_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [server]
            port = 5000

            [agents.reviewer]
            model = "openai/gpt-4o"
            mode = "subagent"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.server.port, 5000);
        assert_eq!(parsed.default_agent, "default");
        let reviewer = parsed.agent("reviewer").unwrap();
        assert_eq!(reviewer.model.as_deref(), Some("openai/gpt-4o"));
    }

    #[test]
    fn user_agent_overlays_preset() {
        let parsed: Config = toml::from_str(
            r#"
            [agents.readonly]
            model = "openai/gpt-4o-mini"
            "#,
        )
        .unwrap();
        let agent = parsed.agent("readonly").unwrap();
        // Model comes from the overlay, tool restrictions from the preset.
        assert_eq!(agent.model.as_deref(), Some("openai/gpt-4o-mini"));
        assert_eq!(agent.tools.get("bash"), Some(&false));
    }
}
