use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::permission::PermissionKind;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permission rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Rule {
    Allow,
    #[default]
    Ask,
    Deny,
}

/// `bash`/`network` accept either a blanket rule or a pattern map
/// (`{ "git *" = "allow", "*" = "ask" }`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BashRule {
    Simple(Rule),
    Patterns(BTreeMap<String, Rule>),
}

impl Default for BashRule {
    fn default() -> Self {
        BashRule::Simple(Rule::Ask)
    }
}

impl BashRule {
    /// The rule applying to a concrete key. The longest matching pattern
    /// wins, so `"git *" = "allow"` beats `"*" = "ask"`. Falls back to
    /// `Ask` when nothing matches.
    pub fn rule_for(&self, key: &str) -> Rule {
        match self {
            BashRule::Simple(rule) => *rule,
            BashRule::Patterns(map) => map
                .iter()
                .filter(|(pattern, _)| crate::permission::pattern_matches(pattern, key))
                .max_by_key(|(pattern, _)| pattern.len())
                .map(|(_, rule)| *rule)
                .unwrap_or(Rule::Ask),
        }
    }

    /// Record a remembered approval for `key`.
    pub fn allow(&mut self, key: &str) {
        match self {
            BashRule::Simple(rule) if *rule == Rule::Allow => {}
            BashRule::Simple(_) => {
                let mut map = BTreeMap::new();
                map.insert(key.to_string(), Rule::Allow);
                *self = BashRule::Patterns(map);
            }
            BashRule::Patterns(map) => {
                map.insert(key.to_string(), Rule::Allow);
            }
        }
    }

    /// Pattern keys currently recorded as allowed.
    pub fn allowed_patterns(&self) -> Vec<String> {
        match self {
            BashRule::Simple(Rule::Allow) => vec!["*".to_string()],
            BashRule::Simple(_) => Vec::new(),
            BashRule::Patterns(map) => map
                .iter()
                .filter(|(_, rule)| **rule == Rule::Allow)
                .map(|(pattern, _)| pattern.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PermissionConfig {
    #[serde(default)]
    pub edit: Rule,
    #[serde(default)]
    pub write: Rule,
    #[serde(default)]
    pub webfetch: Rule,
    #[serde(default)]
    pub websearch: Rule,
    #[serde(default)]
    pub external_directory: Rule,
    #[serde(default)]
    pub bash: BashRule,
    #[serde(default)]
    pub network: BashRule,
}

impl PermissionConfig {
    pub fn rule_for(&self, kind: PermissionKind, key: &str) -> Rule {
        match kind {
            PermissionKind::Edit => self.edit,
            PermissionKind::Write => self.write,
            PermissionKind::Webfetch => self.webfetch,
            PermissionKind::Websearch => self.websearch,
            PermissionKind::ExternalDirectory => self.external_directory,
            PermissionKind::Bash => self.bash.rule_for(key),
            PermissionKind::Network => self.network.rule_for(key),
            // Interactive kinds are always asked.
            PermissionKind::AskUser | PermissionKind::ExitPlanMode | PermissionKind::Pin => {
                Rule::Ask
            }
        }
    }

    /// Persist an `always` response: blanket kinds collapse to `allow`,
    /// pattern kinds record each approved key.
    pub fn record_always(&mut self, kind: PermissionKind, keys: &[String]) {
        match kind {
            PermissionKind::Edit => self.edit = Rule::Allow,
            PermissionKind::Write => self.write = Rule::Allow,
            PermissionKind::Webfetch => self.webfetch = Rule::Allow,
            PermissionKind::Websearch => self.websearch = Rule::Allow,
            PermissionKind::ExternalDirectory => self.external_directory = Rule::Allow,
            PermissionKind::Bash => {
                for key in keys {
                    self.bash.allow(key);
                }
            }
            PermissionKind::Network => {
                for key in keys {
                    self.network.allow(key);
                }
            }
            PermissionKind::AskUser | PermissionKind::ExitPlanMode | PermissionKind::Pin => {}
        }
    }

    /// Keys pre-approved by configuration, used to seed a session's
    /// approved set.
    pub fn seeded_approvals(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if self.edit == Rule::Allow {
            keys.push("edit".to_string());
        }
        if self.write == Rule::Allow {
            keys.push("write".to_string());
        }
        if self.webfetch == Rule::Allow {
            keys.push("webfetch".to_string());
        }
        if self.websearch == Rule::Allow {
            keys.push("websearch".to_string());
        }
        if self.external_directory == Rule::Allow {
            keys.push("external-directory".to_string());
        }
        keys.extend(self.bash.allowed_patterns());
        keys.extend(self.network.allowed_patterns());
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_pattern_map_lookup() {
        let rule: BashRule =
            serde_json::from_str(r#"{ "git *": "allow", "*": "ask" }"#).unwrap();
        assert_eq!(rule.rule_for("git status"), Rule::Allow);
        assert_eq!(rule.rule_for("rm -rf /"), Rule::Ask);
    }

    #[test]
    fn bash_simple_rule() {
        let rule: BashRule = serde_json::from_str(r#""deny""#).unwrap();
        assert_eq!(rule.rule_for("anything"), Rule::Deny);
    }

    #[test]
    fn record_always_collapses_blanket_kinds() {
        let mut config = PermissionConfig::default();
        config.record_always(PermissionKind::Edit, &["edit".to_string()]);
        assert_eq!(config.edit, Rule::Allow);

        config.record_always(PermissionKind::Bash, &["echo hi".to_string()]);
        assert_eq!(config.bash.rule_for("echo hi"), Rule::Allow);
        assert_eq!(config.bash.rule_for("curl x"), Rule::Ask);
    }

    #[test]
    fn seeded_approvals_reflect_allows() {
        let mut config = PermissionConfig::default();
        config.edit = Rule::Allow;
        config.bash.allow("echo *");
        let seeds = config.seeded_approvals();
        assert!(seeds.contains(&"edit".to_string()));
        assert!(seeds.contains(&"echo *".to_string()));
    }

    #[test]
    fn toml_shape_matches_wire() {
        #[derive(serde::Deserialize)]
        struct Wrap {
            permission: PermissionConfig,
        }
        let parsed: Wrap = toml::from_str(
            r#"
            [permission]
            edit = "allow"

            [permission.bash]
            "echo *" = "allow"
            "*" = "ask"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.permission.edit, Rule::Allow);
        assert_eq!(parsed.permission.bash.rule_for("echo hi"), Rule::Allow);
    }
}
