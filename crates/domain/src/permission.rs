//! Permission protocol types.
//!
//! A tool that wants a side effect asks the broker for a permission.
//! The broker either auto-resolves from remembered approvals or parks the
//! request until an operator responds. These are the shared types; the
//! state machine itself lives in the gateway runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wildmatch::WildMatch;

use crate::ident::Id;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permission record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionKind {
    Edit,
    Write,
    Bash,
    Webfetch,
    Websearch,
    Network,
    ExternalDirectory,
    AskUser,
    ExitPlanMode,
    Pin,
}

impl PermissionKind {
    pub fn name(&self) -> &'static str {
        match self {
            PermissionKind::Edit => "edit",
            PermissionKind::Write => "write",
            PermissionKind::Bash => "bash",
            PermissionKind::Webfetch => "webfetch",
            PermissionKind::Websearch => "websearch",
            PermissionKind::Network => "network",
            PermissionKind::ExternalDirectory => "external-directory",
            PermissionKind::AskUser => "ask-user",
            PermissionKind::ExitPlanMode => "exit-plan-mode",
            PermissionKind::Pin => "pin",
        }
    }
}

/// A pending user-visible gate. Ephemeral: lives in the broker's pending
/// table, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: Id,
    #[serde(rename = "type")]
    pub kind: PermissionKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    pub session_id: Id,
    pub message_id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub metadata: Value,
    pub time: PermissionTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PermissionTime {
    pub created: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wire shape for a permission response: the bare string literals
/// `"once" | "always" | "reject"` or an object form carrying extras.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionResponse {
    Simple(SimpleResponse),
    Detailed(DetailedResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimpleResponse {
    Once,
    /// Alias accepted from older clients.
    Approve,
    Always,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DetailedResponse {
    Once {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        answers: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    Reject {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Pin {
        pin: String,
    },
}

/// Normalized decision extracted from either wire shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Once,
    Always,
    Reject,
    Pin(String),
}

/// Extra fields an object response may carry; merged into the pending
/// permission's metadata before it resolves.
#[derive(Debug, Clone, Default)]
pub struct ReplyExtras {
    pub message: Option<String>,
    pub answers: Option<Vec<String>>,
    pub agent: Option<String>,
}

impl PermissionResponse {
    pub fn decision(&self) -> Decision {
        match self {
            PermissionResponse::Simple(SimpleResponse::Once)
            | PermissionResponse::Simple(SimpleResponse::Approve)
            | PermissionResponse::Detailed(DetailedResponse::Once { .. }) => Decision::Once,
            PermissionResponse::Simple(SimpleResponse::Always) => Decision::Always,
            PermissionResponse::Simple(SimpleResponse::Reject)
            | PermissionResponse::Detailed(DetailedResponse::Reject { .. }) => Decision::Reject,
            PermissionResponse::Detailed(DetailedResponse::Pin { pin }) => {
                Decision::Pin(pin.clone())
            }
        }
    }

    pub fn extras(&self) -> ReplyExtras {
        match self {
            PermissionResponse::Detailed(DetailedResponse::Once {
                message,
                answers,
                agent,
            }) => ReplyExtras {
                message: message.clone(),
                answers: answers.clone(),
                agent: agent.clone(),
            },
            PermissionResponse::Detailed(DetailedResponse::Reject { message }) => ReplyExtras {
                message: message.clone(),
                ..Default::default()
            },
            _ => ReplyExtras::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keys & coverage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The approval keys for a request: the kind name when no pattern was
/// given, otherwise each pattern verbatim.
pub fn to_keys(patterns: &[String], kind: PermissionKind) -> Vec<String> {
    if patterns.is_empty() {
        vec![kind.name().to_string()]
    } else {
        patterns.to_vec()
    }
}

/// True when `key` is wildcard-matched by `pattern`.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    pattern == key || WildMatch::new(pattern).matches(key)
}

/// A request is covered iff every key is matched by some approved pattern.
pub fn keys_covered<'a, I>(approved: I, keys: &[String]) -> bool
where
    I: IntoIterator<Item = &'a String> + Clone,
{
    keys.iter().all(|key| {
        approved
            .clone()
            .into_iter()
            .any(|pattern| pattern_matches(pattern, key))
    })
}
