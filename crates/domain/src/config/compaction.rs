use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compaction keeps the provider request under the model's usable
/// context: old history is summarized into an anchor message and stale
/// tool outputs are pruned out of future assemblies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Enable automatic compaction when the overflow predicate trips at
    /// a step boundary. The `AUTOCOMPACT_OFF` env var force-disables.
    #[serde(default = "d_true")]
    pub auto: bool,
    /// Ceiling on the output reservation subtracted from the context
    /// window, regardless of what the model advertises.
    #[serde(default = "d_output_token_max")]
    pub output_token_max: u64,
    /// Most recent tool-output tokens protected from pruning.
    #[serde(default = "d_prune_protect")]
    pub prune_protect_tokens: u64,
    /// Pruning is skipped entirely below this much excess.
    #[serde(default = "d_prune_minimum")]
    pub prune_minimum_tokens: u64,
    /// Most recent user turns whose tool outputs are never pruned.
    #[serde(default = "d_protect_turns")]
    pub protect_user_turns: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            output_token_max: d_output_token_max(),
            prune_protect_tokens: d_prune_protect(),
            prune_minimum_tokens: d_prune_minimum(),
            protect_user_turns: d_protect_turns(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_output_token_max() -> u64 {
    32_000
}
fn d_prune_protect() -> u64 {
    40_000
}
fn d_prune_minimum() -> u64 {
    20_000
}
fn d_protect_turns() -> usize {
    2
}
