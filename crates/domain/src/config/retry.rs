use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry / backoff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Policy for transient provider failures: exponential backoff with
/// jitter, bounded by a wall-clock budget and any server retry-after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per provider step (compaction uses the same).
    #[serde(default = "d_max_retries")]
    pub chat_max_retries: u32,
    /// First-attempt delay in milliseconds.
    #[serde(default = "d_base_delay")]
    pub base_delay_ms: u64,
    /// Per-sleep ceiling in milliseconds.
    #[serde(default = "d_max_delay")]
    pub max_delay_ms: u64,
    /// Total wall-clock budget across all attempts of one step.
    #[serde(default = "d_budget")]
    pub budget_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            chat_max_retries: d_max_retries(),
            base_delay_ms: d_base_delay(),
            max_delay_ms: d_max_delay(),
            budget_ms: d_budget(),
        }
    }
}

fn d_max_retries() -> u32 {
    10
}
fn d_base_delay() -> u64 {
    1_000
}
fn d_max_delay() -> u64 {
    30_000
}
fn d_budget() -> u64 {
    300_000
}
