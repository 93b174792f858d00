use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `provider id -> provider` table. Model references everywhere are
/// `provider/model` strings resolved against this table.
pub type ProvidersConfig = HashMap<String, ProviderConfig>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    /// OpenAI-compatible chat completions endpoint base URL.
    #[serde(default)]
    pub base_url: String,
    /// Literal API key; `api_key_env` wins when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable to read the key from at boot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Model used when a reference names only the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "d_context_limit")]
    pub context_limit: u64,
    #[serde(default = "d_output_limit")]
    pub output_limit: u64,
    #[serde(default = "d_true")]
    pub tool_call: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<ModelPricing>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            context_limit: d_context_limit(),
            output_limit: d_output_limit(),
            tool_call: true,
            price: None,
        }
    }
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ModelPricing {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_write: f64,
}

impl ModelPricing {
    pub fn cost(&self, tokens: &crate::message::TokenUsage) -> f64 {
        (tokens.input as f64 * self.input
            + tokens.output as f64 * self.output
            + tokens.cache.read as f64 * self.cache_read
            + tokens.cache.write as f64 * self.cache_write)
            / 1_000_000.0
    }
}

fn d_context_limit() -> u64 {
    200_000
}
fn d_output_limit() -> u64 {
    32_000
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CacheUsage, TokenUsage};

    #[test]
    fn pricing_is_per_million() {
        let price = ModelPricing {
            input: 3.0,
            output: 15.0,
            cache_read: 0.3,
            cache_write: 3.75,
        };
        let tokens = TokenUsage {
            input: 1_000_000,
            output: 100_000,
            reasoning: 0,
            cache: CacheUsage {
                read: 0,
                write: 0,
            },
        };
        let cost = price.cost(&tokens);
        assert!((cost - 4.5).abs() < 1e-9);
    }
}
