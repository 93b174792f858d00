//! Provider registry.
//!
//! Maps provider IDs to adapter instances and resolves `provider/model`
//! references. Tests inject scripted providers through [`insert`].
//!
//! [`insert`]: ProviderRegistry::insert

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use sy_domain::config::ProvidersConfig;
use sy_domain::error::{Error, Result};

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::{parse_model, LlmProvider, ModelRef};

#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every configured provider.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        let registry = Self::new();
        for (id, provider_config) in config {
            let provider = OpenAiCompatProvider::from_config(id, provider_config)?;
            registry.insert(Arc::new(provider));
            tracing::info!(provider = %id, "provider registered");
        }
        Ok(registry)
    }

    pub fn insert(&self, provider: Arc<dyn LlmProvider>) {
        self.providers
            .write()
            .insert(provider.provider_id().to_string(), provider);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.read().get(provider_id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    /// Resolve a `provider/model` reference to an adapter + model id.
    pub fn resolve(&self, reference: &str) -> Result<(Arc<dyn LlmProvider>, ModelRef)> {
        let model_ref = parse_model(reference)?;
        let provider = self
            .get(&model_ref.provider_id)
            .ok_or_else(|| Error::Validation(format!(
                "unknown provider `{}`",
                model_ref.provider_id
            )))?;
        Ok((provider, model_ref))
    }
}
