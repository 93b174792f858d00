//! Agent and model resolution for one turn.
//!
//! Resolution order for the agent: a staged switch (consumed here) wins
//! over the request's `agent`, which wins over the configured default.
//! Model: request override ← agent config ← first configured provider.

use std::sync::Arc;

use sy_domain::config::{AgentConfig, Config};
use sy_domain::error::{Error, Result};
use sy_domain::ident::Id;
use sy_providers::{LlmProvider, ModelInfo, ModelRef, ProviderRegistry};

use super::lock::LockMap;

/// The agent a turn runs as, with its merged option set.
#[derive(Debug, Clone)]
pub struct ResolvedAgent {
    pub name: String,
    pub config: AgentConfig,
}

pub fn resolve_agent(
    config: &Config,
    locks: &LockMap,
    session_id: &Id,
    requested: Option<&str>,
) -> Result<ResolvedAgent> {
    let name = locks
        .take_pending_switch(session_id)
        .or_else(|| requested.map(str::to_string))
        .unwrap_or_else(|| config.default_agent.clone());

    let agent_config = config
        .agent(&name)
        .ok_or_else(|| Error::AgentNotFound(name.clone()))?;
    if agent_config.disable {
        return Err(Error::AgentNotFound(format!("{name} (disabled)")));
    }
    Ok(ResolvedAgent {
        name,
        config: agent_config,
    })
}

pub struct ResolvedModel {
    pub provider: Arc<dyn LlmProvider>,
    pub model: ModelRef,
    pub info: ModelInfo,
}

pub fn resolve_model(
    config: &Config,
    registry: &ProviderRegistry,
    agent: &ResolvedAgent,
    requested: Option<&str>,
) -> Result<ResolvedModel> {
    let reference = requested
        .map(str::to_string)
        .or_else(|| agent.config.model.clone())
        .or_else(|| default_model(config))
        .ok_or_else(|| Error::Validation("no model configured".to_string()))?;

    let (provider, model) = registry.resolve(&reference)?;
    let info = provider.info(&model.model_id);
    Ok(ResolvedModel {
        provider,
        model,
        info,
    })
}

/// `provider/model` for the first provider that declares a default.
fn default_model(config: &Config) -> Option<String> {
    let mut providers: Vec<_> = config.providers.iter().collect();
    providers.sort_by_key(|(id, _)| id.to_string());
    providers.into_iter().find_map(|(id, p)| {
        p.default_model
            .as_ref()
            .map(|model| format!("{id}/{model}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sy_domain::config::ProviderConfig;
    use sy_sessions::Bus;

    #[test]
    fn staged_switch_wins_and_is_consumed() {
        let config = Config::default();
        let locks = LockMap::new(Arc::new(Bus::new()));
        let session = Id::session();

        locks.request_graceful_switch(&session, "yolo");
        let agent = resolve_agent(&config, &locks, &session, Some("readonly")).unwrap();
        assert_eq!(agent.name, "yolo");

        // Consumed: the next resolution sees the request again.
        let agent = resolve_agent(&config, &locks, &session, Some("readonly")).unwrap();
        assert_eq!(agent.name, "readonly");
    }

    #[test]
    fn unknown_agent_errors() {
        let config = Config::default();
        let locks = LockMap::new(Arc::new(Bus::new()));
        let err = resolve_agent(&config, &locks, &Id::session(), Some("ghost")).unwrap_err();
        assert!(matches!(err, Error::AgentNotFound(_)));
    }

    #[test]
    fn default_model_comes_from_first_provider() {
        let mut config = Config::default();
        config.providers.insert(
            "local".to_string(),
            ProviderConfig {
                default_model: Some("llama".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(default_model(&config).as_deref(), Some("local/llama"));
    }
}
