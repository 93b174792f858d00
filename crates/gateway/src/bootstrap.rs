//! AppState construction and teardown.
//!
//! One boot path shared by the server and by tests: validate config,
//! wire every subsystem, register the built-in tools. Teardown drains
//! the process-wide state: every pending permission rejected, every
//! lock cancelled.

use std::sync::Arc;

use anyhow::Context;

use sy_domain::config::{ConfigSeverity, ConfigStore};
use sy_providers::ProviderRegistry;
use sy_sessions::{Bus, MessageLog, SessionStore, Storage, TodoStore};

use crate::notify::{LogNotifier, Notifier, StatusTracker};
use crate::pin::PinStore;
use crate::plugin::PluginChain;
use crate::runtime::lock::LockMap;
use crate::runtime::permission::PermissionBroker;
use crate::runtime::tools::ToolRegistry;
use crate::snapshot::Snapshotter;
use crate::state::AppState;
use crate::tools::{AskUserTool, BashTool, TaskTool, TodoWriteTool};

/// Validate config, initialize every subsystem, and return a fully
/// wired [`AppState`].
pub fn build_app_state(
    config_store: Arc<ConfigStore>,
    notifier: Arc<dyn Notifier>,
    plugins: Arc<PluginChain>,
) -> anyhow::Result<AppState> {
    let config = config_store.get();

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Storage & session state ──────────────────────────────────────
    let storage = Arc::new(
        Storage::new(&config.server.data_dir).context("initializing storage root")?,
    );
    let bus = Arc::new(Bus::new());
    let sessions = Arc::new(
        SessionStore::new(storage.clone(), bus.clone()).context("loading session store")?,
    );
    let log = Arc::new(MessageLog::new(storage.clone(), bus.clone()));
    let todos = Arc::new(TodoStore::new(storage.clone(), bus.clone()));

    // ── Runtime ──────────────────────────────────────────────────────
    let locks = Arc::new(LockMap::new(bus.clone()));
    let pin = Arc::new(PinStore::new(&config.server.data_dir));
    let status = Arc::new(StatusTracker::new(notifier));
    let permissions = Arc::new(PermissionBroker::new(
        bus.clone(),
        sessions.clone(),
        config_store.clone(),
        pin.clone(),
        plugins.clone(),
        status.clone(),
    ));

    // ── Collaborators ────────────────────────────────────────────────
    let providers = Arc::new(
        ProviderRegistry::from_config(&config.providers).context("initializing providers")?,
    );
    let workdir = std::env::current_dir().context("resolving working directory")?;
    let snapshot = Arc::new(Snapshotter::new(&workdir));

    let state = AppState {
        config: config_store,
        storage,
        sessions,
        log,
        todos,
        bus,
        locks,
        permissions,
        tools: Arc::new(ToolRegistry::new()),
        providers,
        status,
        pin,
        snapshot,
        plugins,
    };
    register_builtin_tools(&state);
    Ok(state)
}

/// The tools the session core ships with. Front-ends register their own
/// on top.
fn register_builtin_tools(state: &AppState) {
    state
        .tools
        .register(Arc::new(BashTool::new(state.bus.clone())));
    state.tools.register(Arc::new(TaskTool::new(state.clone())));
    state.tools.register(Arc::new(AskUserTool));
    state
        .tools
        .register(Arc::new(TodoWriteTool::new(state.todos.clone())));
}

/// Default boot for the server binary.
pub fn build_default(config_store: Arc<ConfigStore>) -> anyhow::Result<AppState> {
    build_app_state(
        config_store,
        Arc::new(LogNotifier),
        Arc::new(PluginChain::default()),
    )
}

/// Drain process-wide state on shutdown: reject all pending permissions,
/// cancel all outstanding turn locks.
pub fn shutdown(state: &AppState) {
    tracing::info!("draining runtime state");
    state.permissions.shutdown();
    state.locks.shutdown();
}
