use std::sync::Arc;

use sy_domain::config::ConfigStore;
use sy_providers::ProviderRegistry;
use sy_sessions::{Bus, MessageLog, SessionStore, Storage, TodoStore};

use crate::notify::StatusTracker;
use crate::pin::PinStore;
use crate::plugin::PluginChain;
use crate::runtime::lock::LockMap;
use crate::runtime::permission::PermissionBroker;
use crate::runtime::tools::ToolRegistry;
use crate::snapshot::Snapshotter;

/// Shared application state passed to every API handler and runtime
/// function.
///
/// Fields are grouped by concern:
/// - **Configuration** — config store (also persists approvals)
/// - **Session state** — storage, sessions, message log, todos
/// - **Runtime** — event bus, lock map, permission broker, tool registry
/// - **Collaborators** — providers, status tracker, PIN store, snapshot,
///   plugin chain
#[derive(Clone)]
pub struct AppState {
    // ── Configuration ─────────────────────────────────────────────────
    pub config: Arc<ConfigStore>,

    // ── Session state ─────────────────────────────────────────────────
    pub storage: Arc<Storage>,
    pub sessions: Arc<SessionStore>,
    pub log: Arc<MessageLog>,
    pub todos: Arc<TodoStore>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub bus: Arc<Bus>,
    pub locks: Arc<LockMap>,
    pub permissions: Arc<PermissionBroker>,
    pub tools: Arc<ToolRegistry>,

    // ── Collaborators ─────────────────────────────────────────────────
    pub providers: Arc<ProviderRegistry>,
    pub status: Arc<StatusTracker>,
    pub pin: Arc<PinStore>,
    pub snapshot: Arc<Snapshotter>,
    pub plugins: Arc<PluginChain>,
}
