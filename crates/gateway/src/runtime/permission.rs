//! The permission broker.
//!
//! Gates sensitive tool effects behind operator approval. A request is
//! auto-resolved when configuration rules or remembered approvals cover
//! its keys; otherwise it parks in the pending table (and, for child
//! sessions, as a forwarded twin under the parent keyed by the same
//! permission ID) until `respond` fires the shared resolver.
//!
//! Ordering contract: `permission.updated` is published before the
//! caller suspends, `permission.replied` before the resolver resumes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use sy_domain::config::{ConfigStore, Rule};
use sy_domain::error::{Error, Rejected, Result};
use sy_domain::ident::Id;
use sy_domain::permission::{
    keys_covered, to_keys, Decision, Permission, PermissionResponse, PermissionTime, ReplyExtras,
};
use sy_domain::tool::{AskRequest, PermissionGate};
use sy_sessions::bus::{Bus, BusEvent};
use sy_sessions::store::SessionStore;

use crate::notify::StatusTracker;
use crate::pin::PinStore;
use crate::plugin::{HookDecision, PluginChain};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One-shot resolver shared between a pending entry and its forwarded
/// twin; whichever side responds first consumes it.
type SharedResolver = Arc<Mutex<Option<oneshot::Sender<Result<Value>>>>>;

struct PendingEntry {
    info: Permission,
    keys: Vec<String>,
    resolver: SharedResolver,
    /// Set on a parent-side twin: the child session the request came from.
    origin: Option<Id>,
    /// Set on the child-side entry: the parent holding the twin.
    forwarded_to: Option<Id>,
}

#[derive(Default)]
struct BrokerState {
    /// session -> permission id -> entry, in arrival order.
    pending: HashMap<Id, BTreeMap<Id, PendingEntry>>,
    /// session -> approved pattern keys.
    approved: HashMap<Id, HashSet<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PermissionBroker {
    bus: Arc<Bus>,
    sessions: Arc<SessionStore>,
    config: Arc<ConfigStore>,
    pin: Arc<PinStore>,
    plugins: Arc<PluginChain>,
    status: Arc<StatusTracker>,
    state: Mutex<BrokerState>,
}

impl PermissionBroker {
    pub fn new(
        bus: Arc<Bus>,
        sessions: Arc<SessionStore>,
        config: Arc<ConfigStore>,
        pin: Arc<PinStore>,
        plugins: Arc<PluginChain>,
        status: Arc<StatusTracker>,
    ) -> Self {
        Self {
            bus,
            sessions,
            config,
            pin,
            plugins,
            status,
            state: Mutex::new(BrokerState::default()),
        }
    }

    // ── ask ──────────────────────────────────────────────────────────

    pub async fn ask_inner(&self, req: AskRequest) -> Result<Value> {
        let keys = to_keys(&req.patterns, req.kind);

        // 1. Configuration rules (agent overrides first, then global): a
        //    deny on any key rejects outright; allow on every key
        //    resolves silently.
        let config = self.config.get();
        let rules = config
            .agent(&req.agent)
            .and_then(|agent| agent.permission)
            .unwrap_or_else(|| config.permission.clone());
        let mut all_allowed = true;
        for key in &keys {
            match rules.rule_for(req.kind, key) {
                Rule::Deny => {
                    return Err(self.rejected(
                        &req,
                        Some(format!("`{key}` is denied by configuration")),
                    ));
                }
                Rule::Allow => {}
                Rule::Ask => all_allowed = false,
            }
        }
        if all_allowed {
            return Ok(Value::Null);
        }

        // 2. Remembered approvals for this session.
        if self.covered(&req.session_id, &keys) {
            return Ok(Value::Null);
        }

        // 3. Parent coverage (read-through); cache the hit into the
        //    child's approved set.
        let parent_id = self.sessions.parent_of(&req.session_id);
        if let Some(parent_id) = &parent_id {
            if self.covered(parent_id, &keys) {
                self.approve_keys(&req.session_id, &keys);
                return Ok(Value::Null);
            }
        }

        // 4. Plugin hook may settle the question without an operator.
        let permission = Permission {
            id: Id::permission(),
            kind: req.kind,
            patterns: req.patterns.clone(),
            session_id: req.session_id.clone(),
            message_id: req.message_id.clone(),
            call_id: req.call_id.clone(),
            title: req.title.clone(),
            metadata: req.metadata.clone(),
            time: PermissionTime { created: Utc::now() },
        };
        let hook_payload = serde_json::to_value(&permission).unwrap_or(Value::Null);
        match self.plugins.trigger("permission.ask", &hook_payload).await {
            HookDecision::Deny => {
                return Err(self.rejected(&req, Some("denied by plugin".to_string())));
            }
            HookDecision::Allow => return Ok(Value::Null),
            HookDecision::Ask => {}
        }

        // 5. Register pending (and the forwarded twin), publish, suspend.
        let (tx, rx) = oneshot::channel();
        let resolver: SharedResolver = Arc::new(Mutex::new(Some(tx)));
        {
            let mut state = self.state.lock();
            state.pending.entry(req.session_id.clone()).or_default().insert(
                permission.id.clone(),
                PendingEntry {
                    info: permission.clone(),
                    keys: keys.clone(),
                    resolver: resolver.clone(),
                    origin: None,
                    forwarded_to: parent_id.clone(),
                },
            );
        }
        self.bus.publish(BusEvent::PermissionUpdated {
            permission: permission.clone(),
        });

        if let Some(parent_id) = &parent_id {
            let mut twin = permission.clone();
            twin.session_id = parent_id.clone();
            let origin_title = self
                .sessions
                .get(&req.session_id)
                .map(|s| s.title)
                .unwrap_or_default();
            merge_metadata(
                &mut twin.metadata,
                &[
                    ("origin_session_id", Value::String(req.session_id.to_string())),
                    ("origin_session_title", Value::String(origin_title)),
                ],
            );
            {
                let mut state = self.state.lock();
                state.pending.entry(parent_id.clone()).or_default().insert(
                    twin.id.clone(),
                    PendingEntry {
                        info: twin.clone(),
                        keys: keys.clone(),
                        resolver: resolver.clone(),
                        origin: Some(req.session_id.clone()),
                        forwarded_to: None,
                    },
                );
            }
            self.bus
                .publish(BusEvent::PermissionUpdated { permission: twin });
        }

        self.status.blocked(&req.title);

        let outcome = rx.await.unwrap_or_else(|_| {
            // Resolver dropped without a response: broker teardown.
            Err(self.rejected(&req, None))
        });
        self.status.unblocked();
        outcome
    }

    // ── respond ──────────────────────────────────────────────────────

    /// Resolve a pending permission. Unknown IDs are a no-op (`false`).
    pub fn respond(
        &self,
        session_id: &Id,
        permission_id: &Id,
        response: &PermissionResponse,
    ) -> Result<bool> {
        let decision = response.decision();
        let extras = response.extras();

        // PIN verification happens before the entry is consumed so a
        // failure can still reject the caller with the fixed message.
        if let Decision::Pin(pin) = &decision {
            let entry = self.take_entry(session_id, permission_id);
            let Some(entry) = entry else {
                return Ok(false);
            };
            let reply = if self.pin.verify(pin) {
                Ok(entry.info.metadata.clone())
            } else {
                Err(Error::PermissionRejected(Rejected {
                    session_id: session_id.to_string(),
                    permission_id: permission_id.to_string(),
                    call_id: entry.info.call_id.clone(),
                    metadata: entry.info.metadata.clone(),
                    message: Some("Invalid PIN".to_string()),
                }))
            };
            self.publish_replied(&entry, session_id, "pin");
            Self::resolve(&entry, reply);
            return Ok(true);
        }

        let Some(mut entry) = self.take_entry(session_id, permission_id) else {
            return Ok(false);
        };

        // Object responses carry metadata for the asker.
        apply_extras(&mut entry.info.metadata, &extras);

        match decision {
            Decision::Reject => {
                self.publish_replied(&entry, session_id, "reject");
                let rejected = Rejected {
                    session_id: session_id.to_string(),
                    permission_id: permission_id.to_string(),
                    call_id: entry.info.call_id.clone(),
                    metadata: entry.info.metadata.clone(),
                    message: extras.message.clone(),
                };
                Self::resolve(&entry, Err(Error::PermissionRejected(rejected)));
            }
            Decision::Once => {
                self.publish_replied(&entry, session_id, "once");
                let metadata = entry.info.metadata.clone();
                Self::resolve(&entry, Ok(metadata));
            }
            Decision::Always => {
                self.approve_keys(session_id, &entry.keys);
                if let Some(origin) = &entry.origin {
                    self.approve_keys(origin, &entry.keys);
                }
                let kind = entry.info.kind;
                let keys = entry.keys.clone();
                self.config
                    .update(|config| config.permission.record_always(kind, &keys));

                self.publish_replied(&entry, session_id, "always");
                let metadata = entry.info.metadata.clone();
                Self::resolve(&entry, Ok(metadata));
                self.cascade(session_id);
            }
            Decision::Pin(_) => unreachable!("handled above"),
        }
        Ok(true)
    }

    /// Auto-respond pending entries whose keys the session now covers.
    /// The pending set is snapshotted first so resolution cannot skip or
    /// double-visit entries.
    fn cascade(&self, session_id: &Id) {
        let covered_ids: Vec<Id> = {
            let state = self.state.lock();
            let approved = state.approved.get(session_id);
            state
                .pending
                .get(session_id)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|(_, entry)| {
                            approved
                                .map(|set| keys_covered(set, &entry.keys))
                                .unwrap_or(false)
                        })
                        .map(|(id, _)| id.clone())
                        .collect()
                })
                .unwrap_or_default()
        };
        for id in covered_ids {
            if let Some(entry) = self.take_entry(session_id, &id) {
                self.publish_replied(&entry, session_id, "once");
                let metadata = entry.info.metadata.clone();
                Self::resolve(&entry, Ok(metadata));
            }
        }
    }

    // ── teardown ─────────────────────────────────────────────────────

    /// Reject everything pending for one session (session removal, abort
    /// teardown).
    pub fn reject_session(&self, session_id: &Id) {
        let ids: Vec<Id> = {
            let state = self.state.lock();
            state
                .pending
                .get(session_id)
                .map(|entries| entries.keys().cloned().collect())
                .unwrap_or_default()
        };
        for id in ids {
            if let Some(entry) = self.take_entry(session_id, &id) {
                let rejected = Rejected {
                    session_id: session_id.to_string(),
                    permission_id: id.to_string(),
                    call_id: entry.info.call_id.clone(),
                    metadata: entry.info.metadata.clone(),
                    message: None,
                };
                Self::resolve(&entry, Err(Error::PermissionRejected(rejected)));
            }
        }
    }

    /// Process shutdown: reject every pending permission everywhere.
    pub fn shutdown(&self) {
        let sessions: Vec<Id> = self.state.lock().pending.keys().cloned().collect();
        for session_id in sessions {
            self.reject_session(&session_id);
        }
    }

    /// Pending permissions for a session, in arrival order.
    pub fn pending(&self, session_id: &Id) -> Vec<Permission> {
        self.state
            .lock()
            .pending
            .get(session_id)
            .map(|entries| entries.values().map(|e| e.info.clone()).collect())
            .unwrap_or_default()
    }

    // ── internals ────────────────────────────────────────────────────

    fn covered(&self, session_id: &Id, keys: &[String]) -> bool {
        let state = self.state.lock();
        state
            .approved
            .get(session_id)
            .map(|set| keys_covered(set, keys))
            .unwrap_or(false)
    }

    fn approve_keys(&self, session_id: &Id, keys: &[String]) {
        let mut state = self.state.lock();
        let set = state.approved.entry(session_id.clone()).or_default();
        for key in keys {
            set.insert(key.clone());
        }
    }

    /// Remove the entry and its twin from the pending tables. The twin's
    /// metadata is mirrored from the surviving entry before deletion.
    fn take_entry(&self, session_id: &Id, permission_id: &Id) -> Option<PendingEntry> {
        let mut state = self.state.lock();
        let entry = state
            .pending
            .get_mut(session_id)
            .and_then(|entries| entries.remove(permission_id))?;

        let twin_session = entry.origin.clone().or_else(|| entry.forwarded_to.clone());
        if let Some(twin_session) = twin_session {
            if let Some(entries) = state.pending.get_mut(&twin_session) {
                entries.remove(permission_id);
            }
        }
        Some(entry)
    }

    fn publish_replied(&self, entry: &PendingEntry, session_id: &Id, response: &str) {
        self.bus.publish(BusEvent::PermissionReplied {
            session_id: session_id.clone(),
            permission_id: entry.info.id.clone(),
            response: response.to_string(),
        });
        // The mirrored side observes the reply too.
        if let Some(twin_session) = entry.origin.as_ref().or(entry.forwarded_to.as_ref()) {
            self.bus.publish(BusEvent::PermissionReplied {
                session_id: twin_session.clone(),
                permission_id: entry.info.id.clone(),
                response: response.to_string(),
            });
        }
    }

    fn resolve(entry: &PendingEntry, outcome: Result<Value>) {
        if let Some(tx) = entry.resolver.lock().take() {
            let _ = tx.send(outcome);
        }
    }

    fn rejected(&self, req: &AskRequest, message: Option<String>) -> Error {
        Error::PermissionRejected(Rejected {
            session_id: req.session_id.to_string(),
            permission_id: String::new(),
            call_id: req.call_id.clone(),
            metadata: req.metadata.clone(),
            message,
        })
    }
}

#[async_trait::async_trait]
impl PermissionGate for PermissionBroker {
    async fn ask(&self, req: AskRequest) -> Result<Value> {
        self.ask_inner(req).await
    }
}

fn merge_metadata(metadata: &mut Value, fields: &[(&str, Value)]) {
    if !metadata.is_object() {
        *metadata = Value::Object(Default::default());
    }
    if let Some(map) = metadata.as_object_mut() {
        for (key, value) in fields {
            map.insert((*key).to_string(), value.clone());
        }
    }
}

fn apply_extras(metadata: &mut Value, extras: &ReplyExtras) {
    let mut fields: Vec<(&str, Value)> = Vec::new();
    if let Some(message) = &extras.message {
        fields.push(("user_message", Value::String(message.clone())));
    }
    if let Some(answers) = &extras.answers {
        fields.push((
            "answers",
            Value::Array(answers.iter().cloned().map(Value::String).collect()),
        ));
    }
    if let Some(agent) = &extras.agent {
        fields.push(("selected_agent", Value::String(agent.clone())));
    }
    if !fields.is_empty() {
        merge_metadata(metadata, &fields);
    }
}
