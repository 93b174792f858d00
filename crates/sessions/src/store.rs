//! The session store.
//!
//! Owns session records for the process lifetime: create/get/list/remove,
//! parent links for child sessions, the compacting timestamp, and title
//! derivation from the first user text. Every mutation persists and
//! publishes `session.updated`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use sy_domain::error::{Error, Result};
use sy_domain::ident::Id;
use sy_domain::message::{Session, SessionSource};

use crate::bus::{Bus, BusEvent};
use crate::storage::Storage;

#[derive(Debug, Clone, Default)]
pub struct CreateSession {
    pub title: Option<String>,
    pub parent_id: Option<Id>,
    pub container_profile: Option<String>,
    pub source: SessionSource,
}

pub struct SessionStore {
    storage: Arc<Storage>,
    bus: Arc<Bus>,
    sessions: RwLock<HashMap<Id, Session>>,
}

impl SessionStore {
    /// Load every persisted session into memory.
    pub fn new(storage: Arc<Storage>, bus: Arc<Bus>) -> Result<Self> {
        let mut sessions = HashMap::new();
        for stem in storage.list(&["session"])? {
            if let Some(session) = storage.read::<Session>(&["session", stem.as_str()])? {
                sessions.insert(session.id.clone(), session);
            }
        }
        tracing::info!(sessions = sessions.len(), "session store loaded");
        Ok(Self {
            storage,
            bus,
            sessions: RwLock::new(sessions),
        })
    }

    pub fn create(&self, input: CreateSession) -> Result<Session> {
        if let Some(parent_id) = &input.parent_id {
            if !self.sessions.read().contains_key(parent_id) {
                return Err(Error::SessionNotFound(parent_id.to_string()));
            }
        }

        let mut session = Session::new(
            input.title.unwrap_or_else(|| "untitled".to_string()),
            input.source,
        );
        session.parent_id = input.parent_id;
        session.container_profile = input.container_profile;

        self.persist(&session)?;
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        self.bus.publish(BusEvent::SessionUpdated {
            session: session.clone(),
        });
        Ok(session)
    }

    pub fn get(&self, id: &Id) -> Result<Session> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn parent_of(&self, id: &Id) -> Option<Id> {
        self.sessions.read().get(id).and_then(|s| s.parent_id.clone())
    }

    /// All sessions, newest first.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| b.id.cmp(&a.id));
        sessions
    }

    pub fn remove(&self, id: &Id) -> Result<()> {
        if self.sessions.write().remove(id).is_none() {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        self.storage.remove(&["session", id.as_str()])?;
        self.storage.remove_tree(&["message", id.as_str()])?;
        self.storage.remove_tree(&["part", id.as_str()])?;
        self.storage.remove(&["plan", id.as_str()])?;
        self.storage.remove(&["session_diff", id.as_str()])?;
        Ok(())
    }

    /// Apply a mutation, bump `time.updated`, persist, publish.
    pub fn update(&self, id: &Id, f: impl FnOnce(&mut Session)) -> Result<Session> {
        let session = {
            let mut sessions = self.sessions.write();
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
            f(session);
            session.time.updated = Utc::now();
            session.clone()
        };
        self.persist(&session)?;
        self.bus.publish(BusEvent::SessionUpdated {
            session: session.clone(),
        });
        Ok(session)
    }

    pub fn set_compacting(&self, id: &Id, at: Option<DateTime<Utc>>) -> Result<Session> {
        self.update(id, |s| s.time.compacting = at)
    }

    /// Derive a title from the first user text when none was given.
    pub fn set_title_from_text(&self, id: &Id, text: &str) {
        let needs_title = self
            .sessions
            .read()
            .get(id)
            .map(|s| s.title == "untitled")
            .unwrap_or(false);
        if !needs_title {
            return;
        }
        let title: String = text.chars().take(80).collect();
        let title = title.lines().next().unwrap_or("untitled").to_string();
        if title.trim().is_empty() {
            return;
        }
        if let Err(e) = self.update(id, |s| s.title = title) {
            tracing::warn!(error = %e, "title derivation failed");
        }
    }

    fn persist(&self, session: &Session) -> Result<()> {
        self.storage
            .write(&["session", session.id.as_str()], session)
    }
}
