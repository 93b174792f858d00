//! The message/part log.
//!
//! Append-ordered records per session: messages keyed by message ID,
//! parts keyed by part ID within their message. IDs are time-sortable,
//! so a BTreeMap walk is arrival order. Every upsert persists before it
//! publishes, so by the time a turn claims terminal state its records are
//! on disk.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use sy_domain::error::Result;
use sy_domain::ident::Id;
use sy_domain::message::{Message, MessageWithParts, Part};

use crate::bus::{Bus, BusEvent};
use crate::storage::Storage;

#[derive(Default)]
struct SessionLog {
    messages: BTreeMap<Id, Message>,
    parts: BTreeMap<Id, BTreeMap<Id, Part>>,
}

pub struct MessageLog {
    storage: Arc<Storage>,
    bus: Arc<Bus>,
    index: RwLock<HashMap<Id, SessionLog>>,
}

impl MessageLog {
    pub fn new(storage: Arc<Storage>, bus: Arc<Bus>) -> Self {
        Self {
            storage,
            bus,
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Upsert a message, persist it, publish `message.updated`.
    pub fn update_message(&self, message: Message) -> Result<()> {
        let session_id = message.session_id().clone();
        self.ensure_loaded(&session_id)?;
        self.storage.write(
            &[
                "message",
                session_id.as_str(),
                message.id().as_str(),
            ],
            &message,
        )?;
        self.index
            .write()
            .entry(session_id)
            .or_default()
            .messages
            .insert(message.id().clone(), message.clone());
        self.bus.publish(BusEvent::MessageUpdated { message });
        Ok(())
    }

    /// Upsert a part, persist it, publish `message.part.updated` with the
    /// advisory text delta.
    pub fn update_part(&self, part: Part, delta: Option<String>) -> Result<()> {
        self.ensure_loaded(&part.session_id)?;
        self.storage.write(
            &[
                "part",
                part.session_id.as_str(),
                part.message_id.as_str(),
                part.id.as_str(),
            ],
            &part,
        )?;
        self.index
            .write()
            .entry(part.session_id.clone())
            .or_default()
            .parts
            .entry(part.message_id.clone())
            .or_default()
            .insert(part.id.clone(), part.clone());
        self.bus.publish(BusEvent::MessagePartUpdated { part, delta });
        Ok(())
    }

    /// Upsert a part without publishing. Used on the abort path, where
    /// terminal part states are still persisted but no
    /// `message.part.updated` may follow `session.aborted`.
    pub fn update_part_quiet(&self, part: Part) -> Result<()> {
        self.ensure_loaded(&part.session_id)?;
        self.storage.write(
            &[
                "part",
                part.session_id.as_str(),
                part.message_id.as_str(),
                part.id.as_str(),
            ],
            &part,
        )?;
        self.index
            .write()
            .entry(part.session_id.clone())
            .or_default()
            .parts
            .entry(part.message_id.clone())
            .or_default()
            .insert(part.id.clone(), part);
        Ok(())
    }

    pub fn message(&self, session_id: &Id, message_id: &Id) -> Option<Message> {
        self.ensure_loaded(session_id).ok()?;
        self.index
            .read()
            .get(session_id)?
            .messages
            .get(message_id)
            .cloned()
    }

    /// Ordered parts of one message.
    pub fn parts(&self, session_id: &Id, message_id: &Id) -> Vec<Part> {
        if self.ensure_loaded(session_id).is_err() {
            return Vec::new();
        }
        self.index
            .read()
            .get(session_id)
            .and_then(|log| log.parts.get(message_id))
            .map(|parts| parts.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every message with its parts, in ID order.
    pub fn messages(&self, session_id: &Id) -> Vec<MessageWithParts> {
        if self.ensure_loaded(session_id).is_err() {
            return Vec::new();
        }
        let index = self.index.read();
        let Some(log) = index.get(session_id) else {
            return Vec::new();
        };
        log.messages
            .values()
            .map(|message| MessageWithParts {
                message: message.clone(),
                parts: log
                    .parts
                    .get(message.id())
                    .map(|parts| parts.values().cloned().collect())
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Snapshot iterator over the current log state, in order. Finite;
    /// a new call observes later appends, this one does not.
    pub fn stream(&self, session_id: &Id) -> impl Iterator<Item = MessageWithParts> {
        self.messages(session_id).into_iter()
    }

    pub fn remove_session(&self, session_id: &Id) -> Result<()> {
        self.index.write().remove(session_id);
        self.storage.remove_tree(&["message", session_id.as_str()])?;
        self.storage.remove_tree(&["part", session_id.as_str()])?;
        Ok(())
    }

    /// Drop messages at or after `message_id` (the revert operation).
    pub fn truncate_from(&self, session_id: &Id, message_id: &Id) -> Result<()> {
        self.ensure_loaded(session_id)?;
        let removed: Vec<Id> = {
            let mut index = self.index.write();
            let Some(log) = index.get_mut(session_id) else {
                return Ok(());
            };
            let removed: Vec<Id> = log
                .messages
                .range(message_id.clone()..)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &removed {
                log.messages.remove(id);
                log.parts.remove(id);
            }
            removed
        };
        for id in removed {
            self.storage
                .remove(&["message", session_id.as_str(), id.as_str()])?;
            self.storage
                .remove_tree(&["part", session_id.as_str(), id.as_str()])?;
        }
        Ok(())
    }

    fn ensure_loaded(&self, session_id: &Id) -> Result<()> {
        if self.index.read().contains_key(session_id) {
            return Ok(());
        }
        let mut log = SessionLog::default();
        for stem in self.storage.list(&["message", session_id.as_str()])? {
            if let Some(message) = self
                .storage
                .read::<Message>(&["message", session_id.as_str(), stem.as_str()])?
            {
                log.messages.insert(message.id().clone(), message);
            }
        }
        for message_id in self.storage.list_dirs(&["part", session_id.as_str()])? {
            let mut parts = BTreeMap::new();
            for stem in self
                .storage
                .list(&["part", session_id.as_str(), message_id.as_str()])?
            {
                if let Some(part) = self.storage.read::<Part>(&[
                    "part",
                    session_id.as_str(),
                    message_id.as_str(),
                    stem.as_str(),
                ])? {
                    parts.insert(part.id.clone(), part);
                }
            }
            log.parts.insert(Id::from_string(message_id), parts);
        }
        self.index.write().entry(session_id.clone()).or_insert(log);
        Ok(())
    }
}
