//! Per-session todo lists.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use sy_domain::error::Result;
use sy_domain::ident::Id;

use crate::bus::{Bus, BusEvent};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub content: String,
    #[serde(default)]
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: u32,
}

pub struct TodoStore {
    storage: Arc<Storage>,
    bus: Arc<Bus>,
    lists: RwLock<HashMap<Id, Vec<Todo>>>,
}

impl TodoStore {
    pub fn new(storage: Arc<Storage>, bus: Arc<Bus>) -> Self {
        Self {
            storage,
            bus,
            lists: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, session_id: &Id) -> Vec<Todo> {
        if let Some(list) = self.lists.read().get(session_id) {
            return list.clone();
        }
        let loaded: Vec<Todo> = self
            .storage
            .read(&["plan", session_id.as_str()])
            .ok()
            .flatten()
            .unwrap_or_default();
        self.lists
            .write()
            .insert(session_id.clone(), loaded.clone());
        loaded
    }

    pub fn set(&self, session_id: &Id, todos: Vec<Todo>) -> Result<()> {
        self.storage.write(&["plan", session_id.as_str()], &todos)?;
        self.lists.write().insert(session_id.clone(), todos.clone());
        self.bus.publish(BusEvent::TodoUpdated {
            session_id: session_id.clone(),
            todos,
        });
        Ok(())
    }

    /// Todos that still need attention, for the compaction resume context.
    pub fn open(&self, session_id: &Id) -> Vec<Todo> {
        self.get(session_id)
            .into_iter()
            .filter(|t| t.status != TodoStatus::Completed)
            .collect()
    }

    pub fn remove_session(&self, session_id: &Id) -> Result<()> {
        self.lists.write().remove(session_id);
        self.storage.remove(&["plan", session_id.as_str()])
    }
}
