//! Per-session concurrency control.
//!
//! Ensures only one turn (or compaction) runs per session at a time. A
//! second prompt arriving while a turn is in flight fails immediately
//! with `SessionLocked`; callers are expected to abort or wait on the
//! event stream, not queue.
//!
//! Each acquired guard carries the turn's cancellation token. `abort`
//! cancels the token, releases the registration, and publishes
//! `session.aborted`; the guard's disposer publishes `session.completed`
//! only if it is still the registered owner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use sy_domain::error::{Error, Result};
use sy_domain::ident::Id;
use sy_sessions::bus::{Bus, BusEvent};

struct LockEntry {
    owner: u64,
    token: CancellationToken,
}

/// Manages per-session turn locks and pending agent switches.
pub struct LockMap {
    bus: Arc<Bus>,
    locks: Mutex<HashMap<Id, LockEntry>>,
    /// Agent switches staged for the next turn (or the next step, for
    /// graceful switches).
    switches: Mutex<HashMap<Id, String>>,
    next_owner: AtomicU64,
}

impl LockMap {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self {
            bus,
            locks: Mutex::new(HashMap::new()),
            switches: Mutex::new(HashMap::new()),
            next_owner: AtomicU64::new(1),
        }
    }

    /// Acquire the turn lock. Fails with `SessionLocked` when a turn or
    /// compaction already holds it.
    pub fn acquire(self: &Arc<Self>, session_id: &Id) -> Result<TurnGuard> {
        let owner = self.next_owner.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        {
            let mut locks = self.locks.lock();
            if locks.contains_key(session_id) {
                return Err(Error::SessionLocked(session_id.to_string()));
            }
            locks.insert(
                session_id.clone(),
                LockEntry {
                    owner,
                    token: token.clone(),
                },
            );
        }
        Ok(TurnGuard {
            map: self.clone(),
            session_id: session_id.clone(),
            owner,
            token,
        })
    }

    /// Cancel the running turn, release the lock, publish
    /// `session.aborted`. Safe (returns false) when nothing is running.
    pub fn abort(&self, session_id: &Id) -> bool {
        let entry = self.locks.lock().remove(session_id);
        match entry {
            Some(entry) => {
                entry.token.cancel();
                self.bus.publish(BusEvent::SessionAborted {
                    session_id: session_id.clone(),
                });
                true
            }
            None => false,
        }
    }

    /// Abort the current turn and stage an agent switch for the next
    /// prompt.
    pub fn switch_agent(&self, session_id: &Id, agent: &str) {
        self.abort(session_id);
        self.switches
            .lock()
            .insert(session_id.clone(), agent.to_string());
        self.bus.publish(BusEvent::SessionAgentSwitch {
            session_id: session_id.clone(),
            agent: agent.to_string(),
        });
    }

    /// Stage an agent switch without aborting; the runner observes it
    /// between steps.
    pub fn request_graceful_switch(&self, session_id: &Id, agent: &str) {
        self.switches
            .lock()
            .insert(session_id.clone(), agent.to_string());
        self.bus.publish(BusEvent::SessionAgentSwitch {
            session_id: session_id.clone(),
            agent: agent.to_string(),
        });
    }

    /// Consume the staged switch, if any.
    pub fn take_pending_switch(&self, session_id: &Id) -> Option<String> {
        self.switches.lock().remove(session_id)
    }

    /// Peek at the staged switch without consuming it.
    pub fn pending_switch(&self, session_id: &Id) -> Option<String> {
        self.switches.lock().get(session_id).cloned()
    }

    pub fn is_locked(&self, session_id: &Id) -> bool {
        self.locks.lock().contains_key(session_id)
    }

    /// Used by compaction to refuse running concurrently with a turn.
    pub fn assert_unlocked(&self, session_id: &Id) -> Result<()> {
        if self.is_locked(session_id) {
            return Err(Error::SessionLocked(session_id.to_string()));
        }
        Ok(())
    }

    /// Process teardown: cancel every outstanding turn.
    pub fn shutdown(&self) {
        let mut locks = self.locks.lock();
        for (_, entry) in locks.drain() {
            entry.token.cancel();
        }
    }

    fn release_if_owner(&self, session_id: &Id, owner: u64) -> bool {
        let mut locks = self.locks.lock();
        match locks.get(session_id) {
            Some(entry) if entry.owner == owner => {
                locks.remove(session_id);
                true
            }
            _ => false,
        }
    }
}

/// Scoped lock handle for one turn. Dropping it releases the lock and
/// publishes `session.completed`, unless an abort (or a newer owner)
/// already took the registration away.
pub struct TurnGuard {
    map: Arc<LockMap>,
    session_id: Id,
    owner: u64,
    token: CancellationToken,
}

impl TurnGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn session_id(&self) -> &Id {
        &self.session_id
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if self.map.release_if_owner(&self.session_id, self.owner) {
            self.map.bus.publish(BusEvent::SessionCompleted {
                session_id: self.session_id.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> (Arc<LockMap>, Arc<Bus>) {
        let bus = Arc::new(Bus::new());
        (Arc::new(LockMap::new(bus.clone())), bus)
    }

    fn session() -> Id {
        Id::session()
    }

    #[test]
    fn second_acquire_fails_until_release() {
        let (map, _bus) = map();
        let id = session();

        let guard = map.acquire(&id).unwrap();
        assert!(matches!(
            map.acquire(&id),
            Err(Error::SessionLocked(_))
        ));
        drop(guard);
        assert!(map.acquire(&id).is_ok());
    }

    #[test]
    fn different_sessions_are_independent() {
        let (map, _bus) = map();
        let a = session();
        let b = session();
        let _ga = map.acquire(&a).unwrap();
        let _gb = map.acquire(&b).unwrap();
        assert!(map.is_locked(&a));
        assert!(map.is_locked(&b));
    }

    #[test]
    fn drop_publishes_completed() {
        let (map, bus) = map();
        let id = session();
        let mut rx = bus.subscribe();

        drop(map.acquire(&id).unwrap());
        match rx.try_recv().unwrap() {
            BusEvent::SessionCompleted { session_id } => assert_eq!(session_id, id),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn abort_cancels_and_suppresses_completed() {
        let (map, bus) = map();
        let id = session();
        let mut rx = bus.subscribe();

        let guard = map.acquire(&id).unwrap();
        let token = guard.token();
        assert!(map.abort(&id));
        assert!(token.is_cancelled());
        // Lock is released by the abort; a new turn may start.
        assert!(!map.is_locked(&id));

        drop(guard);
        match rx.try_recv().unwrap() {
            BusEvent::SessionAborted { session_id } => assert_eq!(session_id, id),
            other => panic!("unexpected event {other:?}"),
        }
        // No completed after the aborted handle drops.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn abort_without_lock_is_false() {
        let (map, _bus) = map();
        assert!(!map.abort(&session()));
    }

    #[test]
    fn switch_agent_aborts_and_stages() {
        let (map, _bus) = map();
        let id = session();
        let guard = map.acquire(&id).unwrap();
        let token = guard.token();

        map.switch_agent(&id, "plan");
        assert!(token.is_cancelled());
        assert_eq!(map.pending_switch(&id).as_deref(), Some("plan"));
        assert_eq!(map.take_pending_switch(&id).as_deref(), Some("plan"));
        assert!(map.take_pending_switch(&id).is_none());
    }

    #[test]
    fn graceful_switch_does_not_abort() {
        let (map, _bus) = map();
        let id = session();
        let guard = map.acquire(&id).unwrap();

        map.request_graceful_switch(&id, "build");
        assert!(!guard.is_aborted());
        assert_eq!(map.pending_switch(&id).as_deref(), Some("build"));
    }

    #[test]
    fn assert_unlocked() {
        let (map, _bus) = map();
        let id = session();
        assert!(map.assert_unlocked(&id).is_ok());
        let _guard = map.acquire(&id).unwrap();
        assert!(map.assert_unlocked(&id).is_err());
    }

    #[test]
    fn shutdown_cancels_everything() {
        let (map, _bus) = map();
        let a = map.acquire(&session()).unwrap();
        let b = map.acquire(&session()).unwrap();
        map.shutdown();
        assert!(a.is_aborted());
        assert!(b.is_aborted());
    }
}
