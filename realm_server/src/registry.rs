//! Bounded session table.
//!
//! Slots are indexed by [`SessionId`]. Mutation (acquire, release, username
//! claims) takes the write lock; drivers iterate over a snapshot taken under
//! the read lock, so they may observe a session that is being released.

use std::{fmt, sync::Arc};

use parking_lot::RwLock;
use thiserror::Error;

use crate::{
    session::{ConnectionState, Session, SessionId},
    transport::FrameSink,
};

/// Every slot is taken. The write half is handed back so the caller can
/// refuse the connection on it.
#[derive(Error)]
#[error("session registry is full ({capacity} slots)")]
pub struct RegistryFull {
    pub capacity: usize,
    pub sink: Box<dyn FrameSink>,
}

impl fmt::Debug for RegistryFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryFull")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{username} is already logged in")]
pub struct UsernameTaken {
    pub username: String,
}

pub struct SessionRegistry {
    slots: RwLock<Vec<Option<Arc<Session>>>>,
    outbound_capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize, outbound_capacity: usize) -> Self {
        Self {
            slots: RwLock::new(vec![None; capacity]),
            outbound_capacity,
        }
    }

    /// Registers a new session in the first free slot.
    pub fn acquire_slot(&self, sink: Box<dyn FrameSink>) -> Result<Arc<Session>, RegistryFull> {
        let mut slots = self.slots.write();
        let capacity = slots.len();
        let Some(index) = slots.iter().position(Option::is_none) else {
            return Err(RegistryFull { capacity, sink });
        };
        let Ok(id) = u32::try_from(index) else {
            return Err(RegistryFull { capacity, sink });
        };
        let session = Arc::new(Session::new(SessionId(id), sink, self.outbound_capacity));
        slots[index] = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Frees slot `id` unconditionally.
    pub fn release(&self, id: SessionId) -> Option<Arc<Session>> {
        let mut slots = self.slots.write();
        slots.get_mut(id.0 as usize).and_then(Option::take)
    }

    /// Frees the slot only if it still holds `session`.
    pub fn release_if(&self, session: &Arc<Session>) -> bool {
        let mut slots = self.slots.write();
        match slots.get_mut(session.id().0 as usize) {
            Some(slot) if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.slots.read().get(id.0 as usize).cloned().flatten()
    }

    /// Finds the session bound to `username` that has not closed yet.
    pub fn lookup_by_username(&self, username: &str) -> Option<Arc<Session>> {
        self.slots
            .read()
            .iter()
            .flatten()
            .find(|s| s.username() == Some(username) && s.state() != ConnectionState::Closed)
            .cloned()
    }

    /// Binds `username` to `session` unless another unclosed session holds it.
    /// Check and bind happen under the write lock.
    pub fn claim_username(&self, session: &Session, username: &str) -> Result<(), UsernameTaken> {
        let slots = self.slots.write();
        let taken = slots.iter().flatten().any(|other| {
            other.id() != session.id()
                && other.username() == Some(username)
                && other.state() != ConnectionState::Closed
        });
        if taken || !session.bind_username(username) {
            return Err(UsernameTaken {
                username: username.to_string(),
            });
        }
        Ok(())
    }

    /// Snapshot of every occupied slot, in slot order.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.slots.read().iter().flatten().cloned().collect()
    }

    /// Runs `f` for each Active session in a snapshot.
    pub fn for_each_active(&self, mut f: impl FnMut(&Arc<Session>)) {
        for session in self.sessions() {
            if session.state() == ConnectionState::Active {
                f(&session);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.read().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::transport::memory;

    fn sink() -> Box<dyn FrameSink> {
        Box::new(memory::pair().0)
    }

    #[test]
    fn refuses_past_capacity() {
        let registry = SessionRegistry::new(100, 8);
        let sessions: Vec<_> = (0..100)
            .map(|_| registry.acquire_slot(sink()).unwrap())
            .collect();
        assert_eq!(sessions[99].id(), SessionId(99));
        let full = registry.acquire_slot(sink()).unwrap_err();
        assert_eq!(full.capacity, 100);
        assert_eq!(registry.len(), 100);
    }

    #[test]
    fn released_slot_is_reused() {
        let registry = SessionRegistry::new(2, 8);
        let a = registry.acquire_slot(sink()).unwrap();
        let _b = registry.acquire_slot(sink()).unwrap();
        assert!(registry.release(a.id()).is_some());
        let c = registry.acquire_slot(sink()).unwrap();
        assert_eq!(c.id(), a.id());
        // The old occupant can no longer release its successor.
        assert!(!registry.release_if(&a));
        assert!(registry.get(c.id()).is_some());
        assert!(registry.release_if(&c));
    }

    #[test]
    fn concurrent_acquire_never_double_assigns() {
        let registry = Arc::new(SessionRegistry::new(64, 8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..8)
                        .map(|_| registry.acquire_slot(sink()).unwrap().id())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut ids: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn username_is_unique_until_closed() {
        let registry = SessionRegistry::new(4, 8);
        let a = registry.acquire_slot(sink()).unwrap();
        let b = registry.acquire_slot(sink()).unwrap();
        registry.claim_username(&a, "alice").unwrap();
        assert_eq!(
            registry.claim_username(&b, "alice"),
            Err(UsernameTaken {
                username: "alice".into()
            })
        );
        assert_eq!(registry.lookup_by_username("alice").map(|s| s.id()), Some(a.id()));

        a.mark_closed();
        assert!(registry.lookup_by_username("alice").is_none());
        registry.claim_username(&b, "alice").unwrap();
    }

    #[test]
    fn for_each_active_skips_other_states() {
        let registry = SessionRegistry::new(4, 8);
        registry.acquire_slot(sink()).unwrap();
        let mut seen = 0;
        registry.for_each_active(|_| seen += 1);
        assert_eq!(seen, 0);
    }
}
