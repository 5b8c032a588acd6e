//! Registry of authenticated sessions.
//!
//! One mutex guards the list. Callers never iterate it in place: broadcasts
//! and listings work from [`SessionRegistry::snapshot`], and the lock is
//! never held across socket I/O.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::session::SessionHandle;

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<Vec<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return the new online count.
    pub async fn add(&self, handle: SessionHandle) -> usize {
        let mut sessions = self.sessions.lock().await;
        debug!(user = %handle.username(), session = %handle.id(), "Session registered");
        sessions.push(handle);
        sessions.len()
    }

    /// Register a session unless its username already has one. Returns the
    /// new online count, or `None` if the name was taken.
    pub async fn add_unique(&self, handle: SessionHandle) -> Option<usize> {
        let mut sessions = self.sessions.lock().await;
        if sessions.iter().any(|s| s.username() == handle.username()) {
            return None;
        }
        debug!(user = %handle.username(), session = %handle.id(), "Session registered");
        sessions.push(handle);
        Some(sessions.len())
    }

    /// Remove a session by id. Returns `false` if it was already gone.
    pub async fn remove(&self, id: Uuid) -> bool {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|handle| handle.id() != id);
        let removed = sessions.len() != before;
        if removed {
            debug!(session = %id, online = sessions.len(), "Session removed");
        }
        removed
    }

    /// Point-in-time copy in registration order.
    pub async fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions.lock().await.clone()
    }

    /// First session registered under `name`, if any.
    pub async fn find_by_name(&self, name: &str) -> Option<SessionHandle> {
        self.sessions
            .lock()
            .await
            .iter()
            .find(|handle| handle.username() == name)
            .cloned()
    }

    pub async fn contains_username(&self, name: &str) -> bool {
        self.find_by_name(name).await.is_some()
    }

    /// Usernames in registration order; duplicates appear once per session.
    pub async fn usernames(&self) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|handle| handle.username().to_string())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle(name: &str) -> SessionHandle {
        let (tx, _rx) = mpsc::channel(1);
        SessionHandle::new(name, tx)
    }

    #[tokio::test]
    async fn test_add_remove_and_lookup() {
        let registry = SessionRegistry::new();
        let alice = handle("alice");
        let bob = handle("bob");

        assert_eq!(registry.add(alice.clone()).await, 1);
        assert_eq!(registry.add(bob.clone()).await, 2);
        assert_eq!(registry.usernames().await, vec!["alice", "bob"]);
        assert_eq!(
            registry.find_by_name("bob").await.map(|h| h.id()),
            Some(bob.id())
        );

        assert!(registry.remove(alice.id()).await);
        assert!(!registry.remove(alice.id()).await);
        assert!(registry.find_by_name("alice").await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let registry = SessionRegistry::new();
        let alice = handle("alice");
        registry.add(alice.clone()).await;

        let snapshot = registry.snapshot().await;
        registry.remove(alice.id()).await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_names_resolve_to_first_registered() {
        let registry = SessionRegistry::new();
        let first = handle("alice");
        let second = handle("alice");
        registry.add(first.clone()).await;
        registry.add(second).await;

        assert_eq!(
            registry.find_by_name("alice").await.map(|h| h.id()),
            Some(first.id())
        );
        assert_eq!(registry.usernames().await.len(), 2);
    }

    #[tokio::test]
    async fn test_add_unique_refuses_a_taken_name() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.add_unique(handle("alice")).await, Some(1));
        assert_eq!(registry.add_unique(handle("alice")).await, None);
        assert_eq!(registry.add_unique(handle("bob")).await, Some(2));
    }
}
