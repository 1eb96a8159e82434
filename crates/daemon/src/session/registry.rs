//! Session registry.
//!
//! The only state shared across sessions. Lookups run concurrently on
//! separate shards; add and remove serialize per shard. No shard lock is
//! ever held across I/O: callers clone the `Arc` out and drop the guard.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Identifier-keyed table of live sessions.
#[derive(Debug)]
pub struct SessionRegistry<S> {
    sessions: DashMap<String, Arc<S>>,
}

impl<S> SessionRegistry<S> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Inserts a session. Returns `false` and leaves the table unchanged
    /// if the identifier is already present.
    pub fn add(&self, id: String, session: Arc<S>) -> bool {
        match self.sessions.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    /// Looks up a session.
    pub fn get(&self, id: &str) -> Option<Arc<S>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes `id` only while it still maps to `session`. Returns whether
    /// this call removed it.
    pub fn remove(&self, id: &str, session: &Arc<S>) -> bool {
        self.sessions
            .remove_if(id, |_, registered| Arc::ptr_eq(registered, session))
            .is_some()
    }

    /// Snapshot of every registered session.
    pub fn list(&self) -> Vec<Arc<S>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of registered sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get_remove() {
        let registry = SessionRegistry::new();
        let session = Arc::new(1u32);
        assert!(registry.add("a".to_string(), Arc::clone(&session)));
        assert_eq!(registry.get("a").as_deref(), Some(&1));

        assert!(registry.remove("a", &session));
        assert!(registry.get("a").is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_remove_is_exactly_once() {
        let registry = SessionRegistry::new();
        let session = Arc::new(());
        registry.add("a".to_string(), Arc::clone(&session));

        assert!(registry.remove("a", &session));
        assert!(!registry.remove("a", &session));
    }

    #[test]
    fn test_remove_checks_identity() {
        let registry = SessionRegistry::new();
        let registered = Arc::new(1u32);
        let stranger = Arc::new(1u32);
        registry.add("a".to_string(), Arc::clone(&registered));

        assert!(!registry.remove("a", &stranger));
        assert!(registry.get("a").is_some());
        assert!(registry.remove("a", &registered));
        assert!(!registry.remove("a", &registered));
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let registry = SessionRegistry::new();
        assert!(registry.add("a".to_string(), Arc::new(1u32)));
        assert!(!registry.add("a".to_string(), Arc::new(2u32)));
        assert_eq!(registry.get("a").as_deref(), Some(&1));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_list_snapshot() {
        let registry = SessionRegistry::new();
        for i in 0..5u32 {
            registry.add(format!("s{i}"), Arc::new(i));
        }

        let mut values: Vec<u32> = registry.list().iter().map(|s| **s).collect();
        values.sort_unstable();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(registry.count(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_adds() {
        let registry = Arc::new(SessionRegistry::new());
        let mut handles = Vec::new();

        for i in 0..32u32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.add(format!("s{i}"), Arc::new(i))
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(registry.count(), 32);
    }
}
