//! Bounded, thread-safe map from session id to canonical session.

use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::id::SessionId;
use crate::session::Session;

/// Result of [`SessionCache::put_if_absent`].
#[derive(Debug)]
pub struct PutOutcome {
    /// The canonical session for the id: the caller's if it was inserted,
    /// otherwise the entry that was already there.
    pub session: Arc<Session>,

    /// Whether the caller's session became the canonical entry.
    pub inserted: bool,

    /// Sessions evicted to make room.
    pub evicted: Vec<Arc<Session>>,
}

/// Session cache with LRU eviction that respects checkouts.
///
/// All operations take one short lock; no store I/O happens under it.
/// When the cache is over capacity an invalidated session that is not
/// checked out is evicted first, otherwise the least recently used one that
/// is not checked out. If every entry is checked out the cache stays
/// over capacity until some are returned.
#[derive(Debug)]
pub struct SessionCache {
    lru: Mutex<LruCache<SessionId, Arc<Session>>>,
    capacity: usize,
}

impl SessionCache {
    /// Create a cache holding at most `capacity` idle sessions (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            lru: Mutex::new(LruCache::unbounded()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.lock().is_empty()
    }

    /// Whether an entry exists, without touching LRU order.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.lru.lock().contains(id)
    }

    /// Look up a session and mark it most recently used.
    ///
    /// Invalid sessions are returned as-is; callers check validity.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        let mut lru = self.lru.lock();
        let session = lru.get(id).cloned();
        trace!(session_id = %id, hit = session.is_some(), "Session cache lookup");
        session
    }

    /// Look up a session without touching LRU order.
    pub fn peek(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.lru.lock().peek(id).cloned()
    }

    /// Insert `session` unless an entry for its id already exists.
    ///
    /// Exactly one canonical session exists per id: a racing caller that
    /// loses gets the winner back and its own session is dropped.
    pub fn put_if_absent(&self, session: Arc<Session>) -> PutOutcome {
        let mut lru = self.lru.lock();

        if let Some(existing) = lru.get(session.id()) {
            return PutOutcome {
                session: Arc::clone(existing),
                inserted: false,
                evicted: Vec::new(),
            };
        }

        let id = session.id().clone();
        lru.put(id.clone(), Arc::clone(&session));

        let mut evicted = Vec::new();
        while lru.len() > self.capacity {
            // invalidated leftovers go before any live session
            let evictable = |(key, entry): &(&SessionId, &Arc<Session>)| {
                **key != id && !entry.in_use()
            };
            let victim = lru
                .iter()
                .rev()
                .filter(evictable)
                .find(|(_, entry)| !entry.is_valid())
                .or_else(|| lru.iter().rev().find(evictable))
                .map(|(key, _)| key.clone());

            let Some(victim) = victim else {
                debug!(
                    size = lru.len(),
                    capacity = self.capacity,
                    "Every cached session is checked out; cache over capacity"
                );
                break;
            };

            if let Some(entry) = lru.pop(&victim) {
                debug!(session_id = %victim, "Evicting LRU session to make room");
                evicted.push(entry);
            }
        }

        trace!(session_id = %id, cache_size = lru.len(), "Session inserted into cache");

        PutOutcome {
            session,
            inserted: true,
            evicted,
        }
    }

    /// Remove an entry unconditionally.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.lru.lock().pop(id)
    }

    /// Remove an entry only if `predicate` holds, checked under the lock.
    pub fn remove_if(
        &self,
        id: &SessionId,
        predicate: impl FnOnce(&Arc<Session>) -> bool,
    ) -> Option<Arc<Session>> {
        let mut lru = self.lru.lock();
        match lru.peek(id) {
            Some(entry) if predicate(entry) => lru.pop(id),
            _ => None,
        }
    }

    /// Remove the entry for `session`'s id only if it is that exact session.
    pub fn remove_entry(&self, session: &Arc<Session>) -> bool {
        self.remove_if(session.id(), |entry| Arc::ptr_eq(entry, session))
            .is_some()
    }

    /// Point-in-time view of every entry for maintenance scans.
    ///
    /// The scan runs without holding the lock: entries added or removed
    /// afterwards may or may not appear, but every yielded session is a
    /// live, consistent object. Call again to restart.
    pub fn snapshot_values(&self) -> Snapshot {
        let entries: Vec<Arc<Session>> = self.lru.lock().iter().map(|(_, s)| Arc::clone(s)).collect();
        Snapshot {
            entries: entries.into_iter(),
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let lru = self.lru.lock();
        CacheStats {
            size: lru.len(),
            capacity: self.capacity,
            in_use: lru.iter().filter(|(_, s)| s.in_use()).count(),
        }
    }
}

/// Iterator over a [`SessionCache::snapshot_values`] view.
#[derive(Debug)]
pub struct Snapshot {
    entries: std::vec::IntoIter<Arc<Session>>,
}

impl Iterator for Snapshot {
    type Item = Arc<Session>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for Snapshot {}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of cached sessions.
    pub size: usize,

    /// Maximum idle capacity.
    pub capacity: usize,

    /// Sessions with outstanding checkouts.
    pub in_use: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session(id: &str) -> Arc<Session> {
        Arc::new(Session::new(SessionId::new(id), 1, Duration::from_secs(60)))
    }

    fn insert(cache: &SessionCache, id: &str) -> PutOutcome {
        cache.put_if_absent(session(id))
    }

    #[test]
    fn test_insert_and_get() {
        let cache = SessionCache::new(10);
        let outcome = insert(&cache, "session-1");
        assert!(outcome.inserted);

        let found = cache.get(&SessionId::new("session-1")).unwrap();
        assert!(Arc::ptr_eq(&found, &outcome.session));
        assert!(cache.get(&SessionId::new("missing")).is_none());
    }

    #[test]
    fn test_put_if_absent_returns_winner() {
        let cache = SessionCache::new(10);
        let first = insert(&cache, "session-1");
        let second = insert(&cache, "session-1");

        assert!(!second.inserted);
        assert!(Arc::ptr_eq(&first.session, &second.session));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = SessionCache::new(3);
        for i in 1..=3 {
            insert(&cache, &format!("session-{i}"));
        }

        let outcome = insert(&cache, "session-4");
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].id().as_str(), "session-1");

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&SessionId::new("session-1")));
        assert!(cache.contains(&SessionId::new("session-4")));
    }

    #[test]
    fn test_lru_access_updates_order() {
        let cache = SessionCache::new(3);
        for i in 1..=3 {
            insert(&cache, &format!("session-{i}"));
        }

        cache.get(&SessionId::new("session-1"));

        let outcome = insert(&cache, "session-4");
        assert_eq!(outcome.evicted[0].id().as_str(), "session-2");
        assert!(cache.contains(&SessionId::new("session-1")));
    }

    #[test]
    fn test_peek_does_not_update_order() {
        let cache = SessionCache::new(2);
        insert(&cache, "session-1");
        insert(&cache, "session-2");

        cache.peek(&SessionId::new("session-1"));

        let outcome = insert(&cache, "session-3");
        assert_eq!(outcome.evicted[0].id().as_str(), "session-1");
    }

    #[test]
    fn test_in_use_sessions_are_skipped() {
        let cache = SessionCache::new(2);
        let held = insert(&cache, "session-1").session;
        let _checkout = held.checkout();
        insert(&cache, "session-2");

        let outcome = insert(&cache, "session-3");
        assert_eq!(outcome.evicted[0].id().as_str(), "session-2");
        assert!(cache.contains(&SessionId::new("session-1")));
    }

    #[test]
    fn test_invalid_sessions_evicted_first() {
        let cache = SessionCache::new(3);
        for i in 1..=3 {
            insert(&cache, &format!("session-{i}"));
        }
        let dead = cache.get(&SessionId::new("session-3")).unwrap();
        dead.invalidate();

        let outcome = insert(&cache, "session-4");
        assert_eq!(outcome.evicted.len(), 1);
        assert!(Arc::ptr_eq(&outcome.evicted[0], &dead));
        assert!(cache.contains(&SessionId::new("session-1")));
    }

    #[test]
    fn test_over_capacity_when_everything_in_use() {
        let cache = SessionCache::new(1);
        let held = insert(&cache, "session-1").session;
        let _checkout = held.checkout();

        let outcome = insert(&cache, "session-2");
        assert!(outcome.evicted.is_empty());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_remove_if() {
        let cache = SessionCache::new(10);
        let held = insert(&cache, "session-1").session;
        let checkout = held.checkout();

        let id = SessionId::new("session-1");
        assert!(cache.remove_if(&id, |s| !s.in_use()).is_none());

        held.release();
        drop(checkout);
        assert!(cache.remove_if(&id, |s| !s.in_use()).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_entry_checks_identity() {
        let cache = SessionCache::new(10);
        insert(&cache, "session-1");
        let impostor = session("session-1");

        assert!(!cache.remove_entry(&impostor));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_snapshot_tolerates_mutation() {
        let cache = SessionCache::new(10);
        for i in 1..=3 {
            insert(&cache, &format!("session-{i}"));
        }

        let mut seen = Vec::new();
        for session in cache.snapshot_values() {
            cache.remove(session.id());
            insert(&cache, &format!("{}-new", session.id()));
            seen.push(session.id().to_string());
        }
        seen.sort();
        assert_eq!(seen, vec!["session-1", "session-2", "session-3"]);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_stats() {
        let cache = SessionCache::new(100);
        for i in 1..=5 {
            insert(&cache, &format!("session-{i}"));
        }
        let held = cache.peek(&SessionId::new("session-1")).unwrap();
        let _checkout = held.checkout();

        let stats = cache.stats();
        assert_eq!(stats.size, 5);
        assert_eq!(stats.capacity, 100);
        assert_eq!(stats.in_use, 1);
    }
}
