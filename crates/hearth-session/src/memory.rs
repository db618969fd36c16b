//! In-memory backing store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::id::SessionId;
use crate::store::{ClusterHandle, SessionStore, StoreError, StoreResult};

/// A [`SessionStore`] backed by a `HashMap`.
///
/// Useful for single-process deployments and for tests: saves and removes
/// can be made to fail for chosen ids and loads can be made to fail
/// transiently.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    failing_saves: Mutex<HashSet<String>>,
    failing_removes: Mutex<HashSet<String>>,
    transient_loads: AtomicBool,
    access_window: Duration,
    loads: AtomicUsize,
    saves: AtomicUsize,
    removes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the grace period reported by [`SessionStore::access_window`].
    pub fn with_access_window(mut self, window: Duration) -> Self {
        self.access_window = window;
        self
    }

    /// Seed stored content for an id.
    pub fn insert(&self, id: impl Into<String>, data: Vec<u8>) {
        self.entries.lock().insert(id.into(), data);
    }

    /// Stored content for an id.
    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Make every save for `id` fail with a transient error.
    pub fn fail_saves_for(&self, id: impl Into<String>) {
        self.failing_saves.lock().insert(id.into());
    }

    /// Make every remove for `id` fail with a transient error.
    pub fn fail_removes_for(&self, id: impl Into<String>) {
        self.failing_removes.lock().insert(id.into());
    }

    /// Make loads fail transiently until turned off again.
    pub fn fail_loads_transiently(&self, enabled: bool) {
        self.transient_loads.store(enabled, Ordering::SeqCst);
    }

    /// Number of load calls, including failed ones.
    pub fn load_calls(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of save calls, including failed ones.
    pub fn save_calls(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Number of remove calls.
    pub fn remove_calls(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }
}

impl SessionStore for MemoryStore {
    fn load(&self, handle: &ClusterHandle) -> StoreResult<Vec<u8>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.transient_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Transient(format!(
                "load of {} unavailable",
                handle.key()
            )));
        }
        self.entries
            .lock()
            .get(handle.key())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(handle.key().to_string()))
    }

    fn save(&self, handle: &ClusterHandle, data: &[u8]) -> StoreResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.failing_saves.lock().contains(handle.key()) {
            return Err(StoreError::Transient(format!(
                "save of {} rejected",
                handle.key()
            )));
        }
        self.entries
            .lock()
            .insert(handle.key().to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, id: &SessionId) -> StoreResult<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        if self.failing_removes.lock().contains(id.as_str()) {
            return Err(StoreError::Transient(format!("remove of {id} rejected")));
        }
        self.entries.lock().remove(id.as_str());
        Ok(())
    }

    fn access_window(&self) -> Duration {
        self.access_window
    }
}
