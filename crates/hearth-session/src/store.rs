//! Backing store contract.
//!
//! The cache never talks to durable storage directly. A [`SessionStore`]
//! loads and saves opaque content blobs addressed by a [`ClusterHandle`] that
//! the store hands out once per session.

use std::time::Duration;

use crate::id::SessionId;

/// Opaque reference to a session's slot in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterHandle {
    key: String,
}

impl ClusterHandle {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Store-specific key for this slot.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Failure reported by a backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store holds no content for this session (permanent).
    #[error("No stored session: {0}")]
    NotFound(String),

    /// The store could not be reached or timed out; may succeed later.
    #[error("Transient store failure: {0}")]
    Transient(String),

    /// Local I/O failure in the store implementation.
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the session is known to be gone from the store.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Trait for backing stores.
///
/// Implementations are called outside of any cache-wide lock and may block.
/// Timeouts and retries are the implementation's responsibility.
pub trait SessionStore: Send + Sync {
    /// Create the store slot reference for `id`. Called once per session;
    /// must be idempotent per id.
    fn create_handle(&self, id: &SessionId) -> ClusterHandle {
        ClusterHandle::new(id.as_str())
    }

    /// Load the stored content for a session.
    ///
    /// Return [`StoreError::NotFound`] when nothing is stored.
    fn load(&self, handle: &ClusterHandle) -> StoreResult<Vec<u8>>;

    /// Persist the content for a session.
    fn save(&self, handle: &ClusterHandle, data: &[u8]) -> StoreResult<()>;

    /// Delete a session from the store.
    fn remove(&self, id: &SessionId) -> StoreResult<()>;

    /// Grace period added to idle timeouts to absorb replication lag.
    fn access_window(&self) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanence() {
        assert!(StoreError::NotFound("abc".into()).is_permanent());
        assert!(!StoreError::Transient("timeout".into()).is_permanent());

        let io = std::io::Error::other("disk full");
        assert!(!StoreError::from(io).is_permanent());
    }

    #[test]
    fn test_handle_key() {
        let handle = ClusterHandle::new("abcdef");
        assert_eq!(handle.key(), "abcdef");
    }
}
