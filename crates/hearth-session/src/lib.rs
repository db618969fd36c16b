//! Clustered session cache.
//!
//! This crate keeps per-user session state in memory with:
//! - Opaque, collision-checked session ids that embed a cluster routing code
//! - Copy-on-checkout access so concurrent requests never share live state
//! - LRU eviction that never drops a session that is checked out
//! - Lazy loading from a pluggable [`SessionStore`] on cache miss
//! - A background [`Reaper`] that expires idle sessions this node owns
//! - A best-effort flush of unsaved sessions on shutdown
//!
//! # Example
//!
//! ```rust,ignore
//! use hearth_session::{ManagerConfig, MemoryStore, SessionManager};
//!
//! let manager = SessionManager::builder(ManagerConfig::default())
//!     .store(Arc::new(MemoryStore::new()))
//!     .build();
//! manager.start()?;
//!
//! let mut session = manager.get_or_create(cookie.as_deref())?;
//! session.set_data(b"cart=3".to_vec());
//! manager.save(session)?;
//! ```

mod cache;
mod clock;
mod config;
mod error;
mod id;
mod manager;
mod memory;
mod notify;
mod partition;
mod reaper;
mod session;
mod stats;
mod store;

pub use cache::{CacheStats, PutOutcome, SessionCache, Snapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClusterConfig, IdentifierConfig, MIN_REQUESTED_ID_LENGTH, ManagerConfig};
pub use error::{Error, Result};
pub use hearth_types::SavePolicy;
pub use id::{ALPHABET, IdGenerator, SessionId, decode_group_digit, encode_digit};
pub use manager::{SessionManager, SessionManagerBuilder, ShutdownReport};
pub use memory::MemoryStore;
pub use notify::{ClusterNotifier, NoopNotifier};
pub use partition::PartitionOracle;
pub use reaper::{ReapReport, Reaper};
pub use tokio_util::sync::CancellationToken;
pub use session::{Lifecycle, Session, SessionCheckout};
pub use stats::{SessionStats, StatsSnapshot};
pub use store::{ClusterHandle, SessionStore, StoreError, StoreResult};
