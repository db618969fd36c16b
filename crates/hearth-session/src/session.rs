//! The canonical session record and its checkout copies.
//!
//! The cache owns one [`Session`] per id. Requests never touch it directly:
//! they receive a [`SessionCheckout`], a value copy of the content, and merge
//! it back with [`Session::checkin`]. The reference count tracks how many
//! checkouts are outstanding; a session with outstanding checkouts is never
//! evicted or reaped.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::warn;

use crate::id::SessionId;
use crate::store::ClusterHandle;

/// Distinguishes successive canonical sessions that reuse one id, so a
/// checkout can never be merged into a session it was not taken from.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a session.
///
/// `Invalid` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created with no stored or initialized content yet.
    New,
    /// Content loaded from the store or initialized by a checkin.
    Active,
    /// Idle past its timeout, or known to be out of date with the store.
    Stale,
    /// Destroyed, reaped or lost to another owner.
    Invalid,
}

#[derive(Debug)]
struct Content {
    data: Vec<u8>,
    lifecycle: Lifecycle,
    /// Bumped on every content change; lets a persist clear `dirty` only if
    /// nothing changed while the store call was in flight.
    version: u64,
}

/// One user's server-side session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    generation: u64,
    created_at: AtomicU64,
    last_accessed_at: AtomicU64,
    max_idle_ms: AtomicU64,
    ref_count: AtomicUsize,
    valid: AtomicBool,
    loaded: AtomicBool,
    dirty: AtomicBool,
    content: Mutex<Content>,
    load_lock: Mutex<()>,
    handle: OnceLock<ClusterHandle>,
}

impl Session {
    /// Create a session in the `New` state.
    pub fn new(id: SessionId, now: u64, max_idle: Duration) -> Self {
        Self {
            id,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            created_at: AtomicU64::new(now),
            last_accessed_at: AtomicU64::new(now),
            max_idle_ms: AtomicU64::new(duration_ms(max_idle)),
            ref_count: AtomicUsize::new(0),
            valid: AtomicBool::new(true),
            loaded: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            content: Mutex::new(Content {
                data: Vec::new(),
                lifecycle: Lifecycle::New,
                version: 0,
            }),
            load_lock: Mutex::new(()),
            handle: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> u64 {
        self.created_at.load(Ordering::Acquire)
    }

    pub fn last_accessed_at(&self) -> u64 {
        self.last_accessed_at.load(Ordering::Acquire)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms.load(Ordering::Acquire))
    }

    pub fn set_max_idle(&self, max_idle: Duration) {
        self.max_idle_ms
            .store(duration_ms(max_idle), Ordering::Release);
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if !self.is_valid() {
            return Lifecycle::Invalid;
        }
        self.content.lock().lifecycle
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn is_stale(&self) -> bool {
        self.lifecycle() == Lifecycle::Stale
    }

    pub fn is_empty(&self) -> bool {
        self.content.lock().data.is_empty()
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// True while any checkout is outstanding.
    pub fn in_use(&self) -> bool {
        self.ref_count() > 0
    }

    /// Record an access. Returns false (and does nothing) on an invalid
    /// session.
    pub fn touch(&self, now: u64) -> bool {
        if !self.is_valid() {
            return false;
        }
        self.last_accessed_at.store(now, Ordering::Release);
        true
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Take a private copy of the content and bump the reference count.
    pub fn checkout(&self) -> SessionCheckout {
        let content = self.content.lock();
        self.ref_count.fetch_add(1, Ordering::AcqRel);
        SessionCheckout {
            id: self.id.clone(),
            generation: self.generation,
            data: content.data.clone(),
            created_at: self.created_at(),
            last_accessed_at: self.last_accessed_at(),
            max_idle: self.max_idle(),
            is_new: content.lifecycle == Lifecycle::New,
            modified: false,
            max_idle_changed: false,
        }
    }

    /// Merge a checkout back and release its reference.
    ///
    /// The whole content blob is replaced when the checkout was modified
    /// (last writer wins). Returns false if the checkout belongs to another
    /// session or generation, in which case nothing changes.
    pub fn checkin(&self, checkout: SessionCheckout) -> bool {
        if checkout.generation != self.generation || checkout.id != self.id {
            return false;
        }

        {
            let mut content = self.content.lock();
            if checkout.modified {
                content.data = checkout.data;
                content.version += 1;
                self.dirty.store(true, Ordering::Release);
            }
            if self.is_valid() && content.lifecycle != Lifecycle::Invalid {
                content.lifecycle = Lifecycle::Active;
            }
        }

        if checkout.max_idle_changed {
            self.set_max_idle(checkout.max_idle);
        }

        self.release();
        true
    }

    /// Drop one reference without merging anything.
    ///
    /// Returns false if the count was already zero; it never goes negative.
    pub fn release(&self) -> bool {
        let released = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if !released {
            warn!(session_id = %self.id, "Released a session with no outstanding checkouts");
        }
        released
    }

    /// Mark the session invalid. Idempotent and terminal.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
        self.content.lock().lifecycle = Lifecycle::Invalid;
    }

    /// Flag a valid session as out of date.
    pub fn mark_stale(&self) {
        let mut content = self.content.lock();
        if self.is_valid() && content.lifecycle != Lifecycle::Invalid {
            content.lifecycle = Lifecycle::Stale;
        }
    }

    /// True iff not in use and idle longer than its timeout plus `padding`.
    pub fn is_expired(&self, now: u64, padding: Duration) -> bool {
        if self.in_use() {
            return false;
        }
        let deadline = self
            .last_accessed_at()
            .saturating_add(self.max_idle_ms.load(Ordering::Acquire))
            .saturating_add(duration_ms(padding));
        deadline < now
    }

    /// Reset to a blank `New` session, as if it had just been created.
    pub fn reset(&self, now: u64) {
        let mut content = self.content.lock();
        content.data.clear();
        content.version += 1;
        if self.is_valid() {
            content.lifecycle = Lifecycle::New;
        }
        self.created_at.store(now, Ordering::Release);
        self.last_accessed_at.store(now, Ordering::Release);
        self.loaded.store(false, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
    }

    /// Replace the content with what the store returned.
    pub(crate) fn apply_loaded(&self, data: Vec<u8>) {
        let mut content = self.content.lock();
        content.data = data;
        content.version += 1;
        if self.is_valid() {
            content.lifecycle = Lifecycle::Active;
        }
        self.loaded.store(true, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
    }

    /// Copy of the content with its version, for persisting.
    pub(crate) fn content_snapshot(&self) -> (Vec<u8>, u64) {
        let content = self.content.lock();
        (content.data.clone(), content.version)
    }

    /// Clear `dirty` unless the content changed since `version` was taken.
    pub(crate) fn clear_dirty_if_unchanged(&self, version: u64) {
        let content = self.content.lock();
        if content.version == version {
            self.dirty.store(false, Ordering::Release);
        }
    }

    /// Store slot reference, if one was attached.
    pub fn handle(&self) -> Option<&ClusterHandle> {
        self.handle.get()
    }

    /// Attach the store slot reference on first use; later calls reuse it.
    pub(crate) fn handle_or_attach(&self, create: impl FnOnce() -> ClusterHandle) -> &ClusterHandle {
        self.handle.get_or_init(create)
    }

    /// Serializes store loads for this session.
    pub(crate) fn load_guard(&self) -> MutexGuard<'_, ()> {
        self.load_lock.lock()
    }
}

/// A private, detached copy of a session handed to one request.
#[derive(Debug)]
pub struct SessionCheckout {
    id: SessionId,
    generation: u64,
    data: Vec<u8>,
    created_at: u64,
    last_accessed_at: u64,
    max_idle: Duration,
    is_new: bool,
    modified: bool,
    max_idle_changed: bool,
}

impl SessionCheckout {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the content; marks the checkout modified.
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        self.modified = true;
        &mut self.data
    }

    /// Replace the content.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
        self.modified = true;
    }

    /// Drop all content.
    pub fn clear(&mut self) {
        self.set_data(Vec::new());
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True if the session had no stored or initialized content when
    /// checked out.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn last_accessed_at(&self) -> u64 {
        self.last_accessed_at
    }

    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }

    /// Override this session's idle timeout; applied on checkin.
    pub fn set_max_idle(&mut self, max_idle: Duration) {
        self.max_idle = max_idle;
        self.max_idle_changed = true;
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
