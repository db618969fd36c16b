//! Public entry point: create, resume, save and destroy sessions.
//!
//! The manager wires the cache, id generator, partition oracle, backing
//! store and reaper together. Backing-store failures never escape its
//! methods; they are logged and turned into session lifecycle outcomes:
//!
//! - a cached session the store no longer knows is reset to a blank session
//! - a requested id the store does not know is discarded and a fresh
//!   session is issued instead
//! - a transient load failure keeps whatever is cached

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::cache::SessionCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{MIN_REQUESTED_ID_LENGTH, ManagerConfig};
use crate::error::{Error, Result};
use crate::id::{IdGenerator, SessionId};
use crate::notify::{ClusterNotifier, NoopNotifier};
use crate::partition::PartitionOracle;
use crate::reaper::{ReapReport, Reaper};
use crate::session::{Session, SessionCheckout};
use crate::stats::{SessionStats, StatsSnapshot};
use crate::store::{SessionStore, StoreResult};
use hearth_types::SavePolicy;

/// What a cache/store lookup produced.
enum Resolution {
    Hit(SessionCheckout),
    /// Nothing cached and nothing created.
    Miss,
    /// The requested id was unknown to the store and has been discarded.
    Killed,
}

/// Outcome of the shutdown drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Valid sessions removed from the cache.
    pub drained: usize,
    /// Sessions a persist was attempted for.
    pub attempted: usize,
    pub persisted: usize,
    pub failed: usize,
}

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder {
    config: ManagerConfig,
    store: Option<Arc<dyn SessionStore>>,
    notifier: Arc<dyn ClusterNotifier>,
    clock: Arc<dyn Clock>,
}

impl SessionManagerBuilder {
    /// Attach a backing store.
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach a cluster notifier.
    pub fn notifier(mut self, notifier: Arc<dyn ClusterNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> SessionManager {
        let config = self.config;
        let cache = Arc::new(SessionCache::new(config.max_sessions));
        let oracle = PartitionOracle::from_config(&config);
        let stats = Arc::new(SessionStats::new());

        let reaper = Arc::new(Reaper::new(
            Arc::clone(&cache),
            oracle,
            config.cluster.node_index,
            self.store.clone(),
            Arc::clone(&self.notifier),
            Arc::clone(&self.clock),
            Arc::clone(&stats),
        ));

        SessionManager {
            generator: IdGenerator::new(config.id.clone(), config.cluster),
            oracle,
            cache,
            store: self.store,
            notifier: self.notifier,
            clock: self.clock,
            stats,
            reaper,
            reaper_token: CancellationToken::new(),
            reaper_task: Mutex::new(None),
            closed: AtomicBool::new(false),
            config,
        }
    }
}

/// Session manager for one node.
pub struct SessionManager {
    config: ManagerConfig,
    cache: Arc<SessionCache>,
    generator: IdGenerator,
    oracle: PartitionOracle,
    store: Option<Arc<dyn SessionStore>>,
    notifier: Arc<dyn ClusterNotifier>,
    clock: Arc<dyn Clock>,
    stats: Arc<SessionStats>,
    reaper: Arc<Reaper>,
    reaper_token: CancellationToken,
    reaper_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("has_store", &self.store.is_some())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Start building a manager.
    pub fn builder(config: ManagerConfig) -> SessionManagerBuilder {
        SessionManagerBuilder {
            config,
            store: None,
            notifier: Arc::new(NoopNotifier),
            clock: Arc::new(SystemClock),
        }
    }

    /// A memory-only manager with the system clock.
    pub fn new(config: ManagerConfig) -> Self {
        Self::builder(config).build()
    }

    /// A manager backed by `store`.
    pub fn with_store(config: ManagerConfig, store: Arc<dyn SessionStore>) -> Self {
        Self::builder(config).store(store).build()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Direct access to the cache, for inspection.
    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn reaper(&self) -> &Reaper {
        &self.reaper
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of cached sessions.
    pub fn active_count(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.cache.len(), self.cache.capacity())
    }

    /// Schedule the reaper on the current tokio runtime.
    ///
    /// Calling this more than once is a no-op.
    pub fn start(&self) -> Result<()> {
        self.ensure_open()?;
        let mut task = self.reaper_task.lock();
        if task.is_none() {
            *task = Some(
                Arc::clone(&self.reaper)
                    .spawn(self.config.reap_interval, self.reaper_token.clone()),
            );
            info!(
                interval_ms = self.config.reap_interval.as_millis() as u64,
                max_sessions = self.config.max_sessions,
                "Session reaper scheduled"
            );
        }
        Ok(())
    }

    /// Run one reaper cycle now.
    pub fn reap_now(&self) -> ReapReport {
        self.reaper.run_cycle()
    }

    /// Generate an id not currently in the cache.
    pub fn generate_id(&self) -> Result<SessionId> {
        loop {
            let id = self.generator.generate(self.clock.now_ms())?;
            if !self.cache.contains(&id) {
                return Ok(id);
            }
            trace!(session_id = %id, "Generated id collides with a cached session; retrying");
        }
    }

    /// Whether an inbound id may be used as-is on this node.
    pub fn is_reusable(&self, requested: &str) -> bool {
        self.config.reuse_session_id
            && requested.len() >= MIN_REQUESTED_ID_LENGTH
            && self
                .oracle
                .owns(&SessionId::from(requested), self.config.cluster.node_index)
    }

    /// Resume the requested session or create a new one.
    pub fn get_or_create(&self, requested: Option<&str>) -> Result<SessionCheckout> {
        self.get_or_create_at(requested, self.clock.now_ms())
    }

    /// [`get_or_create`](Self::get_or_create) at an explicit time.
    ///
    /// `now` is clamped to at least 1; use
    /// [`get_session_at`](Self::get_session_at) with 0 for existence checks.
    pub fn get_or_create_at(&self, requested: Option<&str>, now: u64) -> Result<SessionCheckout> {
        self.ensure_open()?;
        let now = now.max(1);

        let reused = requested.filter(|id| self.is_reusable(id));
        if let (Some(requested), None) = (requested, reused) {
            debug!(requested = %requested, "Requested session id not reusable on this node");
        }

        let id = match reused {
            Some(id) => SessionId::from(id),
            None => self.generate_id()?,
        };

        match self.resolve(&id, now, reused.is_some())? {
            Resolution::Hit(checkout) => Ok(checkout),
            Resolution::Miss => self.create(&id, now),
            Resolution::Killed => {
                let fresh = self.generate_id()?;
                self.create(&fresh, now)
            }
        }
    }

    /// Resume an existing session only.
    pub fn get_session(&self, id: &str) -> Result<Option<SessionCheckout>> {
        self.get_session_at(id, self.clock.now_ms())
    }

    /// Resume an existing session at an explicit time.
    ///
    /// With a store configured, a session missing from the cache is loaded
    /// from it. `now == 0` only checks the cache and never loads, reloads or
    /// touches anything.
    pub fn get_session_at(&self, id: &str, now: u64) -> Result<Option<SessionCheckout>> {
        self.ensure_open()?;
        if id.len() < MIN_REQUESTED_ID_LENGTH {
            return Ok(None);
        }
        let id = SessionId::from(id);
        if !self.oracle.owns(&id, self.config.cluster.node_index) {
            return Ok(None);
        }
        match self.resolve(&id, now, true)? {
            Resolution::Hit(checkout) => Ok(Some(checkout)),
            Resolution::Miss | Resolution::Killed => Ok(None),
        }
    }

    /// Whether a valid session is cached for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.cache
            .peek(&SessionId::from(id))
            .is_some_and(|session| session.is_valid())
    }

    /// Merge a checkout back and persist according to the save policy.
    ///
    /// A checkout whose session was destroyed, reaped or replaced in the
    /// meantime is discarded.
    pub fn save(&self, checkout: SessionCheckout) -> Result<()> {
        self.ensure_open()?;
        let id = checkout.id().clone();
        let Some(session) = self.canonical_for(&checkout)? else {
            debug!(session_id = %id, "Saved checkout no longer matches a cached session; discarding");
            return Ok(());
        };

        session.checkin(checkout);
        if self.config.save_policy == SavePolicy::Always {
            session.mark_dirty();
        }

        if session.is_dirty() && self.config.save_policy != SavePolicy::OnShutdown {
            self.persist(&session);
        }
        Ok(())
    }

    /// Return a checkout without merging its content.
    pub fn release(&self, checkout: SessionCheckout) -> Result<()> {
        self.ensure_open()?;
        if let Some(session) = self.canonical_for(&checkout)? {
            session.release();
        }
        Ok(())
    }

    /// Remove a session from the cache and the store.
    ///
    /// Store errors are logged, not returned. Fails only once the manager
    /// is shut down.
    pub fn destroy(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let id = SessionId::from(id);
        if let Some(session) = self.cache.remove(&id) {
            session.invalidate();
            self.stats.record_invalidated();
        }

        if let Some(store) = &self.store
            && let Err(e) = store.remove(&id)
        {
            warn!(session_id = %id, error = %e, "Failed to remove destroyed session from store");
        }

        self.notifier.notify_invalidated(&id);
        debug!(session_id = %id, "Session destroyed");
        Ok(())
    }

    /// Another node destroyed this session: drop our copy.
    pub fn notify_remove(&self, id: &str) {
        if let Some(session) = self.cache.remove(&SessionId::from(id)) {
            session.invalidate();
            self.stats.record_invalidated();
            debug!(session_id = %id, "Session removed by cluster notification");
        }
    }

    /// Another node changed this session: reload it on next access.
    pub fn notify_update(&self, id: &str) {
        if let Some(session) = self.cache.peek(&SessionId::from(id)) {
            session.mark_stale();
            trace!(session_id = %id, "Session marked stale by cluster notification");
        }
    }

    /// Stop the reaper and persist every valid, non-empty session.
    ///
    /// Idempotent: only the first call drains. A cycle already running is
    /// allowed to finish. Persistence failures are logged per session and do
    /// not stop the drain.
    pub fn shutdown(&self) -> ShutdownReport {
        if self.closed.swap(true, Ordering::SeqCst) {
            return ShutdownReport::default();
        }

        self.reaper_token.cancel();
        // dropping the handle detaches the task; it exits at its next wakeup
        self.reaper_task.lock().take();

        let mut sessions: Vec<Arc<Session>> = self
            .cache
            .snapshot_values()
            .filter(|session| session.is_valid())
            .collect();
        sessions.sort_by_key(|session| std::cmp::Reverse(session.created_at()));

        let mut report = ShutdownReport::default();
        for session in sessions {
            if session.is_valid() && !session.is_empty() && self.store.is_some() {
                report.attempted += 1;
                match self.persist_with_result(&session) {
                    Ok(()) => report.persisted += 1,
                    Err(e) => {
                        self.stats.record_save_failure();
                        if report.failed == 0 {
                            warn!(session_id = %session.id(), error = %e, "Can't store session on shutdown");
                        } else {
                            debug!(session_id = %session.id(), error = %e, "Can't store session on shutdown");
                        }
                        report.failed += 1;
                    }
                }
            }

            self.cache.remove_entry(&session);
            report.drained += 1;
        }

        info!(
            drained = report.drained,
            persisted = report.persisted,
            failed = report.failed,
            "Session manager shut down"
        );
        report
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn check_key(&self, id: &SessionId, session: &Session) -> Result<()> {
        if session.id() != id {
            error!(key = %id, session_id = %session.id(), "Cache entry stored under the wrong key");
            return Err(Error::InvariantViolation(format!(
                "session {} cached under key {id}",
                session.id()
            )));
        }
        Ok(())
    }

    /// The cached session a checkout was taken from, if it is still there.
    fn canonical_for(&self, checkout: &SessionCheckout) -> Result<Option<Arc<Session>>> {
        let Some(session) = self.cache.peek(checkout.id()) else {
            return Ok(None);
        };
        self.check_key(checkout.id(), &session)?;
        if !session.is_valid() || session.generation() != checkout.generation() {
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Look `id` up in the cache, falling back to the store.
    ///
    /// `requested` marks ids that came from a client rather than from
    /// [`generate_id`](Self::generate_id); only those are loaded on a miss.
    fn resolve(&self, id: &SessionId, now: u64, requested: bool) -> Result<Resolution> {
        loop {
            if let Some(session) = self.cache.get(id) {
                self.check_key(id, &session)?;
                if !session.is_valid() {
                    self.cache.remove_entry(&session);
                    continue;
                }
                match self.checkout_cached(&session, now) {
                    Some(checkout) => return Ok(Resolution::Hit(checkout)),
                    None => continue,
                }
            }

            let Some(store) = &self.store else {
                return Ok(Resolution::Miss);
            };
            if now == 0 {
                return Ok(Resolution::Miss);
            }

            let fresh = Arc::new(Session::new(id.clone(), now, self.config.session_timeout));
            // held from before publication until the initial load settles
            let guard = fresh.load_guard();
            let outcome = self.cache.put_if_absent(Arc::clone(&fresh));
            self.handle_evicted(outcome.evicted);
            if !outcome.inserted {
                // another request created it first
                drop(guard);
                continue;
            }

            let session = &fresh;
            session.handle_or_attach(|| store.create_handle(id));
            self.stats.record_created();

            if !requested {
                let checkout = session.checkout();
                drop(guard);
                debug!(session_id = %id, "Created session");
                return Ok(Resolution::Hit(checkout));
            }

            match store.load(session.handle_or_attach(|| store.create_handle(id))) {
                Ok(data) => {
                    session.apply_loaded(data);
                    session.touch(now);
                    let checkout = session.checkout();
                    drop(guard);
                    debug!(session_id = %id, "Session loaded from store");
                    return Ok(Resolution::Hit(checkout));
                }
                Err(e) if e.is_permanent() => {
                    session.invalidate();
                    self.cache.remove_entry(session);
                    self.stats.record_invalidated();
                    drop(guard);
                    debug!(session_id = %id, "Requested session unknown to store; discarding id");
                    return Ok(Resolution::Killed);
                }
                Err(e) => {
                    self.stats.record_load_failure();
                    let checkout = session.checkout();
                    drop(guard);
                    warn!(session_id = %id, error = %e, "Store unavailable; issuing session without stored content");
                    return Ok(Resolution::Hit(checkout));
                }
            }
        }
    }

    /// Check out a session already in the cache, reloading it first when it
    /// is idle. `None` if it was invalidated or replaced concurrently.
    fn checkout_cached(&self, session: &Arc<Session>, now: u64) -> Option<SessionCheckout> {
        if self.store.is_some() {
            // wait out an initial load still in flight
            drop(session.load_guard());
        }
        if now == 0 {
            return self.checkout_if_valid(session);
        }

        // an in-flight session always wins over store state
        let mut reset = false;
        if !session.in_use() {
            reset = self.reload(session, now);
        }

        if !reset {
            session.touch(now);
        }
        self.checkout_if_valid(session)
    }

    /// Check out `session` if it is still valid and still the cached entry
    /// for its id. A session reaped or destroyed between lookup and
    /// checkout is released again.
    fn checkout_if_valid(&self, session: &Arc<Session>) -> Option<SessionCheckout> {
        let checkout = session.checkout();
        let cached = self
            .cache
            .peek(session.id())
            .is_some_and(|entry| Arc::ptr_eq(&entry, session));
        if session.is_valid() && cached {
            Some(checkout)
        } else {
            session.release();
            None
        }
    }

    /// Refresh an idle cached session from the store. Returns true if the
    /// store no longer had it and the session was reset to blank.
    fn reload(&self, session: &Session, now: u64) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        if self.config.save_policy == SavePolicy::OnShutdown {
            return false;
        }

        let _guard = session.load_guard();
        // re-check: another request may have loaded and checked it out
        if session.in_use() || !session.is_valid() {
            return false;
        }
        // unsaved local changes are newer than the store, unless another
        // node told us otherwise
        if session.is_dirty() && !session.is_stale() {
            return false;
        }

        let handle = session.handle_or_attach(|| store.create_handle(session.id()));
        match store.load(handle) {
            Ok(data) => {
                session.apply_loaded(data);
                trace!(session_id = %session.id(), "Session reloaded from store");
                false
            }
            Err(e) if e.is_permanent() => {
                session.mark_stale();
                session.reset(now);
                debug!(session_id = %session.id(), "Session vanished from store; reset");
                true
            }
            Err(e) => {
                self.stats.record_load_failure();
                warn!(session_id = %session.id(), error = %e, "Failed to reload session; keeping cached state");
                false
            }
        }
    }

    /// Insert a blank session under `id`, or join one created concurrently.
    fn create(&self, id: &SessionId, now: u64) -> Result<SessionCheckout> {
        loop {
            let fresh = Arc::new(Session::new(id.clone(), now, self.config.session_timeout));
            let outcome = self.cache.put_if_absent(fresh);
            self.handle_evicted(outcome.evicted);

            let session = outcome.session;
            self.check_key(id, &session)?;

            if outcome.inserted {
                if let Some(store) = &self.store {
                    session.handle_or_attach(|| store.create_handle(id));
                }
                self.stats.record_created();
                debug!(session_id = %id, "Created session");
            }

            if !outcome.inserted {
                session.touch(now);
            }
            match self.checkout_if_valid(&session) {
                Some(checkout) => return Ok(checkout),
                None => {
                    self.cache.remove_entry(&session);
                }
            }
        }
    }

    /// Persist dirty sessions pushed out by LRU eviction.
    fn handle_evicted(&self, evicted: Vec<Arc<Session>>) {
        for session in evicted {
            self.stats.record_evicted();
            if session.is_valid() && session.is_dirty() && self.store.is_some() {
                self.persist(&session);
            }
        }
    }

    /// Best-effort persist; failures are logged and counted.
    fn persist(&self, session: &Session) -> bool {
        match self.persist_with_result(session) {
            Ok(()) => true,
            Err(e) => {
                self.stats.record_save_failure();
                warn!(session_id = %session.id(), error = %e, "Failed to persist session");
                false
            }
        }
    }

    fn persist_with_result(&self, session: &Session) -> StoreResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let handle = session.handle_or_attach(|| store.create_handle(session.id()));
        let (data, version) = session.content_snapshot();
        store.save(handle, &data)?;
        session.clear_dirty_if_unchanged(version);
        self.notifier.notify_updated(session.id());
        trace!(session_id = %session.id(), bytes = data.len(), "Session persisted");
        Ok(())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.reaper_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ClusterConfig;
    use crate::memory::MemoryStore;
    use crate::session::Lifecycle;
    use std::time::Duration;

    fn manager_with_store(config: ManagerConfig) -> (SessionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::builder(config)
            .store(store.clone())
            .clock(Arc::new(ManualClock::new(1_000)))
            .build();
        (manager, store)
    }

    #[test]
    fn test_new_session_without_request() {
        let manager = SessionManager::new(ManagerConfig::default());
        let checkout = manager.get_or_create(None).unwrap();
        assert!(checkout.is_new());
        assert!(checkout.is_empty());
        assert_eq!(manager.active_count(), 1);
        assert_eq!(manager.stats().created, 1);
    }

    #[test]
    fn test_short_requested_id_replaced() {
        let manager = SessionManager::new(ManagerConfig::default());
        let checkout = manager.get_or_create(Some("abc")).unwrap();
        assert_ne!(checkout.id().as_str(), "abc");
    }

    #[test]
    fn test_reuse_disabled_replaces_id() {
        let manager = SessionManager::new(ManagerConfig::default().with_reuse_session_id(false));
        let checkout = manager.get_or_create(Some("abcdefgh")).unwrap();
        assert_ne!(checkout.id().as_str(), "abcdefgh");
    }

    #[test]
    fn test_requested_id_reused_without_store() {
        let manager = SessionManager::new(ManagerConfig::default());
        let checkout = manager.get_or_create(Some("abcdefgh")).unwrap();
        assert_eq!(checkout.id().as_str(), "abcdefgh");
        assert!(checkout.is_new());
    }

    #[test]
    fn test_save_and_resume() {
        let (manager, store) = manager_with_store(ManagerConfig::default());
        let mut checkout = manager.get_or_create(None).unwrap();
        let id = checkout.id().clone();
        checkout.set_data(b"cart=1".to_vec());
        manager.save(checkout).unwrap();

        assert_eq!(store.get(id.as_str()), Some(b"cart=1".to_vec()));

        let resumed = manager.get_or_create(Some(id.as_str())).unwrap();
        assert_eq!(resumed.id(), &id);
        assert_eq!(resumed.data(), b"cart=1");
        assert!(!resumed.is_new());
    }

    #[test]
    fn test_load_on_miss() {
        let (manager, store) = manager_with_store(ManagerConfig::default());
        store.insert("abcdefgh", b"from-store".to_vec());

        let checkout = manager.get_or_create(Some("abcdefgh")).unwrap();
        assert_eq!(checkout.id().as_str(), "abcdefgh");
        assert_eq!(checkout.data(), b"from-store");
        assert_eq!(store.load_calls(), 1);
    }

    #[test]
    fn test_kill_path_issues_fresh_id() {
        let (manager, _store) = manager_with_store(ManagerConfig::default());
        let checkout = manager.get_or_create(Some("abcdefgh")).unwrap();
        assert_ne!(checkout.id().as_str(), "abcdefgh");
        assert!(checkout.is_new());
        assert!(!manager.contains("abcdefgh"));
    }

    #[test]
    fn test_get_session_misses() {
        let (manager, _store) = manager_with_store(ManagerConfig::default());
        assert!(manager.get_session("abcdefgh").unwrap().is_none());
        assert!(manager.get_session("ab").unwrap().is_none());

        let memory_only = SessionManager::new(ManagerConfig::default());
        assert!(memory_only.get_session("abcdefgh").unwrap().is_none());
        assert_eq!(memory_only.active_count(), 0);
    }

    #[test]
    fn test_existence_check_does_not_load() {
        let (manager, store) = manager_with_store(ManagerConfig::default());
        store.insert("abcdefgh", vec![1]);
        assert!(manager.get_session_at("abcdefgh", 0).unwrap().is_none());
        assert_eq!(store.load_calls(), 0);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_vanished_session_reset() {
        let (manager, store) = manager_with_store(ManagerConfig::default());
        let mut checkout = manager.get_or_create(None).unwrap();
        let id = checkout.id().clone();
        checkout.set_data(vec![1, 2, 3]);
        manager.save(checkout).unwrap();

        store.remove(&id).unwrap();

        let resumed = manager.get_or_create(Some(id.as_str())).unwrap();
        assert_eq!(resumed.id(), &id);
        assert!(resumed.is_new());
        assert!(resumed.is_empty());
    }

    #[test]
    fn test_transient_reload_keeps_cached_state() {
        let (manager, store) = manager_with_store(ManagerConfig::default());
        let mut checkout = manager.get_or_create(None).unwrap();
        let id = checkout.id().clone();
        checkout.set_data(vec![7]);
        manager.save(checkout).unwrap();

        store.fail_loads_transiently(true);
        let resumed = manager.get_or_create(Some(id.as_str())).unwrap();
        assert_eq!(resumed.data(), &[7]);
        assert_eq!(manager.stats().load_failures, 1);
    }

    #[test]
    fn test_in_use_session_skips_store() {
        let (manager, store) = manager_with_store(ManagerConfig::default());
        store.insert("abcdefgh", vec![1]);
        let first = manager.get_or_create(Some("abcdefgh")).unwrap();
        let loads = store.load_calls();

        let second = manager.get_or_create(Some("abcdefgh")).unwrap();
        assert_eq!(store.load_calls(), loads);
        assert_eq!(second.data(), first.data());
        assert_eq!(manager.cache().peek(first.id()).unwrap().ref_count(), 2);
    }

    #[test]
    fn test_release_without_merge() {
        let manager = SessionManager::new(ManagerConfig::default());
        let mut checkout = manager.get_or_create(None).unwrap();
        let id = checkout.id().clone();
        checkout.set_data(vec![9]);
        manager.release(checkout).unwrap();

        let session = manager.cache().peek(&id).unwrap();
        assert!(!session.in_use());
        assert!(session.is_empty());
    }

    #[test]
    fn test_on_change_policy_skips_unmodified() {
        let (manager, store) = manager_with_store(ManagerConfig::default());
        let checkout = manager.get_or_create(None).unwrap();
        manager.save(checkout).unwrap();
        assert_eq!(store.save_calls(), 0);
    }

    #[test]
    fn test_always_policy_persists_unmodified() {
        let (manager, store) =
            manager_with_store(ManagerConfig::default().with_save_policy(SavePolicy::Always));
        let checkout = manager.get_or_create(None).unwrap();
        manager.save(checkout).unwrap();
        assert_eq!(store.save_calls(), 1);
    }

    #[test]
    fn test_on_shutdown_policy_defers() {
        let (manager, store) =
            manager_with_store(ManagerConfig::default().with_save_policy(SavePolicy::OnShutdown));
        let mut checkout = manager.get_or_create(None).unwrap();
        let id = checkout.id().clone();
        checkout.set_data(vec![5]);
        manager.save(checkout).unwrap();
        assert_eq!(store.save_calls(), 0);
        assert!(manager.cache().peek(&id).unwrap().is_dirty());

        let report = manager.shutdown();
        assert_eq!(report.persisted, 1);
        assert_eq!(store.get(id.as_str()), Some(vec![5]));
    }

    #[test]
    fn test_save_after_destroy_is_discarded() {
        let (manager, store) = manager_with_store(ManagerConfig::default());
        let mut checkout = manager.get_or_create(None).unwrap();
        let id = checkout.id().clone();
        manager.destroy(id.as_str()).unwrap();

        checkout.set_data(vec![1]);
        manager.save(checkout).unwrap();
        assert!(!manager.contains(id.as_str()));
        assert!(!store.contains(id.as_str()));
    }

    #[test]
    fn test_destroy() {
        let (manager, store) = manager_with_store(ManagerConfig::default());
        let mut checkout = manager.get_or_create(None).unwrap();
        let id = checkout.id().clone();
        checkout.set_data(vec![1]);
        manager.save(checkout).unwrap();

        manager.destroy(id.as_str()).unwrap();
        assert!(!manager.contains(id.as_str()));
        assert!(!store.contains(id.as_str()));
        assert_eq!(manager.stats().invalidated, 1);
    }

    #[test]
    fn test_notify_remove_and_update() {
        let (manager, store) = manager_with_store(ManagerConfig::default());
        let mut checkout = manager.get_or_create(None).unwrap();
        let id = checkout.id().clone();
        checkout.set_data(vec![1]);
        manager.save(checkout).unwrap();

        store.insert(id.as_str(), vec![2]);
        manager.notify_update(id.as_str());
        assert_eq!(
            manager.cache().peek(&id).unwrap().lifecycle(),
            Lifecycle::Stale
        );
        let resumed = manager.get_or_create(Some(id.as_str())).unwrap();
        assert_eq!(resumed.data(), &[2]);
        manager.release(resumed).unwrap();

        let session = manager.cache().peek(&id).unwrap();
        manager.notify_remove(id.as_str());
        assert!(!session.is_valid());
        assert!(!manager.contains(id.as_str()));
        // the store copy belongs to whoever sent the notification
        assert!(store.contains(id.as_str()));
    }

    #[test]
    fn test_eviction_persists_dirty_sessions() {
        let (manager, store) = manager_with_store(
            ManagerConfig::default()
                .with_max_sessions(1)
                .with_save_policy(SavePolicy::OnShutdown),
        );
        let mut checkout = manager.get_or_create(None).unwrap();
        let first = checkout.id().clone();
        checkout.set_data(vec![3]);
        manager.save(checkout).unwrap();

        manager.get_or_create(None).unwrap();
        assert!(!manager.contains(first.as_str()));
        assert_eq!(store.get(first.as_str()), Some(vec![3]));
        assert_eq!(manager.stats().evicted, 1);
    }

    #[test]
    fn test_partition_guard() {
        let config = ManagerConfig::default().with_cluster(ClusterConfig::new(0, 2));
        let manager = SessionManager::new(config);

        // 'b' decodes to group 1, owned by node 1
        let checkout = manager.get_or_create(Some("bcdefghij")).unwrap();
        assert_ne!(checkout.id().as_str(), "bcdefghij");
        assert_eq!(checkout.id().group_digit().map(|g| g % 2), Some(0));

        // 'c' decodes to group 2, owned by node 0
        let owned = manager.get_or_create(Some("cdefghijk")).unwrap();
        assert_eq!(owned.id().as_str(), "cdefghijk");
    }

    #[test]
    fn test_closed_manager_rejects_requests() {
        let manager = SessionManager::new(ManagerConfig::default());
        manager.shutdown();
        assert!(matches!(manager.get_or_create(None), Err(Error::Closed)));
        assert!(matches!(manager.start(), Err(Error::Closed)));
        assert_eq!(manager.shutdown(), ShutdownReport::default());
    }

    #[test]
    fn test_closed_manager_rejects_returns() {
        let (manager, store) = manager_with_store(ManagerConfig::default());
        let mut saved = manager.get_or_create(None).unwrap();
        let released = manager.get_or_create(None).unwrap();
        let id = saved.id().clone();
        saved.set_data(vec![4]);
        manager.shutdown();

        assert!(matches!(manager.save(saved), Err(Error::Closed)));
        assert!(matches!(manager.release(released), Err(Error::Closed)));
        assert!(matches!(manager.destroy(id.as_str()), Err(Error::Closed)));
        assert_eq!(store.save_calls(), 0);
        assert_eq!(store.remove_calls(), 0);
    }

    #[test]
    fn test_uncached_session_is_not_checked_out() {
        let (manager, _store) = manager_with_store(ManagerConfig::default());
        let checkout = manager.get_or_create(None).unwrap();
        let id = checkout.id().clone();
        manager.release(checkout).unwrap();

        let session = manager.cache().peek(&id).unwrap();
        manager.cache().remove_entry(&session);

        assert!(manager.checkout_cached(&session, 2_000).is_none());
        assert!(manager.checkout_cached(&session, 0).is_none());
        assert!(!session.in_use());
    }

    #[test]
    fn test_touch_on_resume() {
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = SessionManager::builder(ManagerConfig::default())
            .clock(clock.clone())
            .build();
        let checkout = manager.get_or_create(None).unwrap();
        let id = checkout.id().clone();
        manager.save(checkout).unwrap();

        clock.advance(Duration::from_secs(5));
        let resumed = manager.get_or_create(Some(id.as_str())).unwrap();
        assert_eq!(resumed.last_accessed_at(), 6_000);
        assert_eq!(resumed.created_at(), 1_000);
    }
}
