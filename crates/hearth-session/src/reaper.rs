//! Periodic expiry of idle sessions.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cache::SessionCache;
use crate::clock::Clock;
use crate::notify::ClusterNotifier;
use crate::partition::PartitionOracle;
use crate::session::Session;
use crate::stats::SessionStats;
use crate::store::SessionStore;

/// Shortest interval the scheduled reaper will sleep between cycles.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of one reaper cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Entries examined.
    pub scanned: usize,
    /// Entries in use or not yet idle.
    pub live: usize,
    /// Entries removed from the cache.
    pub reaped: usize,
    /// Reaped entries this node owned and invalidated.
    pub invalidated: usize,
    /// Reaped entries owned by another node, dropped from memory only.
    pub foreign: usize,
    /// Candidates whose invalidation or store removal failed.
    pub failures: usize,
}

/// Scans the cache and expires idle sessions.
pub struct Reaper {
    cache: Arc<SessionCache>,
    oracle: PartitionOracle,
    node_index: u32,
    store: Option<Arc<dyn SessionStore>>,
    notifier: Arc<dyn ClusterNotifier>,
    clock: Arc<dyn Clock>,
    stats: Arc<SessionStats>,
}

impl fmt::Debug for Reaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaper")
            .field("oracle", &self.oracle)
            .field("node_index", &self.node_index)
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl Reaper {
    pub fn new(
        cache: Arc<SessionCache>,
        oracle: PartitionOracle,
        node_index: u32,
        store: Option<Arc<dyn SessionStore>>,
        notifier: Arc<dyn ClusterNotifier>,
        clock: Arc<dyn Clock>,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            cache,
            oracle,
            node_index,
            store,
            notifier,
            clock,
            stats,
        }
    }

    /// Run one cycle at the clock's current time.
    pub fn run_cycle(&self) -> ReapReport {
        self.run_cycle_at(self.clock.now_ms())
    }

    /// Run one cycle as if the time were `now`.
    pub fn run_cycle_at(&self, now: u64) -> ReapReport {
        let window = self
            .store
            .as_ref()
            .map(|store| store.access_window())
            .unwrap_or(Duration::ZERO);

        let mut report = ReapReport::default();
        let mut candidates = Vec::new();

        for session in self.cache.snapshot_values() {
            report.scanned += 1;
            if session.in_use() || !session.is_expired(now, window) {
                report.live += 1;
            } else {
                candidates.push(session);
            }
        }

        for session in candidates {
            // re-check under the cache lock: a request may have checked it
            // out since the scan
            let removed = self
                .cache
                .remove_if(session.id(), |entry| {
                    Arc::ptr_eq(entry, &session) && entry.is_expired(now, window)
                });
            let Some(session) = removed else {
                report.live += 1;
                continue;
            };

            report.reaped += 1;
            session.mark_stale();

            if self.store.is_some() && !self.oracle.owns(session.id(), self.node_index) {
                trace!(session_id = %session.id(), "Reaped foreign session from memory only");
                report.foreign += 1;
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| self.expire(&session))) {
                Ok(true) => report.invalidated += 1,
                Ok(false) => {
                    report.invalidated += 1;
                    report.failures += 1;
                }
                Err(_) => {
                    warn!(session_id = %session.id(), "Panic while expiring session; continuing sweep");
                    report.failures += 1;
                }
            }
        }

        self.stats.record_reaped(report.reaped as u64);

        if report.reaped > 0 {
            debug!(
                scanned = report.scanned,
                reaped = report.reaped,
                invalidated = report.invalidated,
                foreign = report.foreign,
                "Reaped idle sessions"
            );
        }

        report
    }

    /// Invalidate an owned session and tell the store and cluster.
    /// Returns false if the store removal failed.
    fn expire(&self, session: &Session) -> bool {
        session.invalidate();
        self.stats.record_invalidated();

        let mut removed = true;
        if let Some(store) = &self.store
            && let Err(e) = store.remove(session.id())
        {
            warn!(session_id = %session.id(), error = %e, "Failed to remove expired session from store");
            removed = false;
        }

        self.notifier.notify_invalidated(session.id());
        removed
    }

    /// Run cycles every `interval` until `token` is cancelled.
    ///
    /// Each cycle runs on the blocking pool because store calls may block.
    /// A cycle that panics is logged and the schedule continues.
    pub fn spawn(self: Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let interval = interval.max(MIN_INTERVAL);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = token.cancelled() => break,
                }

                if token.is_cancelled() {
                    break;
                }

                let reaper = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || reaper.run_cycle()).await {
                    Ok(report) if report.reaped > 0 => {
                        info!(
                            reaped = report.reaped,
                            live = report.live,
                            total_reaped = self.stats.reaped(),
                            "Reaper cycle complete"
                        );
                    }
                    Ok(report) => {
                        trace!(live = report.live, "Reaper cycle complete");
                    }
                    Err(e) => {
                        warn!(error = %e, "Reaper cycle failed; rescheduling");
                    }
                }
            }

            debug!("Reaper stopped");
        })
    }
}
