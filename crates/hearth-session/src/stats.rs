//! Session lifecycle counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic counters shared by the manager and the reaper.
#[derive(Debug, Default)]
pub struct SessionStats {
    created: AtomicU64,
    reaped: AtomicU64,
    invalidated: AtomicU64,
    evicted: AtomicU64,
    load_failures: AtomicU64,
    save_failures: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reaped(&self, count: u64) {
        self.reaped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidated(&self) {
        self.invalidated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_save_failure(&self) {
        self.save_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Sessions reaped for idleness since startup.
    pub fn reaped(&self) -> u64 {
        self.reaped.load(Ordering::Relaxed)
    }

    /// Copy the counters alongside the current cache occupancy.
    pub fn snapshot(&self, active: usize, capacity: usize) -> StatsSnapshot {
        StatsSnapshot {
            active,
            capacity,
            created: self.created.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Sessions currently cached.
    pub active: usize,
    /// Cache capacity.
    pub capacity: usize,
    pub created: u64,
    /// Sessions expired by the reaper.
    pub reaped: u64,
    pub invalidated: u64,
    pub evicted: u64,
    pub load_failures: u64,
    pub save_failures: u64,
}
