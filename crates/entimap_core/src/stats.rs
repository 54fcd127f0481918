//! Entity manager statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! manager.flush()?;
//!
//! let stats = manager.stats().snapshot();
//! println!("Committed flushes: {}", stats.flushes_committed);
//! println!("Inserted entities: {}", stats.inserts);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Entity manager counters.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct ManagerStats {
    flushes_committed: AtomicU64,
    flushes_rolled_back: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    relation_writes: AtomicU64,
    lock_violations: AtomicU64,
}

impl ManagerStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_commit(&self) {
        self.flushes_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.flushes_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_inserts(&self, count: u64) {
        self.inserts.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_relation_write(&self) {
        self.relation_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_violation(&self) {
        self.lock_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of committed flushes.
    pub fn flushes_committed(&self) -> u64 {
        self.flushes_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of rolled back flushes.
    pub fn flushes_rolled_back(&self) -> u64 {
        self.flushes_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns the number of inserted entities.
    ///
    /// Counted when the insert statement succeeds, so entities of a rolled
    /// back flush are included.
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Returns the number of updated entities.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Returns the number of deleted entities.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Returns the number of join rows written or deleted.
    pub fn relation_writes(&self) -> u64 {
        self.relation_writes.load(Ordering::Relaxed)
    }

    /// Returns the number of rejected mutations during flush.
    pub fn lock_violations(&self) -> u64 {
        self.lock_violations.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            flushes_committed: self.flushes_committed(),
            flushes_rolled_back: self.flushes_rolled_back(),
            inserts: self.inserts(),
            updates: self.updates(),
            deletes: self.deletes(),
            relation_writes: self.relation_writes(),
            lock_violations: self.lock_violations(),
        }
    }
}

/// A point-in-time snapshot of entity manager statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Committed flushes.
    pub flushes_committed: u64,
    /// Rolled back flushes.
    pub flushes_rolled_back: u64,
    /// Inserted entities.
    pub inserts: u64,
    /// Updated entities.
    pub updates: u64,
    /// Deleted entities.
    pub deletes: u64,
    /// Join rows written or deleted.
    pub relation_writes: u64,
    /// Rejected mutations during flush.
    pub lock_violations: u64,
}
