//! Cache statistics.
//!
//! Counters for monitoring: reads and cache misses, mutations, transaction
//! outcomes, and the results of background commit passes.
//!
//! # Usage
//!
//! ```rust
//! use vellum_core::{CacheManager, Config};
//!
//! let cache = CacheManager::in_memory(Config::manual()).unwrap();
//! let stats = cache.stats();
//! println!("reads: {}, misses: {}", stats.reads, stats.storage_reads);
//! println!("last pass flushed {}", stats.last_flushed);
//! ```

use crate::table::FlushCounts;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache statistics.
///
/// All counters are atomic and can be read while transactions run.
/// The `last_*` fields are gauges overwritten by every commit pass.
#[derive(Debug, Default)]
pub struct CacheStats {
    reads: AtomicU64,
    storage_reads: AtomicU64,
    puts: AtomicU64,
    modifies: AtomicU64,
    removes: AtomicU64,

    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    redos: AtomicU64,
    callback_errors: AtomicU64,

    flush_passes: AtomicU64,
    flush_errors: AtomicU64,
    records_flushed: AtomicU64,
    last_dirty_before: AtomicU64,
    last_dirty_after: AtomicU64,
    last_flushed: AtomicU64,
}

impl CacheStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_storage_read(&self) {
        self.storage_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_modify(&self) {
        self.modifies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_redo(&self) {
        self.redos.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_callback_error(&self) {
        self.callback_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the outcome of one commit pass over all tables.
    pub(crate) fn record_flush_pass(&self, counts: &FlushCounts) {
        self.flush_passes.fetch_add(1, Ordering::Relaxed);
        self.flush_errors
            .fetch_add(counts.errors as u64, Ordering::Relaxed);
        self.records_flushed
            .fetch_add(counts.flushed as u64, Ordering::Relaxed);
        self.last_dirty_before
            .store(counts.dirty_before as u64, Ordering::Relaxed);
        self.last_dirty_after
            .store(counts.dirty_after as u64, Ordering::Relaxed);
        self.last_flushed
            .store(counts.flushed as u64, Ordering::Relaxed);
    }

    /// Total record lookups.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Lookups that missed both caches and went to storage.
    pub fn storage_reads(&self) -> u64 {
        self.storage_reads.load(Ordering::Relaxed)
    }

    /// Total records flushed by commit passes.
    pub fn records_flushed(&self) -> u64 {
        self.records_flushed.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            storage_reads: self.storage_reads.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            modifies: self.modifies.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_rolled_back: self.transactions_rolled_back.load(Ordering::Relaxed),
            redos: self.redos.load(Ordering::Relaxed),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
            flush_passes: self.flush_passes.load(Ordering::Relaxed),
            flush_errors: self.flush_errors.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            last_dirty_before: self.last_dirty_before.load(Ordering::Relaxed),
            last_dirty_after: self.last_dirty_after.load(Ordering::Relaxed),
            last_flushed: self.last_flushed.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Total record lookups.
    pub reads: u64,
    /// Lookups served by the storage engine.
    pub storage_reads: u64,
    /// Records put.
    pub puts: u64,
    /// Records marked modified.
    pub modifies: u64,
    /// Records removed.
    pub removes: u64,
    /// Transactions started (each redo attempt counts).
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions rolled back.
    pub transactions_rolled_back: u64,
    /// Transactions restarted after a conflict.
    pub redos: u64,
    /// Commit or rollback callbacks that panicked.
    pub callback_errors: u64,
    /// Commit passes run.
    pub flush_passes: u64,
    /// Records that failed to flush.
    pub flush_errors: u64,
    /// Records flushed.
    pub records_flushed: u64,
    /// Dirty records when the last pass started.
    pub last_dirty_before: u64,
    /// Dirty records when the last pass finished.
    pub last_dirty_after: u64,
    /// Records flushed by the last pass.
    pub last_flushed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = CacheStats::new();
        stats.record_read();
        stats.record_read();
        stats.record_storage_read();
        stats.record_transaction_start();
        stats.record_transaction_rollback();

        let snap = stats.snapshot();
        assert_eq!(snap.reads, 2);
        assert_eq!(snap.storage_reads, 1);
        assert_eq!(snap.transactions_started, 1);
        assert_eq!(snap.transactions_rolled_back, 1);
        assert_eq!(snap.transactions_committed, 0);
    }

    #[test]
    fn flush_pass_overwrites_gauges() {
        let stats = CacheStats::new();
        stats.record_flush_pass(&FlushCounts {
            dirty_before: 5,
            dirty_after: 2,
            flushed: 3,
            errors: 1,
        });
        stats.record_flush_pass(&FlushCounts {
            dirty_before: 2,
            dirty_after: 0,
            flushed: 2,
            errors: 0,
        });

        let snap = stats.snapshot();
        assert_eq!(snap.flush_passes, 2);
        assert_eq!(snap.records_flushed, 5);
        assert_eq!(snap.flush_errors, 1);
        assert_eq!(snap.last_dirty_before, 2);
        assert_eq!(snap.last_dirty_after, 0);
        assert_eq!(snap.last_flushed, 2);
    }
}
