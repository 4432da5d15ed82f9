//! Engine statistics.
//!
//! Counters are updated by the transaction machinery and read through
//! [`Factory::stats`](crate::Factory::stats).
//!
//! ```
//! use stashdb_core::{Config, Factory};
//!
//! let factory = Factory::in_memory(Config::default());
//! let stats = factory.stats();
//! assert_eq!(stats.transactions_committed, 0);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine statistics.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct EngineStats {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    requests_failed: AtomicU64,
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    journal_records: AtomicU64,
}

impl EngineStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one appended journal record of `bytes` bytes.
    pub(crate) fn record_journal_append(&self, bytes: u64) {
        self.journal_records.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            journal_records: self.journal_records.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of engine statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Read requests executed (`get`, `get_all`, `count`).
    pub reads: u64,
    /// Write requests executed (`put`, `add`).
    pub writes: u64,
    /// Delete requests executed (`delete`, `clear`).
    pub deletes: u64,
    /// Requests that resolved with an error.
    pub requests_failed: u64,
    /// Transactions started.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions aborted.
    pub transactions_aborted: u64,
    /// Journal bytes appended.
    pub bytes_written: u64,
    /// Encoded value bytes returned by reads.
    pub bytes_read: u64,
    /// Journal records appended.
    pub journal_records: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(EngineStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_operations() {
        let stats = EngineStats::new();

        stats.record_read(100);
        stats.record_read(50);
        stats.record_write();
        stats.record_journal_append(200);

        let snap = stats.snapshot();
        assert_eq!(snap.reads, 2);
        assert_eq!(snap.bytes_read, 150);
        assert_eq!(snap.writes, 1);
        assert_eq!(snap.bytes_written, 200);
        assert_eq!(snap.journal_records, 1);
    }

    #[test]
    fn record_transactions() {
        let stats = EngineStats::new();

        stats.record_transaction_start();
        stats.record_transaction_start();
        stats.record_transaction_commit();
        stats.record_transaction_abort();

        let snap = stats.snapshot();
        assert_eq!(snap.transactions_started, 2);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.transactions_aborted, 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(EngineStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_read(1);
                    s.record_write();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.reads, 1000);
        assert_eq!(snap.writes, 1000);
    }
}
