//! Pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals shared by the fetcher, workers and committer.
#[derive(Debug, Default)]
pub struct PipelineStats {
    fetched: AtomicU64,
    malformed: AtomicU64,
    rejected: AtomicU64,
    persisted: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicU64,
    acked: AtomicU64,
    ack_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages pulled from the broker.
    pub fetched: u64,
    /// Payloads that were not JSON at all (fetcher).
    pub malformed: u64,
    /// Payloads that decoded badly or failed validation (worker).
    pub rejected: u64,
    /// Orders written by this process.
    pub persisted: u64,
    /// Orders the store already held.
    pub duplicates: u64,
    /// Persistence failures and timeouts, left for redelivery.
    pub failed: u64,
    /// Acknowledgments accepted by the broker.
    pub acked: u64,
    pub ack_failures: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fetched: self.fetched.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_fetched(&self) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }
}
