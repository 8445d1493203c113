//! Metrics collection for dispatcher and ledger monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Ledger service metrics.
pub struct Metrics {
    /// Jobs accepted into the queue.
    pub jobs_submitted: AtomicU64,
    /// Jobs that committed.
    pub jobs_completed: AtomicU64,
    /// Jobs that ran and returned an error.
    pub jobs_failed: AtomicU64,
    /// Submissions refused because shutdown had begun.
    pub jobs_rejected: AtomicU64,
    /// Jobs skipped because their submitter had stopped waiting.
    pub jobs_abandoned: AtomicU64,
    /// Submitters that gave up waiting.
    pub jobs_timed_out: AtomicU64,
    /// Jobs waiting in the queue.
    pub queue_depth: AtomicU64,
    /// Committed transfers.
    pub transfers_committed: AtomicU64,
    /// Committed reversals.
    pub reversals_committed: AtomicU64,
    /// Accounts opened.
    pub accounts_opened: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_rejected: AtomicU64::new(0),
            jobs_abandoned: AtomicU64::new(0),
            jobs_timed_out: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            transfers_committed: AtomicU64::new(0),
            reversals_committed: AtomicU64::new(0),
            accounts_opened: AtomicU64::new(0),
        }
    }

    /// Record a job entering the queue.
    pub fn job_enqueued(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a worker taking a job off the queue.
    pub fn job_dequeued(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record job success.
    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record job failure.
    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a submission refused at shutdown.
    pub fn job_rejected(&self) {
        self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job skipped by a worker.
    pub fn job_abandoned(&self) {
        self.jobs_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a submitter timeout.
    pub fn job_timed_out(&self) {
        self.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed transfer.
    pub fn transfer_committed(&self) {
        self.transfers_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed reversal.
    pub fn reversal_committed(&self) {
        self.reversals_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an opened account.
    pub fn account_opened(&self) {
        self.accounts_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
            jobs_abandoned: self.jobs_abandoned.load(Ordering::Relaxed),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            transfers_committed: self.transfers_committed.load(Ordering::Relaxed),
            reversals_committed: self.reversals_committed.load(Ordering::Relaxed),
            accounts_opened: self.accounts_opened.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let series: [(&str, &str, &str, u64); 10] = [
            ("jobs_submitted", "counter", "Jobs accepted into the queue", snapshot.jobs_submitted),
            ("jobs_completed", "counter", "Jobs that committed", snapshot.jobs_completed),
            ("jobs_failed", "counter", "Jobs that returned an error", snapshot.jobs_failed),
            ("jobs_rejected", "counter", "Submissions refused during shutdown", snapshot.jobs_rejected),
            ("jobs_abandoned", "counter", "Jobs skipped after the submitter left", snapshot.jobs_abandoned),
            ("jobs_timed_out", "counter", "Submitters that stopped waiting", snapshot.jobs_timed_out),
            ("queue_depth", "gauge", "Jobs waiting in the queue", snapshot.queue_depth),
            ("transfers_committed", "counter", "Committed transfers", snapshot.transfers_committed),
            ("reversals_committed", "counter", "Committed reversals", snapshot.reversals_committed),
            ("accounts_opened", "counter", "Accounts opened", snapshot.accounts_opened),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in series {
            out.push_str(&format!(
                "# HELP ledgerline_{name} {help}\n# TYPE ledgerline_{name} {kind}\nledgerline_{name} {value}\n\n"
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_rejected: u64,
    pub jobs_abandoned: u64,
    pub jobs_timed_out: u64,
    pub queue_depth: u64,
    pub transfers_committed: u64,
    pub reversals_committed: u64,
    pub accounts_opened: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.job_enqueued();
        metrics.job_enqueued();
        metrics.job_dequeued();
        metrics.job_completed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_submitted, 2);
        assert_eq!(snapshot.jobs_completed, 1);
        assert_eq!(snapshot.queue_depth, 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.transfer_committed();

        let output = metrics.to_prometheus();
        assert!(output.contains("ledgerline_transfers_committed 1"));
        assert!(output.contains("# TYPE ledgerline_queue_depth gauge"));
    }
}
