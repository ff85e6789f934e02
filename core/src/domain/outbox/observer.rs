use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::domain::{common::CoreError, outbox::entities::OutboxEntry};

/// Summary of one dispatcher polling cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub fetched: usize,
    pub published: usize,
    pub retried: usize,
    pub failed: usize,
    /// Entries not attempted: backing off, or queued behind an undelivered entry
    /// of the same aggregate.
    pub deferred: usize,
    /// Entries another dispatcher settled first.
    pub skipped: usize,
}

impl BatchReport {
    pub fn merge(&mut self, other: BatchReport) {
        self.fetched += other.fetched;
        self.published += other.published;
        self.retried += other.retried;
        self.failed += other.failed;
        self.deferred += other.deferred;
        self.skipped += other.skipped;
    }
}

/// Hooks fired by the dispatcher.
#[cfg_attr(test, mockall::automock)]
pub trait DispatchObserver: Send + Sync {
    fn on_published(&self, entry: &OutboxEntry);

    fn on_retry_scheduled(&self, entry: &OutboxEntry, error: &CoreError);

    /// Fired once per entry, by the dispatcher whose update parked it as `FAILED`.
    fn on_permanent_failure(&self, entry: &OutboxEntry, error: &CoreError);

    fn on_batch(&self, report: &BatchReport, elapsed: Duration);
}

/// Running totals since process start.
#[derive(Debug, Default)]
pub struct DispatchStats {
    published: AtomicU64,
    retried: AtomicU64,
    permanently_failed: AtomicU64,
    batches: AtomicU64,
    last_batch_millis: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub published: u64,
    pub retried: u64,
    pub permanently_failed: u64,
    pub batches: u64,
    pub last_batch_millis: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            permanently_failed: self.permanently_failed.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            last_batch_millis: self.last_batch_millis.load(Ordering::Relaxed),
        }
    }
}

/// Logs dispatcher events and keeps [`DispatchStats`] up to date.
#[derive(Clone, Default)]
pub struct TracingObserver {
    stats: Arc<DispatchStats>,
}

impl TracingObserver {
    pub fn new(stats: Arc<DispatchStats>) -> Self {
        Self { stats }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }
}

impl DispatchObserver for TracingObserver {
    fn on_published(&self, entry: &OutboxEntry) {
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        info!(
            entry_id = %entry.id,
            aggregate_type = %entry.aggregate_type,
            aggregate_id = %entry.aggregate_id,
            topic = %entry.topic,
            attempts = entry.attempts,
            "Outbox entry published"
        );
    }

    fn on_retry_scheduled(&self, entry: &OutboxEntry, error: &CoreError) {
        self.stats.retried.fetch_add(1, Ordering::Relaxed);
        warn!(
            entry_id = %entry.id,
            topic = %entry.topic,
            attempts = entry.attempts,
            next_attempt_at = %entry.next_attempt_at,
            error = %error,
            "Outbox delivery failed, retry scheduled"
        );
    }

    fn on_permanent_failure(&self, entry: &OutboxEntry, error: &CoreError) {
        self.stats.permanently_failed.fetch_add(1, Ordering::Relaxed);
        error!(
            entry_id = %entry.id,
            aggregate_type = %entry.aggregate_type,
            aggregate_id = %entry.aggregate_id,
            topic = %entry.topic,
            attempts = entry.attempts,
            last_error = ?entry.last_error,
            error = %error,
            "Outbox entry failed permanently, manual intervention required"
        );
    }

    fn on_batch(&self, report: &BatchReport, elapsed: Duration) {
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.stats.last_batch_millis.store(millis, Ordering::Relaxed);
        if report.fetched > 0 {
            info!(
                fetched = report.fetched,
                published = report.published,
                retried = report.retried,
                failed = report.failed,
                deferred = report.deferred,
                skipped = report.skipped,
                elapsed_ms = millis,
                "Outbox batch dispatched"
            );
        } else {
            debug!(elapsed_ms = millis, "Outbox poll found nothing to publish");
        }
    }
}
