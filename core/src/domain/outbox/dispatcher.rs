use std::collections::{HashMap, hash_map::Entry};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::FuturesUnordered};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info};

use crate::domain::{
    common::CoreError,
    outbox::{
        entities::{OutboxEntry, OutboxEntryId, OutboxState},
        observer::{BatchReport, DispatchObserver},
        policy::RetryPolicy,
        ports::{BrokerClient, OutboundMessage, OutboxLedger},
    },
};

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Entries fetched per polling cycle.
    pub batch_size: usize,
    pub poll_interval: Duration,
    /// Upper bound on waiting for one broker confirmation.
    pub publish_timeout: Duration,
    /// Upper bound on each ledger query or update.
    pub storage_timeout: Duration,
    /// Partitions drained at the same time.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(5),
            storage_timeout: Duration::from_secs(10),
            concurrency: 8,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeliveryOutcome {
    Published,
    RetryScheduled {
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
    },
    Failed {
        attempts: u32,
    },
    /// The entry was not `PENDING`, or another dispatcher settled it first.
    Skipped,
}

/// Drains the outbox ledger into the broker.
///
/// Each cycle fetches the oldest pending entries, groups them by aggregate and
/// drains the groups concurrently. Within a group entries go out one at a
/// time in enqueue order; a group whose head is backing off or just failed
/// waits for a later cycle so that its newer entries never overtake it.
pub struct Dispatcher<L, B, O> {
    ledger: L,
    broker: B,
    observer: O,
    config: DispatcherConfig,
}

impl<L, B, O> Dispatcher<L, B, O>
where
    L: OutboxLedger,
    B: BrokerClient,
    O: DispatchObserver,
{
    pub fn new(ledger: L, broker: B, observer: O, config: DispatcherConfig) -> Self {
        Self {
            ledger,
            broker,
            observer,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Polls until `shutdown` flips to `true` or its sender is dropped. A cycle
    /// that already started runs to completion; no cycle starts afterwards.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            concurrency = self.config.concurrency,
            max_attempts = self.config.retry.max_attempts,
            "Starting outbox dispatcher"
        );
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            match self.run_once().await {
                // A full batch means more work is probably waiting.
                Ok(report) if report.fetched >= self.config.batch_size && report.published > 0 => {
                    ticker.reset_immediately();
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Outbox dispatch cycle failed"),
            }
        }

        info!("Outbox dispatcher stopped");
    }

    /// One polling cycle.
    pub async fn run_once(&self) -> Result<BatchReport, CoreError> {
        let started = Instant::now();
        let now = Utc::now();
        let entries = self
            .bounded(self.ledger.fetch_pending(self.config.batch_size, now))
            .await?;

        let mut report = BatchReport {
            fetched: entries.len(),
            ..Default::default()
        };

        let mut partitions = partition_by_aggregate(entries).into_iter();
        let mut in_flight = FuturesUnordered::new();
        for partition in partitions.by_ref().take(self.config.concurrency.max(1)) {
            in_flight.push(self.drain_partition(partition, now));
        }
        while let Some(partition_report) = in_flight.next().await {
            report.merge(partition_report);
            if let Some(partition) = partitions.next() {
                in_flight.push(self.drain_partition(partition, now));
            }
        }

        self.observer.on_batch(&report, started.elapsed());
        Ok(report)
    }

    /// Delivers a single entry by id, ignoring its backoff. Entries that are not
    /// `PENDING` are left alone and the broker is not called.
    pub async fn dispatch(&self, id: &OutboxEntryId) -> Result<DeliveryOutcome, CoreError> {
        let entry = self
            .bounded(self.ledger.get(id))
            .await?
            .ok_or(CoreError::OutboxEntryNotFound { id: *id })?;
        self.deliver(&entry).await
    }

    async fn drain_partition(&self, entries: Vec<OutboxEntry>, now: DateTime<Utc>) -> BatchReport {
        let mut report = BatchReport::default();
        let mut remaining = entries.len();

        for entry in entries {
            if !entry.is_due(now) {
                report.deferred += remaining;
                break;
            }
            remaining -= 1;

            match self.deliver(&entry).await {
                Ok(DeliveryOutcome::Published) => report.published += 1,
                // Parked entries no longer hold back the rest of the aggregate.
                Ok(DeliveryOutcome::Failed { .. }) => report.failed += 1,
                Ok(DeliveryOutcome::RetryScheduled { .. }) => {
                    report.retried += 1;
                    report.deferred += remaining;
                    break;
                }
                Ok(DeliveryOutcome::Skipped) => {
                    report.skipped += 1;
                    report.deferred += remaining;
                    break;
                }
                Err(e) => {
                    error!(
                        entry_id = %entry.id,
                        partition = %entry.partition_key(),
                        error = %e,
                        "Failed to settle outbox entry"
                    );
                    report.deferred += remaining + 1;
                    break;
                }
            }
        }

        report
    }

    async fn deliver(&self, entry: &OutboxEntry) -> Result<DeliveryOutcome, CoreError> {
        if entry.state != OutboxState::Pending {
            debug!(entry_id = %entry.id, state = %entry.state, "Skipping settled outbox entry");
            return Ok(DeliveryOutcome::Skipped);
        }

        let delivery = timeout(
            self.config.publish_timeout,
            self.broker.publish(OutboundMessage::from(entry)),
        )
        .await
        .unwrap_or_else(|_| {
            Err(CoreError::transient(format!(
                "delivery not confirmed within {} ms",
                self.config.publish_timeout.as_millis()
            )))
        });
        let now = Utc::now();

        match delivery {
            Ok(()) => {
                if !self.bounded(self.ledger.mark_published(&entry.id, now)).await? {
                    debug!(entry_id = %entry.id, "Outbox entry already settled by another dispatcher");
                    return Ok(DeliveryOutcome::Skipped);
                }
                let mut published = entry.clone();
                published.apply_published(now);
                self.observer.on_published(&published);
                Ok(DeliveryOutcome::Published)
            }
            Err(delivery_error) => {
                let transition = entry.failure_transition(now, &self.config.retry, &delivery_error);
                let won = self
                    .bounded(self.ledger.record_failure(&entry.id, entry.attempts, &transition))
                    .await?;
                if !won {
                    debug!(entry_id = %entry.id, "Outbox entry already settled by another dispatcher");
                    return Ok(DeliveryOutcome::Skipped);
                }

                let mut updated = entry.clone();
                updated.apply_failure(&transition);
                if transition.is_permanent() {
                    let failure = CoreError::PermanentPublishFailure {
                        id: entry.id,
                        attempts: transition.attempts,
                    };
                    self.observer.on_permanent_failure(&updated, &failure);
                    Ok(DeliveryOutcome::Failed {
                        attempts: transition.attempts,
                    })
                } else {
                    self.observer.on_retry_scheduled(&updated, &delivery_error);
                    Ok(DeliveryOutcome::RetryScheduled {
                        attempts: transition.attempts,
                        next_attempt_at: transition.next_attempt_at,
                    })
                }
            }
        }
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        timeout(self.config.storage_timeout, operation)
            .await
            .map_err(|_| {
                CoreError::storage(format!(
                    "outbox ledger did not answer within {} ms",
                    self.config.storage_timeout.as_millis()
                ))
            })?
    }
}

/// Groups entries by partition key, keeping first-seen order of groups and
/// the original order inside each group.
fn partition_by_aggregate(entries: Vec<OutboxEntry>) -> Vec<Vec<OutboxEntry>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut partitions: Vec<Vec<OutboxEntry>> = Vec::new();

    for entry in entries {
        match index.entry(entry.partition_key()) {
            Entry::Occupied(slot) => partitions[*slot.get()].push(entry),
            Entry::Vacant(slot) => {
                slot.insert(partitions.len());
                partitions.push(vec![entry]);
            }
        }
    }

    partitions
}
