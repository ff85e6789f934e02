use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::watch;

use crate::{
    Service,
    domain::{
        catalog::{entities::TopicRouting, models::Order, ports::CatalogService},
        common::CoreError,
        outbox::{
            dispatcher::{DeliveryOutcome, Dispatcher, DispatcherConfig},
            entities::{OutboxEntry, OutboxEntryId, OutboxState},
            observer::{DispatchStats, MockDispatchObserver, TracingObserver},
            policy::RetryPolicy,
            ports::{BrokerBehavior, MockBrokerClient, MockOutboxStore, OutboxLedger},
        },
        test::order,
    },
};

fn config() -> DispatcherConfig {
    DispatcherConfig {
        batch_size: 100,
        poll_interval: Duration::from_millis(10),
        publish_timeout: Duration::from_millis(200),
        storage_timeout: Duration::from_secs(1),
        concurrency: 4,
        // Zero backoff keeps failed entries due on the next cycle.
        retry: RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
    }
}

fn dispatcher(
    store: &MockOutboxStore,
    broker: &MockBrokerClient,
    config: DispatcherConfig,
) -> (
    Dispatcher<MockOutboxStore, MockBrokerClient, TracingObserver>,
    Arc<DispatchStats>,
) {
    let stats = Arc::new(DispatchStats::default());
    let dispatcher = Dispatcher::new(
        store.clone(),
        broker.clone(),
        TracingObserver::new(stats.clone()),
        config,
    );
    (dispatcher, stats)
}

async fn saved_order(store: &MockOutboxStore) -> Result<OutboxEntryId, CoreError> {
    let service = Service::new(store.clone(), store.clone(), TopicRouting::default());
    Ok(service.save_entity(order()).await?.outbox_entry_id)
}

async fn entry(store: &MockOutboxStore, id: &OutboxEntryId) -> OutboxEntry {
    store
        .get(id)
        .await
        .expect("ledger lookup failed")
        .expect("entry should exist")
}

#[tokio::test]
#[cfg(test)]
async fn test_publishes_on_first_attempt() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let broker = MockBrokerClient::new();
    let id = saved_order(&store).await?;
    let (dispatcher, stats) = dispatcher(&store, &broker, config());

    let report = dispatcher.run_once().await?;

    assert_eq!(report.fetched, 1);
    assert_eq!(report.published, 1);

    let entry = entry(&store, &id).await;
    assert_eq!(entry.state, OutboxState::Published);
    assert_eq!(entry.attempts, 0, "A first-try delivery records no failures");
    assert!(entry.published_at.is_some());

    let delivered = broker.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].topic, "Order_Topic_One");
    assert_eq!(delivered[0].key, entry.aggregate_id);
    assert_eq!(delivered[0].dedup_key, id);
    let payload: Order = serde_json::from_slice(&delivered[0].payload)?;
    assert_eq!(
        payload.id.as_ref().map(|id| id.as_str()),
        Some(entry.aggregate_id.as_str())
    );

    assert_eq!(stats.snapshot().published, 1);
    assert_eq!(stats.snapshot().batches, 1);
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_exhausted_entry_is_parked_as_failed() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let broker = MockBrokerClient::with_script(
        (0..5).map(|_| BrokerBehavior::Reject("broker unreachable".to_string())),
    );
    let id = saved_order(&store).await?;

    let mut observer = MockDispatchObserver::new();
    observer.expect_on_published().never();
    observer
        .expect_on_retry_scheduled()
        .times(4)
        .returning(|_, _| ());
    observer
        .expect_on_permanent_failure()
        .withf(|entry, error| {
            entry.state == OutboxState::Failed
                && matches!(error, CoreError::PermanentPublishFailure { attempts: 5, .. })
        })
        .times(1)
        .returning(|_, _| ());
    observer.expect_on_batch().returning(|_, _| ());

    let dispatcher = Dispatcher::new(store.clone(), broker.clone(), observer, config());

    for _ in 0..6 {
        dispatcher.run_once().await?;
    }

    let entry = entry(&store, &id).await;
    assert_eq!(entry.state, OutboxState::Failed);
    assert_eq!(entry.attempts, 5);
    assert!(
        entry
            .last_error
            .as_deref()
            .is_some_and(|error| error.contains("broker unreachable")),
        "Expected the last broker error to be kept, got {:?}",
        entry.last_error
    );
    assert_eq!(broker.attempts().len(), 5, "No attempt after the budget ran out");
    assert!(broker.delivered().is_empty());
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_unconfirmed_publish_times_out_and_retries() -> Result<(), Box<dyn std::error::Error>>
{
    let store = MockOutboxStore::new();
    let broker = MockBrokerClient::with_script([BrokerBehavior::Stall]);
    let id = saved_order(&store).await?;
    let (dispatcher, stats) = dispatcher(
        &store,
        &broker,
        DispatcherConfig {
            publish_timeout: Duration::from_millis(50),
            ..config()
        },
    );

    let first = dispatcher.run_once().await?;
    assert_eq!(first.retried, 1);
    let after_timeout = entry(&store, &id).await;
    assert_eq!(after_timeout.state, OutboxState::Pending);
    assert_eq!(after_timeout.attempts, 1);
    assert!(
        after_timeout
            .last_error
            .as_deref()
            .is_some_and(|error| error.contains("not confirmed")),
        "Unexpected error: {:?}",
        after_timeout.last_error
    );

    let second = dispatcher.run_once().await?;
    assert_eq!(second.published, 1);
    let published = entry(&store, &id).await;
    assert_eq!(published.state, OutboxState::Published);
    assert_eq!(published.attempts, 1);

    assert_eq!(broker.attempts().len(), 2);
    assert_eq!(stats.snapshot().retried, 1);
    assert_eq!(stats.snapshot().published, 1);
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_backing_off_entry_is_not_attempted() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let broker = MockBrokerClient::with_script([BrokerBehavior::Reject("nack".to_string())]);
    let id = saved_order(&store).await?;
    let (dispatcher, _) = dispatcher(
        &store,
        &broker,
        DispatcherConfig {
            retry: RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(60),
            },
            ..config()
        },
    );

    dispatcher.run_once().await?;
    let report = dispatcher.run_once().await?;

    assert_eq!(report.fetched, 0, "A backing-off aggregate is not fetched");
    assert_eq!(broker.attempts().len(), 1, "Entry should still be backing off");

    let entry = entry(&store, &id).await;
    assert_eq!(entry.attempts, 1);
    assert!(entry.next_attempt_at > Utc::now());
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_dispatch_skips_settled_entry() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let broker = MockBrokerClient::new();
    let id = saved_order(&store).await?;
    let (dispatcher, _) = dispatcher(&store, &broker, config());

    assert_eq!(dispatcher.dispatch(&id).await?, DeliveryOutcome::Published);
    assert_eq!(dispatcher.dispatch(&id).await?, DeliveryOutcome::Skipped);

    assert_eq!(broker.attempts().len(), 1, "Replay must not reach the broker");
    assert_eq!(entry(&store, &id).await.state, OutboxState::Published);
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_dispatch_unknown_entry() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let broker = MockBrokerClient::new();
    let (dispatcher, _) = dispatcher(&store, &broker, config());
    let id = OutboxEntryId::generate();

    let result = dispatcher.dispatch(&id).await;

    assert_eq!(result, Err(CoreError::OutboxEntryNotFound { id }));
    assert!(broker.attempts().is_empty());
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_backing_off_aggregates_do_not_fill_the_batch()
-> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let broker = MockBrokerClient::with_script([
        BrokerBehavior::Reject("nack".to_string()),
        BrokerBehavior::Reject("nack".to_string()),
    ]);
    let start = Utc::now() - TimeDelta::seconds(10);
    for (offset, aggregate) in ["a", "b", "c"].into_iter().enumerate() {
        store.push_entry(OutboxEntry::new(
            "order",
            aggregate,
            "Order_Topic_One",
            aggregate.as_bytes().to_vec(),
            start + TimeDelta::milliseconds(offset as i64),
        ));
    }
    let (dispatcher, _) = dispatcher(
        &store,
        &broker,
        DispatcherConfig {
            batch_size: 2,
            retry: RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(60),
            },
            ..config()
        },
    );

    let first = dispatcher.run_once().await?;
    assert_eq!(first.fetched, 2, "The two oldest entries fill the first batch");
    assert_eq!(first.retried, 2);

    let second = dispatcher.run_once().await?;
    assert_eq!(second.fetched, 1, "Only the newer aggregate is due");
    assert_eq!(second.published, 1);

    let c = store.entries_for("c");
    assert_eq!(c[0].state, OutboxState::Published);
    assert_eq!(
        broker.delivered().iter().map(|m| m.key.as_str()).collect::<Vec<_>>(),
        vec!["c"]
    );
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_concurrent_dispatchers_settle_once() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    // Both dispatchers fetch the entry before either confirmation arrives.
    let broker = MockBrokerClient::with_script([
        BrokerBehavior::Delay(Duration::from_millis(50)),
        BrokerBehavior::Delay(Duration::from_millis(50)),
    ]);
    let id = saved_order(&store).await?;
    let (first, first_stats) = dispatcher(&store, &broker, config());
    let (second, second_stats) = dispatcher(&store, &broker, config());

    let (a, b) = tokio::join!(first.run_once(), second.run_once());
    let (a, b) = (a?, b?);

    let attempts = broker.attempts();
    assert_eq!(attempts.len(), 2, "Both dispatchers publish the entry");
    assert!(attempts.iter().all(|message| message.dedup_key == id));

    assert_eq!(entry(&store, &id).await.state, OutboxState::Published);
    assert_eq!(
        first_stats.snapshot().published + second_stats.snapshot().published,
        1,
        "Exactly one dispatcher wins the PENDING -> PUBLISHED update"
    );
    assert_eq!(a.published + b.published, 1);
    assert_eq!(a.skipped + b.skipped, 1, "The loser sees the entry already settled");
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_concurrent_dispatchers_park_once() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let broker = MockBrokerClient::with_script([
        BrokerBehavior::RejectAfter(Duration::from_millis(50), "nack".to_string()),
        BrokerBehavior::RejectAfter(Duration::from_millis(50), "nack".to_string()),
    ]);
    let id = saved_order(&store).await?;
    let single_attempt = DispatcherConfig {
        retry: RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
        ..config()
    };
    let (first, first_stats) = dispatcher(&store, &broker, single_attempt.clone());
    let (second, second_stats) = dispatcher(&store, &broker, single_attempt);

    let (a, b) = tokio::join!(first.run_once(), second.run_once());
    let (a, b) = (a?, b?);

    assert_eq!(broker.attempts().len(), 2);
    assert_eq!(
        first_stats.snapshot().permanently_failed + second_stats.snapshot().permanently_failed,
        1,
        "Only the dispatcher that wins the failure update reports it"
    );
    assert_eq!(a.failed + b.failed, 1);
    assert_eq!(a.skipped + b.skipped, 1);

    let parked = entry(&store, &id).await;
    assert_eq!(parked.state, OutboxState::Failed);
    assert_eq!(parked.attempts, 1, "The losing failure is not counted twice");
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_aggregate_order_survives_a_failure() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let broker = MockBrokerClient::with_script([BrokerBehavior::Reject("nack".to_string())]);
    let start = Utc::now() - TimeDelta::seconds(10);
    for (offset, payload) in [(0, b"1"), (1, b"2"), (2, b"3")] {
        store.push_entry(OutboxEntry::new(
            "order",
            "o-1",
            "Order_Topic_One",
            payload.to_vec(),
            start + TimeDelta::milliseconds(offset),
        ));
    }
    store.push_entry(OutboxEntry::new(
        "order",
        "o-2",
        "Order_Topic_One",
        b"other".to_vec(),
        start + TimeDelta::milliseconds(5),
    ));
    let (dispatcher, _) = dispatcher(
        &store,
        &broker,
        DispatcherConfig {
            concurrency: 1,
            ..config()
        },
    );

    let first = dispatcher.run_once().await?;
    assert_eq!(first.retried, 1, "Head of o-1 is rejected");
    assert_eq!(first.deferred, 2, "Later o-1 entries wait behind their head");
    assert_eq!(first.published, 1, "o-2 is not held back by o-1");

    let second = dispatcher.run_once().await?;
    assert_eq!(second.published, 3);

    let o1_payloads: Vec<Vec<u8>> = broker
        .delivered()
        .into_iter()
        .filter(|message| message.key == "o-1")
        .map(|message| message.payload)
        .collect();
    assert_eq!(o1_payloads, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
    assert!(
        store
            .entries()
            .iter()
            .all(|entry| entry.state == OutboxState::Published)
    );
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_attempts_never_decrease() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let broker = MockBrokerClient::with_script([
        BrokerBehavior::Reject("nack".to_string()),
        BrokerBehavior::Reject("nack".to_string()),
        BrokerBehavior::Deliver,
    ]);
    let id = saved_order(&store).await?;
    let (dispatcher, _) = dispatcher(&store, &broker, config());

    let mut observed = Vec::new();
    for _ in 0..4 {
        dispatcher.run_once().await?;
        observed.push(entry(&store, &id).await.attempts);
    }

    assert_eq!(observed, vec![1, 2, 2, 2]);
    assert_eq!(entry(&store, &id).await.state, OutboxState::Published);
    Ok(())
}

#[tokio::test]
#[cfg(test)]
async fn test_run_stops_on_shutdown_signal() -> Result<(), Box<dyn std::error::Error>> {
    let store = MockOutboxStore::new();
    let broker = MockBrokerClient::new();
    let id = saved_order(&store).await?;
    let (dispatcher, stats) = dispatcher(&store, &broker, config());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let stopper = async {
        for _ in 0..200 {
            if stats.snapshot().published > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let _ = shutdown_tx.send(true);
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(dispatcher.run(shutdown_rx), stopper)
    })
    .await?;

    assert_eq!(entry(&store, &id).await.state, OutboxState::Published);
    Ok(())
}
