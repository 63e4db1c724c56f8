//! Consumer passes over the SurrealDB broker on an in-memory engine.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use closure_core::{FixedClock, Store, StoreConfig};
use closure_events::{
    Broker, ClosureRequest, EventPublisher, SurrealBroker, SurrealBrokerConfig, TypeTag, encode,
};
use closure_timers::{AckMode, ClosureConsumer, ConsumerConfig};

const REQUESTS: &str = "closure-requests";
const RESULTS: &str = "closure-results";
const NOW: i64 = 1_700_000_000;

async fn broker(database: &str, lease: Duration) -> SurrealBroker {
    let store = Store::connect(&StoreConfig::in_memory().with_database(database))
        .await
        .unwrap();
    SurrealBroker::with_config(
        store,
        SurrealBrokerConfig {
            poll_interval: Duration::from_millis(20),
            lease,
            batch_size: 10,
        },
    )
}

#[tokio::test]
async fn test_after_processing_pass_ends_when_lease_is_shorter_than_window() {
    let broker = broker("short_lease", Duration::from_millis(300)).await;
    let data = encode(TypeTag::closure_request(), &ClosureRequest::new("de-1", NOW + 60)).unwrap();
    broker.topic(REQUESTS).publish(data).await.unwrap();

    let consumer = ClosureConsumer::new(
        ConsumerConfig {
            idle_window: Duration::from_secs(1),
            concurrency: 4,
            ack_mode: AckMode::AfterProcessing,
        },
        EventPublisher::new(broker.topic(RESULTS), TypeTag::result()),
        broker.topic(REQUESTS),
    )
    .with_clock(Arc::new(FixedClock::at_unix_secs(NOW)));

    let subscription = broker.subscribe(REQUESTS).await.unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), consumer.run(subscription))
        .await
        .unwrap();

    assert_eq!(report.received, 1);
    assert_eq!(report.not_due, 1);
    assert_eq!(report.requeues_published, 1);
    assert!(report.redelivered >= 1);
    // The original row was acked after its requeue; only the requeued copy remains.
    assert_eq!(broker.depth(REQUESTS).await.unwrap(), 1);
    assert_eq!(broker.depth(RESULTS).await.unwrap(), 0);
}

#[tokio::test]
async fn test_due_request_acked_after_result_publish() {
    let broker = broker("due_ack", Duration::from_secs(30)).await;
    let data = encode(TypeTag::closure_request(), &ClosureRequest::new("de-1", NOW)).unwrap();
    broker.topic(REQUESTS).publish(data).await.unwrap();

    let consumer = ClosureConsumer::new(
        ConsumerConfig {
            idle_window: Duration::from_millis(500),
            concurrency: 4,
            ack_mode: AckMode::AfterProcessing,
        },
        EventPublisher::new(broker.topic(RESULTS), TypeTag::result()),
        broker.topic(REQUESTS),
    )
    .with_clock(Arc::new(FixedClock::at_unix_secs(NOW)));

    let subscription = broker.subscribe(REQUESTS).await.unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), consumer.run(subscription))
        .await
        .unwrap();

    assert_eq!(report.results_published, 1);
    assert_eq!(broker.depth(REQUESTS).await.unwrap(), 0);
    assert_eq!(broker.depth(RESULTS).await.unwrap(), 1);
}
