//! Command implementations.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use closure_core::{Store, StoreConfig};
use closure_events::{Broker, EventPublisher, SurrealBroker};
use closure_timers::{ClosureConsumer, ExpiryScanner, SurrealTimerStore, TimerKey};

use crate::config::{ConsumeSettings, ScanSettings};

async fn connect(config: &StoreConfig) -> Result<Store> {
    let store = Store::connect(config)
        .await
        .with_context(|| format!("Failed to connect to store at {}", config.url))?;
    store.health_check().await.context("Store health check failed")?;
    Ok(store)
}

/// Scan the timer key space once and publish a closure request per expired key.
pub async fn scan(store: &StoreConfig, settings: ScanSettings) -> Result<()> {
    let store = connect(store).await?;
    let timers = Arc::new(SurrealTimerStore::new(store.clone()));
    let scanner = ExpiryScanner::new(timers, settings.namespace, settings.unit);

    let report = scanner
        .scan()
        .await
        .with_context(|| format!("Failed to scan namespace '{}'", scanner.namespace()))?;

    if report.delete_failed {
        warn!(
            namespace = %scanner.namespace(),
            due = report.due.len(),
            "Expired keys were not deleted and will be found again by the next scan"
        );
    }

    let broker = SurrealBroker::new(store);
    let publisher = EventPublisher::new(broker.topic(&settings.request_topic), settings.request_type);
    let published = publisher.publish_all(report.closure_requests()).await;

    info!(
        namespace = %scanner.namespace(),
        topic = %publisher.topic_name(),
        type_tag = %publisher.type_tag().as_str(),
        due = report.due.len(),
        published = published.published,
        failed = published.failed,
        "Scan complete"
    );
    Ok(())
}

/// Run one idle-windowed consume pass.
pub async fn consume(store: &StoreConfig, settings: ConsumeSettings) -> Result<()> {
    let store = connect(store).await?;
    let broker = SurrealBroker::new(store);

    let subscription = broker
        .subscribe(&settings.request_topic)
        .await
        .with_context(|| format!("Failed to subscribe to '{}'", settings.request_topic))?;

    let results = EventPublisher::new(broker.topic(&settings.result_topic), settings.result_type);
    let consumer = ClosureConsumer::new(settings.consumer, results, broker.topic(&settings.request_topic));
    let report = consumer.run(subscription).await;

    if report.publish_failed > 0 {
        warn!(publish_failed = report.publish_failed, "Some publishes failed during the pass");
    }
    Ok(())
}

/// Write one timer key.
pub async fn schedule(store: &StoreConfig, key: TimerKey) -> Result<()> {
    let store = connect(store).await?;
    SurrealTimerStore::new(store)
        .insert(&key)
        .await
        .with_context(|| format!("Failed to write timer key '{key}'"))?;

    info!(key = %key, "Timer scheduled");
    Ok(())
}
