//! SurrealDB-backed broker.
//!
//! Every topic shares the `broker_message` table. A subscription leases a
//! batch of messages by pushing their `leased_until` into the future; ack
//! deletes the row, nack clears the lease. Rows leased by a consumer that
//! went away become visible again once the lease runs out.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use closure_core::{Error, Result, Store};

use crate::broker::{Acknowledger, Broker, Delivery, Subscription, Topic};
use crate::types::MessageId;

const MESSAGE_TABLE: &str = "broker_message";

/// Tuning for [`SurrealBroker`] subscriptions.
#[derive(Debug, Clone)]
pub struct SurrealBrokerConfig {
    /// How long to wait before polling an empty topic again.
    pub poll_interval: Duration,
    /// How long a delivered message stays invisible to other pulls.
    pub lease: Duration,
    /// Maximum messages leased per poll.
    pub batch_size: usize,
}

impl Default for SurrealBrokerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            lease: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageRecord {
    message_id: String,
    topic: String,
    data: String,
    /// Unix nanoseconds, ordering key.
    published_at: i64,
    /// Unix milliseconds; the row is deliverable when this is in the past.
    leased_until: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct LeasedRow {
    message_id: String,
    data: String,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn query_failed(topic: &str, e: &surrealdb::Error) -> Error {
    Error::subscription(topic, e.to_string())
}

struct SurrealTopic {
    name: String,
    store: Store,
}

#[async_trait]
impl Topic for SurrealTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, data: Vec<u8>) -> Result<MessageId> {
        let data = String::from_utf8(data)
            .map_err(|_| Error::publish(&self.name, "payload is not valid UTF-8"))?;
        let id = MessageId::new();
        let record = MessageRecord {
            message_id: id.as_str().to_string(),
            topic: self.name.clone(),
            data,
            published_at: Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX),
            leased_until: 0,
        };

        let created: Option<MessageRecord> = self
            .store
            .db()
            .create((MESSAGE_TABLE, id.as_str()))
            .content(record)
            .await
            .map_err(|e| Error::publish(&self.name, e.to_string()))?;

        created
            .map(|_| id)
            .ok_or_else(|| Error::publish(&self.name, "store returned no record"))
    }
}

struct SurrealAcker {
    topic: String,
    store: Store,
}

#[async_trait]
impl Acknowledger for SurrealAcker {
    async fn ack(&self, id: &MessageId) -> Result<()> {
        self.store
            .db()
            .query("DELETE type::thing('broker_message', $id)")
            .bind(("id", id.as_str().to_string()))
            .await
            .and_then(surrealdb::Response::check)
            .map_err(|e| Error::acknowledge(id.as_str(), e.to_string()))?;

        debug!(topic = %self.topic, message_id = %id, "Message acknowledged");
        Ok(())
    }

    async fn nack(&self, id: &MessageId) -> Result<()> {
        self.store
            .db()
            .query("UPDATE type::thing('broker_message', $id) SET leased_until = 0")
            .bind(("id", id.as_str().to_string()))
            .await
            .and_then(surrealdb::Response::check)
            .map_err(|e| Error::acknowledge(id.as_str(), e.to_string()))?;

        debug!(topic = %self.topic, message_id = %id, "Message released");
        Ok(())
    }
}

struct SurrealSubscription {
    name: String,
    store: Store,
    config: SurrealBrokerConfig,
    acker: Arc<SurrealAcker>,
    leased: VecDeque<LeasedRow>,
}

impl SurrealSubscription {
    /// Lease the next batch of deliverable rows into the local buffer.
    async fn lease_batch(&mut self) -> Result<usize> {
        let now = now_millis();
        let lease_ms = i64::try_from(self.config.lease.as_millis()).unwrap_or(i64::MAX);

        let rows: Vec<LeasedRow> = self
            .store
            .db()
            .query(format!(
                "SELECT message_id, data, published_at FROM {MESSAGE_TABLE} \
                 WHERE topic = $topic AND leased_until <= $now \
                 ORDER BY published_at ASC LIMIT {}",
                self.config.batch_size.max(1)
            ))
            .bind(("topic", self.name.clone()))
            .bind(("now", now))
            .await
            .map_err(|e| query_failed(&self.name, &e))?
            .take(0)
            .map_err(|e| query_failed(&self.name, &e))?;

        if rows.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = rows.iter().map(|row| row.message_id.clone()).collect();
        self.store
            .db()
            .query(format!(
                "UPDATE {MESSAGE_TABLE} SET leased_until = $until WHERE message_id IN $ids"
            ))
            .bind(("until", now.saturating_add(lease_ms)))
            .bind(("ids", ids))
            .await
            .and_then(surrealdb::Response::check)
            .map_err(|e| query_failed(&self.name, &e))?;

        let count = rows.len();
        self.leased.extend(rows);
        debug!(subscription = %self.name, count, "Leased messages");
        Ok(count)
    }
}

#[async_trait]
impl Subscription for SurrealSubscription {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            if let Some(row) = self.leased.pop_front() {
                let acker: Arc<dyn Acknowledger> = self.acker.clone();
                return Ok(Some(Delivery::new(
                    MessageId::from_string(row.message_id),
                    row.data.into_bytes(),
                    acker,
                )));
            }

            if self.lease_batch().await? == 0 {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
    }
}

/// Broker storing topics in SurrealDB.
#[derive(Debug, Clone)]
pub struct SurrealBroker {
    store: Store,
    config: SurrealBrokerConfig,
}

impl SurrealBroker {
    /// Create a broker over a connected store.
    pub fn new(store: Store) -> Self {
        Self::with_config(store, SurrealBrokerConfig::default())
    }

    /// Create a broker with explicit subscription tuning.
    pub const fn with_config(store: Store, config: SurrealBrokerConfig) -> Self {
        Self { store, config }
    }

    /// Number of messages stored for `topic`, leased or not.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Subscription`] if the count query fails.
    pub async fn depth(&self, topic: &str) -> Result<usize> {
        let ids: Vec<String> = self
            .store
            .db()
            .query(format!(
                "SELECT VALUE message_id FROM {MESSAGE_TABLE} WHERE topic = $topic"
            ))
            .bind(("topic", topic.to_string()))
            .await
            .map_err(|e| query_failed(topic, &e))?
            .take(0)
            .map_err(|e| query_failed(topic, &e))?;
        Ok(ids.len())
    }
}

#[async_trait]
impl Broker for SurrealBroker {
    fn topic(&self, name: &str) -> Arc<dyn Topic> {
        Arc::new(SurrealTopic {
            name: name.to_string(),
            store: self.store.clone(),
        })
    }

    async fn subscribe(&self, name: &str) -> Result<Box<dyn Subscription>> {
        if self.config.batch_size == 0 {
            warn!(subscription = %name, "Batch size 0 requested, leasing one message per poll");
        }
        Ok(Box::new(SurrealSubscription {
            name: name.to_string(),
            store: self.store.clone(),
            config: self.config.clone(),
            acker: Arc::new(SurrealAcker {
                topic: name.to_string(),
                store: self.store.clone(),
            }),
            leased: VecDeque::new(),
        }))
    }
}
