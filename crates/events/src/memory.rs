//! In-memory broker for tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use closure_core::{Error, Result};

use crate::broker::{Acknowledger, Broker, Delivery, Subscription, Topic};
use crate::types::MessageId;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<(MessageId, Vec<u8>)>,
    in_flight: HashMap<MessageId, Vec<u8>>,
    history: Vec<Vec<u8>>,
    failing: bool,
    closed: bool,
    latency: Duration,
}

/// One topic plus its single-consumer queue.
struct TopicQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl TopicQueue {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }
}

#[async_trait]
impl Topic for TopicQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, data: Vec<u8>) -> Result<MessageId> {
        let latency = self.state.lock().await.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        if state.failing {
            return Err(Error::publish(&self.name, "topic is failing"));
        }
        if state.closed {
            return Err(Error::publish(&self.name, "topic is closed"));
        }

        let id = MessageId::new();
        state.history.push(data.clone());
        state.pending.push_back((id.clone(), data));
        drop(state);

        self.notify.notify_one();
        debug!(topic = %self.name, message_id = %id, "Message published");
        Ok(id)
    }
}

#[async_trait]
impl Acknowledger for TopicQueue {
    async fn ack(&self, id: &MessageId) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::acknowledge(id.as_str(), "not in flight"))
    }

    async fn nack(&self, id: &MessageId) -> Result<()> {
        let mut state = self.state.lock().await;
        let data = state
            .in_flight
            .remove(id)
            .ok_or_else(|| Error::acknowledge(id.as_str(), "not in flight"))?;
        state.pending.push_front((id.clone(), data));
        drop(state);

        self.notify.notify_one();
        Ok(())
    }
}

struct InMemorySubscription {
    queue: Arc<TopicQueue>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    fn name(&self) -> &str {
        &self.queue.name
    }

    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            {
                let mut state = self.queue.state.lock().await;
                if let Some((id, data)) = state.pending.pop_front() {
                    state.in_flight.insert(id.clone(), data.clone());
                    let acker: Arc<dyn Acknowledger> = self.queue.clone();
                    return Ok(Some(Delivery::new(id, data, acker)));
                }
                if state.closed {
                    return Ok(None);
                }
            }
            self.queue.notify.notified().await;
        }
    }
}

/// Broker keeping every topic in process memory.
///
/// Besides the [`Broker`] capability it exposes inspection and fault
/// injection hooks used by tests.
#[derive(Default)]
pub struct InMemoryBroker {
    topics: std::sync::Mutex<HashMap<String, Arc<TopicQueue>>>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty broker wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn queue(&self, name: &str) -> Arc<TopicQueue> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TopicQueue::new(name)))
            .clone()
    }

    /// Messages waiting for a consumer, oldest first.
    pub async fn pending(&self, topic: &str) -> Vec<Vec<u8>> {
        let queue = self.queue(topic);
        let state = queue.state.lock().await;
        state.pending.iter().map(|(_, data)| data.clone()).collect()
    }

    /// Number of delivered but unsettled messages.
    pub async fn in_flight(&self, topic: &str) -> usize {
        self.queue(topic).state.lock().await.in_flight.len()
    }

    /// Every message ever accepted by the topic, in publish order.
    pub async fn history(&self, topic: &str) -> Vec<Vec<u8>> {
        self.queue(topic).state.lock().await.history.clone()
    }

    /// Make every publish to `topic` fail (or succeed again).
    pub async fn set_failing(&self, topic: &str, failing: bool) {
        self.queue(topic).state.lock().await.failing = failing;
    }

    /// Delay every publish to `topic` by `latency` before it is acknowledged.
    pub async fn set_latency(&self, topic: &str, latency: Duration) {
        self.queue(topic).state.lock().await.latency = latency;
    }

    /// Close `topic`: subscriptions drain what is pending and then end.
    pub async fn close(&self, topic: &str) {
        let queue = self.queue(topic);
        queue.state.lock().await.closed = true;
        queue.notify.notify_waiters();
        queue.notify.notify_one();
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn topic(&self, name: &str) -> Arc<dyn Topic> {
        self.queue(name)
    }

    async fn subscribe(&self, name: &str) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(InMemorySubscription {
            queue: self.queue(name),
        }))
    }
}
