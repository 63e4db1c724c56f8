//! Broker capabilities consumed by the closure pipeline.
//!
//! The pipeline only ever needs three things from a broker: publish bytes to
//! a topic and wait for the acknowledgement, pull deliveries from a
//! subscription, and ack or nack a delivery. Concrete brokers live in
//! [`crate::memory`] and [`crate::durable`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use closure_core::Result;

use crate::types::MessageId;

/// Settles deliveries on behalf of a subscription.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Confirm the delivery; the broker will not redeliver it.
    async fn ack(&self, id: &MessageId) -> Result<()>;

    /// Reject the delivery; the broker may redeliver it.
    async fn nack(&self, id: &MessageId) -> Result<()>;
}

/// One message pulled from a subscription.
pub struct Delivery {
    id: MessageId,
    data: Vec<u8>,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    /// Create a delivery settled through `acker`.
    pub fn new(id: MessageId, data: Vec<u8>, acker: Arc<dyn Acknowledger>) -> Self {
        Self { id, data, acker }
    }

    /// Broker identifier of the message.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Raw message bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Acknowledge the delivery.
    ///
    /// # Errors
    ///
    /// Returns [`closure_core::Error::Acknowledge`] if the broker rejects the ack.
    pub async fn ack(&self) -> Result<()> {
        self.acker.ack(&self.id).await
    }

    /// Negatively acknowledge the delivery.
    ///
    /// # Errors
    ///
    /// Returns [`closure_core::Error::Acknowledge`] if the broker rejects the nack.
    pub async fn nack(&self) -> Result<()> {
        self.acker.nack(&self.id).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// Outbound channel.
#[async_trait]
pub trait Topic: Send + Sync {
    /// Topic name.
    fn name(&self) -> &str;

    /// Publish `data` and wait for the broker's acknowledgement.
    async fn publish(&self, data: Vec<u8>) -> Result<MessageId>;
}

/// Inbound channel.
///
/// Dropping the subscription cancels consumption. Deliveries handed out but
/// never settled are redelivered according to the broker's own rules.
#[async_trait]
pub trait Subscription: Send {
    /// Subscription name.
    fn name(&self) -> &str;

    /// Wait for the next delivery. `Ok(None)` means the subscription is closed.
    async fn next(&mut self) -> Result<Option<Delivery>>;
}

/// Factory for topics and subscriptions.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Handle to the topic called `name`.
    fn topic(&self, name: &str) -> Arc<dyn Topic>;

    /// Start consuming the subscription called `name`.
    ///
    /// A subscription receives the messages published to the topic of the
    /// same name; each message is delivered to one consumer.
    async fn subscribe(&self, name: &str) -> Result<Box<dyn Subscription>>;
}
