//! Typed publishing onto a topic.
//!
//! Every publish is independent: a failure is logged and dropped, never
//! retried, and never affects sibling publishes in the same batch.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info};

use closure_core::{Result, ResultExt};

use crate::broker::Topic;
use crate::envelope::encode;
use crate::event::Payload;
use crate::types::{MessageId, TypeTag};

/// Outcome of a batch publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Publishes acknowledged by the broker.
    pub published: usize,
    /// Publishes that failed at encode, send or acknowledgement.
    pub failed: usize,
}

/// Wraps payloads in envelopes and sends them to one topic.
#[derive(Clone)]
pub struct EventPublisher {
    topic: Arc<dyn Topic>,
    type_tag: TypeTag,
}

impl EventPublisher {
    /// Create a publisher stamping `type_tag` on everything it sends to `topic`.
    pub fn new(topic: Arc<dyn Topic>, type_tag: TypeTag) -> Self {
        Self { topic, type_tag }
    }

    /// Destination topic name.
    pub fn topic_name(&self) -> &str {
        self.topic.name()
    }

    /// The tag stamped on outgoing envelopes.
    pub fn type_tag(&self) -> &TypeTag {
        &self.type_tag
    }

    /// Publish one payload and wait for the broker acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`closure_core::Error::Encode`] or
    /// [`closure_core::Error::Publish`]; nothing is retried.
    pub async fn publish<P: Payload>(&self, payload: &P) -> Result<MessageId> {
        let data = encode(self.type_tag.clone(), payload)?;
        let message_id = self.topic.publish(data).await?;

        info!(
            topic = %self.topic.name(),
            delivery_execution_id = %payload.delivery_execution_id(),
            message_id = %message_id,
            "Message sent"
        );
        Ok(message_id)
    }

    /// Publish one payload, logging instead of returning a failure.
    pub async fn publish_logged<P: Payload>(&self, payload: &P) -> Option<MessageId> {
        self.publish(payload)
            .await
            .inspect_error(|e| {
                error!(
                    topic = %self.topic.name(),
                    delivery_execution_id = %payload.delivery_execution_id(),
                    error = %e,
                    "Failed to send message"
                );
            })
            .ok()
    }

    /// Publish every payload as its own task and wait for all of them.
    pub async fn publish_all<P>(&self, payloads: Vec<P>) -> PublishReport
    where
        P: Payload + 'static,
    {
        let mut tasks = JoinSet::new();
        for payload in payloads {
            let publisher = self.clone();
            tasks.spawn(async move { publisher.publish_logged(&payload).await.is_some() });
        }

        let mut report = PublishReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => report.published = report.published.saturating_add(1),
                Ok(false) => report.failed = report.failed.saturating_add(1),
                Err(e) => {
                    error!(topic = %self.topic.name(), error = %e, "Publish task aborted");
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use super::*;
    use crate::broker::Broker;
    use crate::envelope::{Envelope, decode};
    use crate::event::{ClosureRequest, ResultEvent};
    use crate::memory::InMemoryBroker;

    #[tokio::test]
    async fn test_publish_wraps_in_envelope() {
        let broker = InMemoryBroker::new();
        let publisher = EventPublisher::new(broker.topic("results"), TypeTag::result());

        publisher
            .publish(&ResultEvent::force_closure("de-1"))
            .await
            .unwrap();

        let sent = broker.history("results").await;
        assert_eq!(sent.len(), 1);
        let envelope = Envelope::from_bytes(&sent[0]).unwrap();
        assert_eq!(envelope.type_tag(), &TypeTag::result());
        assert_eq!(
            decode::<ResultEvent>(&sent[0]).unwrap(),
            ResultEvent::force_closure("de-1")
        );
    }

    #[tokio::test]
    async fn test_publish_all_fans_out() {
        let broker = InMemoryBroker::new();
        let publisher = EventPublisher::new(broker.topic("requests"), TypeTag::closure_request());

        let requests: Vec<_> = (0..25)
            .map(|i| ClosureRequest::new(format!("de-{i}"), 100))
            .collect();
        let report = publisher.publish_all(requests).await;

        assert_eq!(report, PublishReport { published: 25, failed: 0 });
        assert_eq!(broker.pending("requests").await.len(), 25);
    }

    #[tokio::test]
    async fn test_publish_all_isolates_failures() {
        let broker = InMemoryBroker::new();
        broker.set_failing("requests", true).await;
        let publisher = EventPublisher::new(broker.topic("requests"), TypeTag::closure_request());

        let report = publisher
            .publish_all(vec![
                ClosureRequest::new("a", 1),
                ClosureRequest::new("b", 2),
            ])
            .await;

        assert_eq!(report, PublishReport { published: 0, failed: 2 });
    }

    #[tokio::test]
    async fn test_publish_all_empty() {
        let broker = InMemoryBroker::new();
        let publisher = EventPublisher::new(broker.topic("requests"), TypeTag::closure_request());
        let report = publisher.publish_all(Vec::<ClosureRequest>::new()).await;
        assert_eq!(report, PublishReport::default());
        assert_eq!(publisher.topic_name(), "requests");
        assert_eq!(publisher.type_tag(), &TypeTag::closure_request());
    }
}
