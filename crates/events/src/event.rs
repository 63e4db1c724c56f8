//! Typed payloads carried inside envelopes.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A payload that can travel inside an [`Envelope`](crate::Envelope).
pub trait Payload: Serialize + DeserializeOwned + Send + Sync {
    /// The delivery execution this payload is about, used for logging.
    fn delivery_execution_id(&self) -> &str;
}

/// Request to force-close a delivery execution once `close_at` has passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureRequest {
    pub delivery_execution_id: String,
    /// Deadline in Unix seconds.
    pub close_at: i64,
}

impl ClosureRequest {
    /// Create a request for `delivery_execution_id` due at `close_at` (Unix seconds).
    pub fn new(delivery_execution_id: impl Into<String>, close_at: i64) -> Self {
        Self {
            delivery_execution_id: delivery_execution_id.into(),
            close_at,
        }
    }

    /// Create a request that is due at `at`.
    pub fn due_at(delivery_execution_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(delivery_execution_id, at.timestamp())
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.close_at
    }

    /// Build the terminal result for this request.
    pub fn resolve(&self) -> ResultEvent {
        ResultEvent::force_closure(self.delivery_execution_id.clone())
    }
}

impl Payload for ClosureRequest {
    fn delivery_execution_id(&self) -> &str {
        &self.delivery_execution_id
    }
}

/// Terminal instruction to the results pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEvent {
    pub id: String,
    pub delivery_execution_id: String,
    pub force_closure: bool,
}

impl ResultEvent {
    /// Create a forced closure result for `delivery_execution_id`.
    pub fn force_closure(delivery_execution_id: impl Into<String>) -> Self {
        let delivery_execution_id = delivery_execution_id.into();
        Self {
            id: delivery_execution_id.clone(),
            delivery_execution_id,
            force_closure: true,
        }
    }
}

impl Payload for ResultEvent {
    fn delivery_execution_id(&self) -> &str {
        &self.delivery_execution_id
    }
}
