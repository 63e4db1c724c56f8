//! Error taxonomy for the delivery closure coordinator.
//!
//! Only configuration and scan failures are fatal. Every other variant is
//! local to one key, one message or one publish: it is logged and the
//! surrounding batch carries on.

use thiserror::Error;

/// Core error type for closure operations.
#[derive(Debug, Error)]
pub enum Error {
    // Startup
    #[error("configuration error: setting '{setting}' {reason}")]
    Configuration { setting: String, reason: String },

    #[error("connection failed: {reason}")]
    Connection { reason: String },

    // Timer key space
    #[error("failed to scan timer keys under '{namespace}': {reason}")]
    StoreScan { namespace: String, reason: String },

    #[error("failed to delete {count} timer keys: {reason}")]
    StoreDelete { count: usize, reason: String },

    #[error("malformed timer key '{key}': {reason}")]
    KeyParse { key: String, reason: String },

    // Broker
    #[error("publish to topic '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscription '{subscription}' failed: {reason}")]
    Subscription {
        subscription: String,
        reason: String,
    },

    #[error("acknowledgement of message '{message_id}' failed: {reason}")]
    Acknowledge { message_id: String, reason: String },

    // Payloads
    #[error("failed to decode message: {reason}")]
    Decode { reason: String },

    #[error("failed to encode payload: {reason}")]
    Encode { reason: String },
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            setting: setting.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection error.
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Create a store scan error.
    pub fn store_scan(namespace: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreScan {
            namespace: namespace.into(),
            reason: reason.into(),
        }
    }

    /// Create a store delete error.
    pub fn store_delete(count: usize, reason: impl Into<String>) -> Self {
        Self::StoreDelete {
            count,
            reason: reason.into(),
        }
    }

    /// Create a key parse error.
    pub fn key_parse(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KeyParse {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a publish error.
    pub fn publish(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Create a subscription error.
    pub fn subscription(subscription: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Subscription {
            subscription: subscription.into(),
            reason: reason.into(),
        }
    }

    /// Create an acknowledgement error.
    pub fn acknowledge(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Acknowledge {
            message_id: message_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Create an encode error.
    pub fn encode(reason: impl Into<String>) -> Self {
        Self::Encode {
            reason: reason.into(),
        }
    }

    /// Whether this error must abort the run instead of being logged and skipped.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::Connection { .. } | Self::StoreScan { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::configuration("CLOSURE_TOPIC_ID", "is missing").is_fatal());
        assert!(Error::connection("refused").is_fatal());
        assert!(Error::store_scan("ns", "timeout").is_fatal());

        assert!(!Error::key_parse("ns:1:abc", "bad instant").is_fatal());
        assert!(!Error::publish("results", "nack").is_fatal());
        assert!(!Error::decode("missing field").is_fatal());
        assert!(!Error::store_delete(3, "busy").is_fatal());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::configuration("CLOSURE_TOPIC_ID", "is missing");
        assert_eq!(
            err.to_string(),
            "configuration error: setting 'CLOSURE_TOPIC_ID' is missing"
        );

        let err = Error::publish("closure-requests", "broker unavailable");
        assert!(err.to_string().contains("closure-requests"));
    }
}
