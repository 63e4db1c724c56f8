//! Identifier and discriminator types for the events crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Broker-assigned identifier of a published message.
///
/// Locally generated messages use a ULID; messages received from an
/// external broker keep whatever identifier the broker handed out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Create a new unique message ID.
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Create a message ID from an existing string.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wire discriminator carried in the envelope `type` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTag(String);

impl TypeTag {
    /// Default discriminator for closure requests.
    pub const CLOSURE_REQUEST: &'static str = r"App\Messenger\Message\DeliveryExecutionClosureMessage";

    /// Default discriminator for closure results.
    pub const RESULT: &'static str = r"App\Messenger\Message\DeliveryExecutionResultMessage";

    /// Create a tag from an arbitrary discriminator string.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The default closure request tag.
    pub fn closure_request() -> Self {
        Self::new(Self::CLOSURE_REQUEST)
    }

    /// The default result tag.
    pub fn result() -> Self {
        Self::new(Self::RESULT)
    }

    /// Get the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn test_message_id_display() {
        let id = MessageId::from_string("msg-42");
        assert_eq!(id.to_string(), "msg-42");
        assert_eq!(id.as_str(), "msg-42");
    }

    #[test]
    fn test_type_tag_defaults() {
        assert!(TypeTag::closure_request().as_str().ends_with("DeliveryExecutionClosureMessage"));
        assert_ne!(TypeTag::closure_request(), TypeTag::result());
    }
}
