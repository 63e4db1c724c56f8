//! Transport envelope wrapping a serialized payload.
//!
//! Wire shape:
//!
//! ```json
//! {"body": "<json string>", "properties": [], "headers": {"Content-Type": "application/json", "type": "<tag>"}}
//! ```
//!
//! The body is itself a JSON document stored as a string, so the payload is
//! encoded twice.

use serde::{Deserialize, Serialize};

use closure_core::{Error, Result};

use crate::event::Payload;
use crate::types::TypeTag;

/// Content type stamped on every envelope.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Routing headers of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    #[serde(rename = "Content-Type")]
    pub content_type: String,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
}

/// Outer transport wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub body: String,
    /// Reserved; always written as an empty list.
    #[serde(default = "empty_properties")]
    pub properties: serde_json::Value,
    pub headers: Headers,
}

fn empty_properties() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

impl Envelope {
    /// Serialize `payload` and wrap it under `type_tag`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if the payload cannot be serialized.
    pub fn wrap<P: Payload>(type_tag: TypeTag, payload: &P) -> Result<Self> {
        let body = serde_json::to_string(payload).map_err(|e| Error::encode(e.to_string()))?;
        Ok(Self {
            body,
            properties: empty_properties(),
            headers: Headers {
                content_type: CONTENT_TYPE_JSON.to_string(),
                type_tag,
            },
        })
    }

    /// The discriminator header.
    pub fn type_tag(&self) -> &TypeTag {
        &self.headers.type_tag
    }

    /// Encode the envelope to wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::encode(e.to_string()))
    }

    /// Decode an envelope from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the bytes are not an envelope.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::decode(format!("envelope: {e}")))
    }

    /// Decode the inner payload.
    ///
    /// The type tag is not checked: the body schema alone decides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the body does not match `P`.
    pub fn open<P: Payload>(&self) -> Result<P> {
        serde_json::from_str(&self.body).map_err(|e| Error::decode(format!("body: {e}")))
    }
}

/// Encode `payload` straight to wire bytes.
///
/// # Errors
///
/// Returns [`Error::Encode`] if serialization fails.
pub fn encode<P: Payload>(type_tag: TypeTag, payload: &P) -> Result<Vec<u8>> {
    Envelope::wrap(type_tag, payload)?.to_bytes()
}

/// Decode wire bytes straight to a payload.
///
/// # Errors
///
/// Returns [`Error::Decode`] if either layer fails to decode.
pub fn decode<P: Payload>(data: &[u8]) -> Result<P> {
    Envelope::from_bytes(data)?.open()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::event::{ClosureRequest, ResultEvent};

    #[test]
    fn test_wire_shape() {
        let bytes = encode(TypeTag::closure_request(), &ClosureRequest::new("de-1", 10)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["properties"], serde_json::json!([]));
        assert_eq!(value["headers"]["Content-Type"], "application/json");
        assert_eq!(value["headers"]["type"], TypeTag::CLOSURE_REQUEST);
        assert_eq!(
            value["body"],
            r#"{"deliveryExecutionId":"de-1","closeAt":10}"#
        );
    }

    #[test]
    fn test_round_trip_closure_request() {
        let request = ClosureRequest::new("de-1", 1_700_000_000);
        let bytes = encode(TypeTag::closure_request(), &request).unwrap();

        let envelope = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.type_tag(), &TypeTag::closure_request());
        assert_eq!(envelope.open::<ClosureRequest>().unwrap(), request);
    }

    #[test]
    fn test_round_trip_result() {
        let result = ResultEvent::force_closure("de-2");
        let bytes = encode(TypeTag::result(), &result).unwrap();

        let envelope = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.type_tag(), &TypeTag::result());
        assert_eq!(decode::<ResultEvent>(&bytes).unwrap(), result);
    }

    #[test]
    fn test_decode_accepts_missing_properties_and_extra_fields() {
        let raw = br#"{"body":"{\"deliveryExecutionId\":\"de-3\",\"closeAt\":5}","headers":{"Content-Type":"application/json","type":"x"},"extra":1}"#;
        let request: ClosureRequest = decode(raw).unwrap();
        assert_eq!(request, ClosureRequest::new("de-3", 5));
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode::<ClosureRequest>(b"not json"),
            Err(Error::Decode { .. })
        ));

        let wrong_body = encode(TypeTag::result(), &ResultEvent::force_closure("de-4")).unwrap();
        assert!(matches!(
            decode::<ClosureRequest>(&wrong_body),
            Err(Error::Decode { .. })
        ));
    }
}
