//! Property-based tests for the envelope codec using proptest.
//!
//! Properties verified:
//! - Encoding then decoding yields a structurally equal payload, for both discriminators
//! - The outer envelope always carries an empty property list and the JSON content type

use closure_events::{
    CONTENT_TYPE_JSON, ClosureRequest, Envelope, ResultEvent, TypeTag, decode, encode,
};
use proptest::prelude::*;

/// Test helper: Unwrap a Result or panic with context
fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

proptest! {
    #[test]
    fn prop_closure_request_round_trip(
        id in "\\PC{0,40}",
        close_at in any::<i64>(),
    ) {
        let request = ClosureRequest::new(id, close_at);
        let bytes = unwrap_result(encode(TypeTag::closure_request(), &request), "encode");

        let decoded: ClosureRequest = unwrap_result(decode(&bytes), "decode");
        prop_assert_eq!(decoded, request);
    }

    #[test]
    fn prop_result_round_trip(id in "[a-zA-Z0-9:_\\-]{1,64}") {
        let result = ResultEvent::force_closure(id);
        let bytes = unwrap_result(encode(TypeTag::result(), &result), "encode");

        let envelope = unwrap_result(Envelope::from_bytes(&bytes), "envelope");
        prop_assert_eq!(envelope.type_tag(), &TypeTag::result());
        prop_assert_eq!(envelope.headers.content_type.as_str(), CONTENT_TYPE_JSON);
        prop_assert_eq!(&envelope.properties, &serde_json::json!([]));

        let decoded: ResultEvent = unwrap_result(envelope.open(), "open");
        prop_assert_eq!(decoded, result);
    }

    #[test]
    fn prop_custom_tag_survives(tag in "[A-Za-z\\\\]{1,60}") {
        let bytes = unwrap_result(
            encode(TypeTag::new(tag.clone()), &ClosureRequest::new("de", 0)),
            "encode",
        );
        let envelope = unwrap_result(Envelope::from_bytes(&bytes), "envelope");
        prop_assert_eq!(envelope.type_tag().as_str(), tag.as_str());
    }
}
