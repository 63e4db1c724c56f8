//! Envelopes, payloads and broker plumbing for the delivery closure pipeline.
//!
//! - **Payloads**: [`ClosureRequest`] and [`ResultEvent`]
//! - **Envelope**: the JSON transport wrapper, see [`Envelope`]
//! - **Broker**: [`Topic`] / [`Subscription`] capabilities with an in-memory
//!   and a SurrealDB implementation
//! - **Publisher**: [`EventPublisher`], fault-isolated concurrent publishing
//!
//! # Example
//!
//! ```ignore
//! use closure_events::{Broker, ClosureRequest, EventPublisher, InMemoryBroker, TypeTag};
//!
//! #[tokio::main]
//! async fn main() {
//!     let broker = InMemoryBroker::new();
//!     let publisher = EventPublisher::new(broker.topic("closure-requests"), TypeTag::closure_request());
//!
//!     let report = publisher
//!         .publish_all(vec![ClosureRequest::new("de-1", 1_700_000_000)])
//!         .await;
//!     println!("published {}", report.published);
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod broker;
pub mod durable;
pub mod envelope;
pub mod event;
pub mod memory;
pub mod publisher;
pub mod types;

pub use broker::{Acknowledger, Broker, Delivery, Subscription, Topic};
pub use closure_core::{Error, Result};
pub use durable::{SurrealBroker, SurrealBrokerConfig};
pub use envelope::{CONTENT_TYPE_JSON, Envelope, Headers, decode, encode};
pub use event::{ClosureRequest, Payload, ResultEvent};
pub use memory::InMemoryBroker;
pub use publisher::{EventPublisher, PublishReport};
pub use types::{MessageId, TypeTag};
