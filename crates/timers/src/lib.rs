//! Delivery execution closure: expiry scanning and idle-windowed consumption.
//!
//! - [`ExpiryScanner`] reads the timer key space once, selects the delivery
//!   executions whose instant passed, and deletes their keys.
//! - [`ClosureConsumer`] turns due [`ClosureRequest`](closure_events::ClosureRequest)s
//!   into force-closure results and requeues the rest when its idle window elapses.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod consumer;
pub mod idle;
pub mod persistence;
pub mod scanner;
pub mod store;

pub use consumer::{AckMode, ClosureConsumer, ConsumerConfig, ConsumerReport, ConsumerState};
pub use idle::{IdleHandle, IdleWindow};
pub use persistence::SurrealTimerStore;
pub use scanner::{ExpiryScanner, ScanReport};
pub use store::{InMemoryTimerStore, TimerKey, TimerStore};
