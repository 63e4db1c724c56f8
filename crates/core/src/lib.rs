//! Core types for the delivery closure coordinator.
//!
//! - **Errors**: one taxonomy shared by every crate, see [`Error::is_fatal`]
//! - **Time**: [`Clock`] and the [`InstantUnit`] timer keys are written in
//! - **Store**: the SurrealDB connection used by the durable adapters

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod clock;
pub mod db;
pub mod error;
pub mod result;

pub use clock::{Clock, FixedClock, InstantUnit, SystemClock};
pub use db::{Credentials, Store, StoreConfig};
pub use error::Error;
pub use result::{Result, ResultExt};
