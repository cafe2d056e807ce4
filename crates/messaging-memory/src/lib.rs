//! In-process transport for the messaging crate.
//!
//! A [`MemoryBroker`] routes messages between any number of
//! [`MemoryDriver`]s sharing it, with NATS-style subject matching and queue
//! groups. Useful for tests and single-process deployments.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod broker;
mod driver;
mod error;

pub use broker::{MemoryBroker, WireMessage, subject_matches};
pub use driver::{MemoryDriver, MemoryDriverOptions};
pub use error::Error;
