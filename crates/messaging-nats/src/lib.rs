//! NATS transport for the messaging crate.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod driver;
mod error;
mod headers;

pub use driver::{NatsDriver, NatsDriverOptions};
pub use error::Error;
