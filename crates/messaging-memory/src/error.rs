use fleet_messaging::codec::CodecError;
use fleet_messaging::driver::DriverError;
use thiserror::Error;

/// Errors raised by the in-memory driver.
#[derive(Debug, Error)]
pub enum Error {
    /// Payload could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The driver was used before `start` or after `stop`.
    #[error("memory driver is not started")]
    NotStarted,
}

impl DriverError for Error {}
