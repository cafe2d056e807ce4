use fleet_messaging::codec::CodecError;
use fleet_messaging::driver::DriverError;
use thiserror::Error;

/// Errors raised by the NATS driver.
#[derive(Debug, Error)]
pub enum Error {
    /// Payload could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Every connection attempt failed.
    #[error("failed to connect after {attempts} attempts: {kind}")]
    Connect {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        kind: async_nats::ConnectErrorKind,
    },

    /// Flushing the connection failed.
    #[error("failed to flush: {0}")]
    Flush(async_nats::client::FlushErrorKind),

    /// The driver was used before `start` or after `stop`.
    #[error("nats driver is not started")]
    NotStarted,

    /// Publishing failed.
    #[error("failed to publish: {0}")]
    Publish(async_nats::client::PublishErrorKind),

    /// Subscribing failed.
    #[error("failed to subscribe to '{subject}': {message}")]
    Subscribe {
        /// Subject of the subscription.
        subject: String,
        /// Reported failure.
        message: String,
    },
}

impl DriverError for Error {}
