use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::codec::CodecError;
use crate::driver::DriverError;
use crate::envelope::ErrorCode;

/// Errors surfaced by the message bus.
#[derive(Debug, Error)]
pub enum Error {
    /// Body codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Transport failure.
    #[error("driver error: {0}")]
    Driver(#[source] Box<dyn StdError + Send + Sync>),

    /// The bus was dropped while an operation depended on it.
    #[error("message bus is no longer running")]
    BusDropped,

    /// A second request handler claimed an already handled type.
    #[error("request type '{message_type}' is already handled by '{existing}'")]
    DuplicateRequestHandler {
        /// The contested type.
        message_type: String,
        /// Name of the registered handler.
        existing: String,
    },

    /// `limit` must be at least one.
    #[error("request limit must be at least 1, got {0}")]
    InvalidLimit(usize),

    /// `timeout` must be at least one millisecond.
    #[error("request timeout must be at least 1ms, got {0:?}")]
    InvalidTimeout(Duration),

    /// The stream ended before any response arrived.
    #[error("no response received")]
    NoResponse,

    /// Replying requires a request.
    #[error("cannot reply to a message that is not a request")]
    NotARequest,

    /// Path parse, bind or render failure.
    #[error(transparent)]
    Path(#[from] crate::path::Error),

    /// The responder replied with an error.
    #[error("remote handler replied '{code}': {}", .message.as_deref().unwrap_or("no details"))]
    RemoteError {
        /// Error category.
        code: ErrorCode,
        /// Detail sent by the responder.
        message: Option<String>,
    },

    /// Some requests did not collect all their responses in time.
    #[error(transparent)]
    RequestTimeout(#[from] RequestTimeoutError),

    /// A reply must carry the id of the request it answers.
    #[error("response mismatch: requestId {actual} does not match request {expected}")]
    ResponseMismatch {
        /// Id of the request being answered.
        expected: Uuid,
        /// `requestId` carried by the response.
        actual: Uuid,
    },

    /// JSON failure.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// A response body had a different type than expected.
    #[error("expected a '{expected}' response, got '{actual}'")]
    UnexpectedResponse {
        /// Type the caller asked for.
        expected: String,
        /// Type received.
        actual: String,
    },
}

impl Error {
    /// Wraps a driver error.
    pub fn driver<E: DriverError>(error: E) -> Self {
        Self::Driver(Box::new(error))
    }
}

/// Requests that were still outstanding when their batch timed out.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("{} request(s) timed out after {elapsed:?}", .outstanding.len())]
pub struct RequestTimeoutError {
    /// Ids still waiting for responses, in registration order.
    pub outstanding: Vec<Uuid>,

    /// Time since the batch started.
    pub elapsed: Duration,
}
