use std::error::Error as StdError;

use thiserror::Error;

/// A handler failed to process a message.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    /// An error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps another error.
    pub fn from_source<E: StdError + Send + Sync + 'static>(source: E) -> Self {
        Self {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<crate::Error> for HandlerError {
    fn from(error: crate::Error) -> Self {
        Self::from_source(error)
    }
}

impl From<RequestError> for HandlerError {
    fn from(error: RequestError) -> Self {
        Self::from_source(error)
    }
}

/// Why a request handler did not produce a response.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The handler observed cancellation and stopped.
    #[error("request was cancelled")]
    Cancelled,

    /// The handler failed.
    #[error("{0}")]
    Failed(String),

    /// The request body did not match the handler's type.
    #[error("invalid request body: {0}")]
    InvalidBody(#[source] serde_json::Error),

    /// A nested bus operation failed.
    #[error(transparent)]
    Messaging(#[from] crate::Error),
}

impl RequestError {
    /// A generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
