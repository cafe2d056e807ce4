//! Message handlers and the context they run in.

mod error;
mod event;
mod registry;
mod request;

pub use error::{HandlerError, RequestError};
pub use event::{EventHandler, EventHandlerAdapter};
pub use registry::HandlerRegistry;
pub use request::{RequestHandler, RequestHandlerAdapter};

pub(crate) use request::respond;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::driver::MessageSink;
use crate::envelope::{IncomingEnvelope, Message, Request, Response};
use crate::error::Error;

/// Whether a handler answers requests or consumes events.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    /// Consumes events. Any number may share a type.
    Event,

    /// Answers requests. At most one per type.
    Request,
}

/// Description of a registered handler, as reported by `info`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerInfo {
    /// Handler name.
    pub name: String,

    /// Types it handles.
    pub message_types: Vec<String>,

    /// Free text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Untyped handler the dispatcher invokes.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Unique handler name.
    fn name(&self) -> &str;

    /// Body types this handler is invoked for.
    fn message_types(&self) -> Vec<String>;

    /// Free text description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Event handlers fan out; request handlers are exclusive per type.
    fn kind(&self) -> HandlerKind {
        HandlerKind::Event
    }

    /// Handles one message.
    async fn process(&self, context: HandlerContext) -> Result<(), HandlerError>;

    /// Summary for diagnostics.
    fn info(&self) -> HandlerInfo {
        HandlerInfo {
            name: self.name().to_string(),
            message_types: self.message_types(),
            description: self.description().map(ToString::to_string),
        }
    }
}

/// What a handler gets for each message.
#[derive(Clone)]
pub struct HandlerContext {
    envelope: Arc<IncomingEnvelope>,
    token: CancellationToken,
    sink: Arc<dyn MessageSink>,
}

impl HandlerContext {
    pub(crate) fn new(
        envelope: Arc<IncomingEnvelope>,
        token: CancellationToken,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            envelope,
            token,
            sink,
        }
    }

    /// The delivered envelope.
    #[must_use]
    pub fn envelope(&self) -> &IncomingEnvelope {
        &self.envelope
    }

    /// The delivered message.
    #[must_use]
    pub fn message(&self) -> &Message {
        &self.envelope.message
    }

    /// The request being handled, if any.
    #[must_use]
    pub fn request(&self) -> Option<&Request> {
        self.envelope.request()
    }

    /// Whether cancellation was requested for this message.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token flagged when cancellation is requested.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fails with [`RequestError::Cancelled`] once cancellation was
    /// requested.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Cancelled`] if the token is flagged.
    pub fn check_cancelled(&self) -> Result<(), RequestError> {
        if self.token.is_cancelled() {
            Err(RequestError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Replies to the request being handled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotARequest`] for events, or any publish error.
    pub async fn reply(&self, response: Response) -> Result<(), Error> {
        self.sink.on_reply_to(&self.envelope, response).await
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("envelope", &self.envelope)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}
