use async_trait::async_trait;

use super::{HandlerContext, HandlerError, MessageHandler};
use crate::envelope::TypedMessage;

/// Typed event handler.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Event body type.
    type Event: TypedMessage;

    /// Unique handler name.
    fn name(&self) -> &str;

    /// Free text description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Handles one event.
    async fn process_event(
        &self,
        event: Self::Event,
        context: &HandlerContext,
    ) -> Result<(), HandlerError>;
}

/// Runs an [`EventHandler`] as a [`MessageHandler`].
#[derive(Debug)]
pub struct EventHandlerAdapter<H> {
    handler: H,
}

impl<H> EventHandlerAdapter<H> {
    /// Wraps a handler.
    pub const fn new(handler: H) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<H: EventHandler> MessageHandler for EventHandlerAdapter<H> {
    fn name(&self) -> &str {
        self.handler.name()
    }

    fn message_types(&self) -> Vec<String> {
        vec![<H::Event as TypedMessage>::MESSAGE_TYPE.to_string()]
    }

    fn description(&self) -> Option<&str> {
        self.handler.description()
    }

    async fn process(&self, context: HandlerContext) -> Result<(), HandlerError> {
        let body = context
            .message()
            .body()
            .ok_or_else(|| HandlerError::new("message carries no body"))?;
        let event = body.decode().map_err(HandlerError::from_source)?;

        self.handler.process_event(event, &context).await
    }
}
