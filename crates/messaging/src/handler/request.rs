use std::future::Future;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::{HandlerContext, HandlerError, HandlerKind, MessageHandler, RequestError};
use crate::envelope::{ErrorCode, Response, TypedBody, TypedMessage};

/// Typed request handler.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Request body type.
    type Request: TypedMessage;

    /// Response body type.
    type Response: TypedMessage;

    /// Unique handler name.
    fn name(&self) -> &str;

    /// Free text description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Produces the response.
    async fn process_request(
        &self,
        request: Self::Request,
        context: &HandlerContext,
    ) -> Result<Self::Response, RequestError>;
}

/// Runs a [`RequestHandler`] as a [`MessageHandler`].
#[derive(Debug)]
pub struct RequestHandlerAdapter<H> {
    handler: H,
}

impl<H> RequestHandlerAdapter<H> {
    /// Wraps a handler.
    pub const fn new(handler: H) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<H: RequestHandler> MessageHandler for RequestHandlerAdapter<H> {
    fn name(&self) -> &str {
        self.handler.name()
    }

    fn message_types(&self) -> Vec<String> {
        vec![<H::Request as TypedMessage>::MESSAGE_TYPE.to_string()]
    }

    fn description(&self) -> Option<&str> {
        self.handler.description()
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Request
    }

    async fn process(&self, context: HandlerContext) -> Result<(), HandlerError> {
        respond(&context, || async {
            let body = context
                .request()
                .map(|request| &request.body)
                .ok_or_else(|| RequestError::failed("expected a request"))?;
            let request = body.decode().map_err(RequestError::InvalidBody)?;

            self.handler.process_request(request, &context).await
        })
        .await
    }
}

/// Answers the request in `context` with the outcome of `run`.
///
/// Expired requests are answered with `expired` and `run` is not called.
pub(crate) async fn respond<T, F, Fut>(context: &HandlerContext, run: F) -> Result<(), HandlerError>
where
    T: TypedMessage,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<T, RequestError>> + Send,
{
    let Some(request) = context.request() else {
        return Err(HandlerError::new("cannot respond to a message that is not a request"));
    };

    if request.is_expired_at(Utc::now()) {
        debug!(request_id = %request.id, request_type = request.body_type(), "request expired before processing");
        context
            .reply(Response::error(request.id, ErrorCode::Expired, None))
            .await?;
        return Ok(());
    }

    match run().await {
        Ok(body) => {
            let body = TypedBody::encode(&body).map_err(HandlerError::from_source)?;
            context.reply(Response::success(request.id, body)).await?;
            Ok(())
        }
        Err(error) => {
            let code = match error {
                RequestError::Cancelled => ErrorCode::Cancelled,
                _ => ErrorCode::Exception,
            };

            if let Err(reply_error) = context
                .reply(Response::error(request.id, code, Some(error.to_string())))
                .await
            {
                warn!(request_id = %request.id, error = %reply_error, "failed to send error response");
            }

            Err(error.into())
        }
    }
}
