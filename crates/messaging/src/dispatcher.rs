//! Routes delivered messages to the cancellation worker, the response
//! matchers or the registered handlers.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::active::ActiveHandlers;
use crate::cancel::is_cancel_request;
use crate::driver::MessageSink;
use crate::envelope::{IncomingEnvelope, Message};
use crate::handler::{HandlerContext, HandlerRegistry, MessageHandler};
use crate::identity::ServiceIdentity;
use crate::matcher::ResponseMatcherCollection;
use crate::metrics::{MessageBusMetrics, ProcessStatus, normalize_subject};
use crate::routes::{MessageRoute, MessageRoutes};

/// What happened to a delivered message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum DispatchOutcome {
    /// Queued for the cancellation worker.
    Cancel,

    /// A response, claimed by a matcher or dropped.
    Response {
        /// Whether a matcher claimed it.
        matched: bool,
    },

    /// No handler for the type.
    Ignored,

    /// Ran the handlers.
    Handled {
        /// Handlers that succeeded.
        succeeded: usize,
        /// Handlers that failed.
        failed: usize,
    },
}

pub(crate) struct MessageDispatcher {
    pub(crate) identity: ServiceIdentity,
    pub(crate) separator: String,
    pub(crate) registry: Arc<RwLock<HandlerRegistry>>,
    pub(crate) active: ActiveHandlers,
    pub(crate) matchers: ResponseMatcherCollection,
    pub(crate) routes: Arc<Mutex<MessageRoutes>>,
    pub(crate) metrics: Arc<dyn MessageBusMetrics>,
    pub(crate) cancel_sender: mpsc::UnboundedSender<IncomingEnvelope>,
}

impl MessageDispatcher {
    /// Whether `message` is routed without running handlers: cancels go
    /// to their worker and responses to the matchers.
    pub(crate) fn routes_inline(message: &Message) -> bool {
        is_cancel_request(message) || message.as_response().is_some()
    }

    pub(crate) async fn dispatch(
        &self,
        envelope: IncomingEnvelope,
        sink: Arc<dyn MessageSink>,
    ) -> DispatchOutcome {
        if is_cancel_request(&envelope.message) {
            if self.cancel_sender.send(envelope).is_err() {
                warn!("cancellation worker is not running, dropping cancel request");
            }
            return DispatchOutcome::Cancel;
        }

        let envelope = match envelope.into_response() {
            Ok(response) => {
                let matched = self.matchers.match_response(&response);
                if !matched {
                    debug!(
                        request_id = %response.response.request_id(),
                        "dropping response without a pending request"
                    );
                }
                return DispatchOutcome::Response { matched };
            }
            Err(envelope) => envelope,
        };

        let subject = normalize_subject(&envelope.subject, &self.separator);
        let message_type = envelope.message.body_type().to_string();
        self.record_route(&envelope, &subject, &message_type);

        let handlers = self.registry.read().find(&message_type);
        if handlers.is_empty() {
            trace!(subject = %subject, message_type = %message_type, "no handler registered");
            self.metrics
                .processed(&subject, &message_type, ProcessStatus::Ignored, None);
            return DispatchOutcome::Ignored;
        }

        let envelope = Arc::new(envelope);
        let guard = envelope.request().map(|request| {
            self.active.enter(
                request,
                envelope.clone(),
                handlers
                    .iter()
                    .map(|handler| handler.name().to_string())
                    .collect(),
            )
        });
        let token = guard
            .as_ref()
            .map_or_else(CancellationToken::new, |guard| guard.token());
        let context = HandlerContext::new(envelope.clone(), token, sink);

        let statuses = if let [handler] = handlers.as_slice() {
            vec![self.execute(handler, context, &subject, &message_type).await]
        } else {
            join_all(handlers.iter().map(|handler| {
                self.execute(handler, context.clone(), &subject, &message_type)
            }))
            .await
        };
        drop(guard);

        let failed = statuses
            .iter()
            .filter(|status| **status == ProcessStatus::Error)
            .count();
        DispatchOutcome::Handled {
            succeeded: statuses.len() - failed,
            failed,
        }
    }

    async fn execute(
        &self,
        handler: &Arc<dyn MessageHandler>,
        context: HandlerContext,
        subject: &str,
        message_type: &str,
    ) -> ProcessStatus {
        let started = Instant::now();

        let status = match handler.process(context).await {
            Ok(()) => ProcessStatus::Success,
            Err(e) => {
                error!(
                    handler = handler.name(),
                    message_type,
                    error = %e,
                    "handler failed to process message"
                );
                ProcessStatus::Error
            }
        };

        self.metrics
            .processed(subject, message_type, status, Some(started.elapsed()));
        status
    }

    fn record_route(&self, envelope: &IncomingEnvelope, subject: &str, message_type: &str) {
        self.routes.lock().add(MessageRoute {
            message_type: message_type.to_string(),
            subject: subject.to_string(),
            subscription: envelope.subscribed_subject.clone(),
            sender: envelope.sender().unwrap_or("unknown").to_string(),
            receiver: self.identity.to_string(),
        });
    }
}
