//! The message bus facade.

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, trace};
use uuid::Uuid;

use crate::active::ActiveHandlers;
use crate::diagnostics::{InfoHandler, PingHandler, SubscriptionState};
use crate::dispatcher::MessageDispatcher;
use crate::driver::{DriverFeatures, MessageBusDriver, MessageSink};
use crate::envelope::{
    Headers, IncomingEnvelope, Message, OutgoingEnvelope, Request, Response, ResponseEnvelope,
    SENDER_HEADER, TypedBody, TypedMessage,
};
use crate::error::Error;
use crate::handler::{
    EventHandler, EventHandlerAdapter, HandlerRegistry, MessageHandler, RequestHandler,
    RequestHandlerAdapter,
};
use crate::identity::ServiceIdentity;
use crate::matcher::{MatcherHandle, ResponseMatcherCollection};
use crate::metrics::normalize_subject;
use crate::options::BusOptions;
use crate::path::{Destination, PublishPath, Renderer, ReplyPath};
use crate::paths;
use crate::request::RequestOptions;
use crate::routes::{MessageRoute, MessageRoutes};
use crate::subscription::{
    MessageSubscription, MessageSubscriptions, RenderedSubscription, SubscriptionKind,
};

/// Responses to a request batch, ending with [`Error::RequestTimeout`] if
/// some requests were not fully answered in time.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseEnvelope, Error>> + Send>>;

pub(crate) struct BusInner<D: MessageBusDriver> {
    pub(crate) identity: ServiceIdentity,
    pub(crate) instance_id: Uuid,
    pub(crate) driver: D,
    pub(crate) options: BusOptions,
    pub(crate) reply_to: String,
    pub(crate) control: PublishPath,
    pub(crate) subscriptions: Arc<tokio::sync::Mutex<SubscriptionState>>,
    pub(crate) registry: Arc<RwLock<HandlerRegistry>>,
    pub(crate) active: ActiveHandlers,
    pub(crate) matchers: ResponseMatcherCollection,
    pub(crate) routes: Arc<Mutex<MessageRoutes>>,
    pub(crate) dispatcher: MessageDispatcher,
    pub(crate) sink: Arc<dyn MessageSink>,
    pub(crate) cancel_receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<IncomingEnvelope>>>,
    pub(crate) tasks: TaskTracker,
    pub(crate) shutdown: Mutex<CancellationToken>,
}

/// Transport-agnostic message bus bound to one driver.
pub struct MessageBus<D: MessageBusDriver> {
    pub(crate) inner: Arc<BusInner<D>>,
}

impl<D: MessageBusDriver> Clone for MessageBus<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: MessageBusDriver> std::fmt::Debug for MessageBus<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("identity", &self.inner.identity)
            .field("reply_to", &self.inner.reply_to)
            .field("driver", &self.inner.driver)
            .finish_non_exhaustive()
    }
}

impl<D: MessageBusDriver> MessageBus<D> {
    /// Creates a bus. Nothing is subscribed until [`Self::start`].
    ///
    /// The private inbox and the control channels are queued for
    /// subscription, and the ping and info handlers are registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the service name cannot be used in a path.
    pub fn new(identity: ServiceIdentity, driver: D, options: BusOptions) -> Result<Self, Error> {
        let instance_id = Uuid::new_v4();
        let instance = instance_id.to_string();
        let renderer = driver.renderer().clone();
        let inbox_values = [("name", identity.name.as_str()), ("instanceId", instance.as_str())];

        let reply_to = renderer.render_publish(&paths::inbox()?.publish(&inbox_values)?)?;
        let control = paths::control()?.publish(&[])?;

        let mut subscriptions = MessageSubscriptions::default();
        for subscription in [
            MessageSubscription::topic(paths::inbox()?.subscribe(&inbox_values)?),
            MessageSubscription::topic(paths::control()?.subscribe(&[])?),
            MessageSubscription::topic(
                paths::service_control()?.subscribe(&[("name", identity.name.as_str())])?,
            ),
        ] {
            subscriptions.add(render_subscription(&renderer, &identity, &subscription)?);
        }
        let subscriptions = Arc::new(tokio::sync::Mutex::new(SubscriptionState {
            started: false,
            subscriptions,
        }));

        let registry = Arc::new(RwLock::new(HandlerRegistry::new()));
        let routes = Arc::new(Mutex::new(MessageRoutes::new(options.max_routes)));
        {
            let mut handlers = registry.write();
            handlers.register(Arc::new(RequestHandlerAdapter::new(PingHandler::new(
                identity.clone(),
            ))))?;
            handlers.register(Arc::new(RequestHandlerAdapter::new(InfoHandler::new(
                identity.clone(),
                subscriptions.clone(),
                Arc::downgrade(&registry),
                routes.clone(),
            ))))?;
        }

        let active = ActiveHandlers::default();
        let matchers = ResponseMatcherCollection::default();
        let (cancel_sender, cancel_receiver) = mpsc::unbounded_channel();

        let inner = Arc::new_cyclic(|weak: &Weak<BusInner<D>>| {
            let sink: Arc<dyn MessageSink> = Arc::new(BusSink {
                inner: weak.clone(),
            });

            BusInner {
                dispatcher: MessageDispatcher {
                    identity: identity.clone(),
                    separator: renderer.separator().to_string(),
                    registry: registry.clone(),
                    active: active.clone(),
                    matchers: matchers.clone(),
                    routes: routes.clone(),
                    metrics: options.metrics.clone(),
                    cancel_sender,
                },
                identity,
                instance_id,
                driver,
                options,
                reply_to,
                control,
                subscriptions,
                registry,
                active,
                matchers,
                routes,
                sink,
                cancel_receiver: Arc::new(tokio::sync::Mutex::new(cancel_receiver)),
                tasks: TaskTracker::new(),
                shutdown: Mutex::new(CancellationToken::new()),
            }
        });

        Ok(Self { inner })
    }

    /// This instance's identity.
    #[must_use]
    pub fn identity(&self) -> &ServiceIdentity {
        &self.inner.identity
    }

    /// Random id of this bus instance, part of its inbox.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    /// Rendered private inbox stamped on outgoing requests.
    #[must_use]
    pub fn reply_to(&self) -> &str {
        &self.inner.reply_to
    }

    /// The driver.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    /// The driver's renderer.
    #[must_use]
    pub fn renderer(&self) -> &Renderer {
        self.inner.driver.renderer()
    }

    /// The driver's capabilities.
    #[must_use]
    pub fn features(&self) -> DriverFeatures {
        self.inner.driver.features()
    }

    /// Bus configuration.
    #[must_use]
    pub fn options(&self) -> &BusOptions {
        &self.inner.options
    }

    /// Requests currently in flight on this node.
    #[must_use]
    pub fn active_handlers(&self) -> &ActiveHandlers {
        &self.inner.active
    }

    /// Recently observed routes.
    #[must_use]
    pub fn routes(&self) -> Vec<MessageRoute> {
        self.inner.routes.lock().routes()
    }

    /// Subscriptions, active or queued.
    pub async fn subscriptions(&self) -> Vec<RenderedSubscription> {
        self.inner
            .subscriptions
            .lock()
            .await
            .subscriptions
            .entries()
            .to_vec()
    }

    /// Starts the driver and subscribes everything queued so far. A stopped
    /// bus can be started again.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to start or subscribe.
    #[instrument(skip(self), fields(identity = %self.inner.identity))]
    pub async fn start(&self) -> Result<(), Error> {
        let mut state = self.inner.subscriptions.lock().await;
        if state.started {
            return Ok(());
        }

        self.inner
            .driver
            .start(self.inner.sink.clone())
            .await
            .map_err(Error::driver)?;
        self.inner.tasks.reopen();
        *self.inner.shutdown.lock() = CancellationToken::new();
        self.spawn_cancel_worker();

        for subscription in state.subscriptions.entries() {
            self.inner
                .driver
                .subscribe(subscription.clone())
                .await
                .map_err(Error::driver)?;
        }
        state.started = true;

        info!(
            reply_to = %self.inner.reply_to,
            subscriptions = state.subscriptions.len(),
            "message bus started"
        );
        Ok(())
    }

    /// Stops the driver and background tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to stop.
    pub async fn stop(&self) -> Result<(), Error> {
        self.inner.subscriptions.lock().await.started = false;
        self.inner.shutdown.lock().cancel();
        self.inner.tasks.close();

        self.inner.driver.stop().await.map_err(Error::driver)?;
        info!(identity = %self.inner.identity, "message bus stopped");

        Ok(())
    }

    /// Resolves once the driver has closed.
    pub async fn wait_for_close(&self) {
        self.inner.driver.wait_for_close().await;
        self.inner.tasks.wait().await;
    }

    /// Adds a subscription. Before [`Self::start`] it is queued.
    ///
    /// Returns `false` without contacting the driver if an equivalent
    /// subscription (same kind and rendered subject) already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or the driver fails.
    pub async fn subscribe(&self, subscription: MessageSubscription) -> Result<bool, Error> {
        let rendered = render_subscription(self.renderer(), &self.inner.identity, &subscription)?;
        let mut state = self.inner.subscriptions.lock().await;

        if !state.subscriptions.add(rendered.clone()) {
            debug!(subject = %rendered.subject, "subscription already exists");
            return Ok(false);
        }

        if state.started {
            if let Err(e) = self.inner.driver.subscribe(rendered.clone()).await {
                state.subscriptions.remove(&rendered);
                return Err(Error::driver(e));
            }
        }

        Ok(true)
    }

    /// Registers an untyped handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRequestHandler`] if a request type is taken.
    pub fn register_handler(&self, handler: Arc<dyn MessageHandler>) -> Result<(), Error> {
        self.inner.registry.write().register(handler)
    }

    /// Registers a typed request handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRequestHandler`] if the type is taken.
    pub fn register_request_handler<H: RequestHandler>(&self, handler: H) -> Result<(), Error> {
        self.register_handler(Arc::new(RequestHandlerAdapter::new(handler)))
    }

    /// Registers a typed event handler.
    ///
    /// # Errors
    ///
    /// Never fails for event handlers; kept fallible for symmetry.
    pub fn register_event_handler<H: EventHandler>(&self, handler: H) -> Result<(), Error> {
        self.register_handler(Arc::new(EventHandlerAdapter::new(handler)))
    }

    /// Removes the handlers registered under `name`.
    pub fn unregister_handler(&self, name: &str) -> bool {
        self.inner.registry.write().unregister(name)
    }

    /// Publishes a typed event.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering, encoding or the driver fails.
    pub async fn publish<T: TypedMessage>(
        &self,
        destination: impl Into<Destination> + Send,
        message: &T,
    ) -> Result<(), Error> {
        self.publish_message(&destination.into(), Message::event(message)?, Headers::new())
            .await
    }

    /// Publishes any message with extra headers.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or the driver fails.
    pub async fn publish_message(
        &self,
        destination: &Destination,
        message: Message,
        headers: Headers,
    ) -> Result<(), Error> {
        let envelope = self.prepare(destination, message, headers)?;
        self.send_batch(vec![envelope]).await
    }

    /// Publishes several messages. Every destination is rendered before
    /// anything is sent.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or the driver fails.
    pub async fn publish_batch(&self, messages: Vec<(Destination, Message)>) -> Result<(), Error> {
        let envelopes = messages
            .into_iter()
            .map(|(destination, message)| self.prepare(&destination, message, Headers::new()))
            .collect::<Result<Vec<_>, _>>()?;

        self.send_batch(envelopes).await
    }

    /// Sends a batch of requests and streams their responses.
    ///
    /// All requests are validated and rendered before anything is sent.
    /// The stream ends once every request collected `limit` responses, or
    /// yields [`Error::RequestTimeout`] after the largest timeout elapsed.
    ///
    /// # Errors
    ///
    /// Returns an error if an option is invalid, rendering fails or the
    /// driver fails to publish.
    #[instrument(skip_all, fields(requests = requests.len()))]
    pub async fn request_batch(
        &self,
        requests: Vec<(TypedBody, RequestOptions)>,
    ) -> Result<ResponseStream, Error> {
        let now = Utc::now();
        let matcher = self.inner.matchers.acquire();
        let mut envelopes = Vec::with_capacity(requests.len());

        for (body, mut options) in requests {
            if options.timeout.is_none() {
                options.timeout = self.inner.options.default_request_timeout;
            }
            options.validate()?;

            let request = Request {
                id: options.id.unwrap_or_else(Uuid::new_v4),
                reply_to: self.inner.reply_to.clone(),
                parent_id: options.parent_id,
                timeout: options.timeout_millis(),
                expires_at: options.expires_at(now),
                body,
            };
            let request_id = request.id;

            envelopes.push(self.prepare(
                &options.destination,
                Message::Request(request),
                options.headers.clone(),
            )?);
            matcher.register(request_id, &options);
        }

        self.send_batch(envelopes).await?;

        Ok(response_stream(matcher, self.inner.options.poll_interval))
    }

    /// Sends one request and streams up to `options.limit` responses.
    ///
    /// # Errors
    ///
    /// See [`Self::request_batch`].
    pub async fn request_many<T: TypedMessage>(
        &self,
        body: &T,
        options: RequestOptions,
    ) -> Result<ResponseStream, Error> {
        self.request_batch(vec![(TypedBody::encode(body)?, options)])
            .await
    }

    /// Sends one request and returns the first response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestTimeout`] if nothing arrives in time, or any
    /// error from [`Self::request_batch`].
    pub async fn request<T: TypedMessage>(
        &self,
        body: &T,
        options: RequestOptions,
    ) -> Result<ResponseEnvelope, Error> {
        let mut responses = self.request_many(body, options.with_limit(1)).await?;

        match responses.next().await {
            Some(response) => response,
            None => Err(Error::NoResponse),
        }
    }

    /// Sends one request and decodes the first response as `R`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteError`] for error responses, plus any error
    /// from [`Self::request`].
    pub async fn request_typed<T: TypedMessage, R: TypedMessage>(
        &self,
        body: &T,
        options: RequestOptions,
    ) -> Result<R, Error> {
        self.request(body, options).await?.decode()
    }

    /// Sends a response to the reply address of `request`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResponseMismatch`] without publishing if the
    /// response answers a different request.
    pub async fn reply(&self, request: &Request, response: Response) -> Result<(), Error> {
        if response.request_id() != request.id {
            return Err(Error::ResponseMismatch {
                expected: request.id,
                actual: response.request_id(),
            });
        }

        self.publish_message(
            &Destination::Reply(ReplyPath::new(request.reply_to.clone())),
            Message::Response(response),
            Headers::new(),
        )
        .await
    }

    fn prepare(
        &self,
        destination: &Destination,
        message: Message,
        mut headers: Headers,
    ) -> Result<OutgoingEnvelope, Error> {
        let subject = self.renderer().render_destination(destination)?;
        headers.insert(SENDER_HEADER.to_string(), self.inner.identity.to_string());

        Ok(OutgoingEnvelope {
            subject,
            headers,
            message,
        })
    }

    async fn send_batch(&self, envelopes: Vec<OutgoingEnvelope>) -> Result<(), Error> {
        let labels: Vec<(String, String)> = envelopes
            .iter()
            .map(|envelope| {
                (
                    normalize_subject(&envelope.subject, self.renderer().separator()),
                    envelope.message.message_type().to_string(),
                )
            })
            .collect();

        if envelopes.len() > 1 {
            self.inner
                .driver
                .publish_batch(envelopes)
                .await
                .map_err(Error::driver)?;
        } else if let Some(envelope) = envelopes.into_iter().next() {
            self.inner
                .driver
                .publish(envelope)
                .await
                .map_err(Error::driver)?;
        }

        for (subject, message_type) in labels {
            self.inner.options.metrics.published(&subject, &message_type);
        }

        Ok(())
    }
}

fn response_stream(matcher: MatcherHandle, poll_interval: Duration) -> ResponseStream {
    Box::pin(async_stream::stream! {
        loop {
            for response in matcher.take_matches() {
                yield Ok(response);
            }

            match matcher.is_done() {
                Ok(true) => break,
                Ok(false) => matcher.wait(poll_interval).await,
                Err(timeout) => {
                    for response in matcher.take_matches() {
                        yield Ok(response);
                    }
                    yield Err(Error::from(timeout));
                    break;
                }
            }
        }
    })
}

fn render_subscription(
    renderer: &Renderer,
    identity: &ServiceIdentity,
    subscription: &MessageSubscription,
) -> Result<RenderedSubscription, Error> {
    Ok(RenderedSubscription {
        kind: subscription.kind,
        subject: renderer.render_subscribe(&subscription.path)?,
        queue_group: (subscription.kind == SubscriptionKind::Queue).then(|| identity.name.clone()),
    })
}

struct BusSink<D: MessageBusDriver> {
    inner: Weak<BusInner<D>>,
}

#[async_trait]
impl<D: MessageBusDriver> MessageSink for BusSink<D> {
    async fn on_receive_message(&self, envelope: IncomingEnvelope) {
        let Some(inner) = self.inner.upgrade() else {
            debug!("message bus dropped, discarding message");
            return;
        };

        if MessageDispatcher::routes_inline(&envelope.message) {
            let outcome = inner.dispatcher.dispatch(envelope, inner.sink.clone()).await;
            trace!(?outcome, "message dispatched");
            return;
        }

        let tasks = inner.tasks.clone();
        tasks.spawn(async move {
            let outcome = inner.dispatcher.dispatch(envelope, inner.sink.clone()).await;
            trace!(?outcome, "message dispatched");
        });
    }

    async fn on_reply_to(
        &self,
        request: &IncomingEnvelope,
        response: Response,
    ) -> Result<(), Error> {
        let inner = self.inner.upgrade().ok_or(Error::BusDropped)?;
        let request = request.request().ok_or(Error::NotARequest)?;

        MessageBus { inner }.reply(request, response).await
    }
}
