use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use fleet_messaging::codec::CodecRegistry;
use fleet_messaging::driver::{DriverFeatures, MessageBusDriver, MessageSink};
use fleet_messaging::envelope::{IncomingEnvelope, OutgoingEnvelope};
use fleet_messaging::path::{RenderProfile, Renderer};
use fleet_messaging::subscription::RenderedSubscription;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};

use crate::broker::{MemoryBroker, WireMessage};
use crate::error::Error;

/// Options for [`MemoryDriver`].
#[derive(Clone, Debug)]
pub struct MemoryDriverOptions {
    /// Broker shared with the other drivers this one talks to.
    pub broker: MemoryBroker,

    /// Rendering profile to emulate.
    pub profile: RenderProfile,

    /// Payload codecs.
    pub codecs: CodecRegistry,
}

impl Default for MemoryDriverOptions {
    fn default() -> Self {
        Self {
            broker: MemoryBroker::new(),
            profile: RenderProfile::Wildcard,
            codecs: CodecRegistry::new(),
        }
    }
}

struct Connection {
    sink: Arc<dyn MessageSink>,
    shutdown: CancellationToken,
    subscriptions: Vec<u64>,
}

/// Driver over a [`MemoryBroker`].
pub struct MemoryDriver {
    broker: MemoryBroker,
    renderer: Renderer,
    codecs: Arc<CodecRegistry>,
    connection: Mutex<Option<Connection>>,
    subscribe_calls: AtomicUsize,
    tasks: TaskTracker,
}

impl MemoryDriver {
    /// Creates a driver. Nothing is delivered until `start`.
    #[must_use]
    pub fn new(options: MemoryDriverOptions) -> Self {
        let MemoryDriverOptions {
            broker,
            profile,
            codecs,
        } = options;

        Self {
            broker,
            renderer: Renderer::for_profile(profile),
            codecs: Arc::new(codecs),
            connection: Mutex::new(None),
            subscribe_calls: AtomicUsize::new(0),
            tasks: TaskTracker::new(),
        }
    }

    /// The broker this driver publishes to.
    #[must_use]
    pub const fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    /// Number of broker subscriptions this driver created.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    fn encode(&self, envelope: OutgoingEnvelope) -> Result<WireMessage, Error> {
        let OutgoingEnvelope {
            subject,
            mut headers,
            message,
        } = envelope;
        let payload = self.codecs.encode(&message, &mut headers)?;

        Ok(WireMessage {
            subject,
            headers,
            payload,
        })
    }

    fn deliver(
        &self,
        subscribed_subject: String,
        mut receiver: mpsc::UnboundedReceiver<WireMessage>,
        sink: Arc<dyn MessageSink>,
        shutdown: CancellationToken,
    ) {
        let codecs = self.codecs.clone();

        self.tasks.spawn(async move {
            loop {
                let wire = tokio::select! {
                    () = shutdown.cancelled() => break,
                    wire = receiver.recv() => match wire {
                        Some(wire) => wire,
                        None => break,
                    },
                };

                let message = match codecs.decode(&wire.payload, &wire.headers) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(subject = %wire.subject, error = %e, "dropping undecodable message");
                        continue;
                    }
                };

                let envelope = IncomingEnvelope {
                    subject: wire.subject,
                    subscribed_subject: subscribed_subject.clone(),
                    headers: wire.headers,
                    message,
                };
                sink.on_receive_message(envelope).await;
            }

            debug!(subject = %subscribed_subject, "subscription closed");
        });
    }
}

impl Drop for MemoryDriver {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.shutdown.cancel();
            for id in connection.subscriptions {
                self.broker.unsubscribe(id);
            }
        }
    }
}

impl fmt::Debug for MemoryDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDriver")
            .field("profile", &self.renderer.profile())
            .field("started", &self.connection.lock().is_some())
            .field("subscribe_calls", &self.subscribe_calls())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageBusDriver for MemoryDriver {
    type Error = Error;

    fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    fn features(&self) -> DriverFeatures {
        DriverFeatures {
            supports_abstract_subjects: self.renderer.profile() == RenderProfile::Wildcard,
            supports_temporary_queues: true,
        }
    }

    async fn start(&self, sink: Arc<dyn MessageSink>) -> Result<(), Self::Error> {
        let mut connection = self.connection.lock();
        if connection.is_none() {
            self.tasks.reopen();
            *connection = Some(Connection {
                sink,
                shutdown: CancellationToken::new(),
                subscriptions: Vec::new(),
            });
        }

        Ok(())
    }

    async fn stop(&self) -> Result<(), Self::Error> {
        if let Some(connection) = self.connection.lock().take() {
            connection.shutdown.cancel();
            for id in connection.subscriptions {
                self.broker.unsubscribe(id);
            }
        }
        self.tasks.close();

        Ok(())
    }

    async fn wait_for_close(&self) {
        self.tasks.wait().await;
    }

    #[instrument(skip(self), fields(subject = %subscription.subject))]
    async fn subscribe(&self, subscription: RenderedSubscription) -> Result<(), Self::Error> {
        let mut guard = self.connection.lock();
        let connection = guard.as_mut().ok_or(Error::NotStarted)?;

        let (id, receiver) = self
            .broker
            .subscribe(subscription.subject.clone(), subscription.queue_group.clone());
        connection.subscriptions.push(id);
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let sink = connection.sink.clone();
        let shutdown = connection.shutdown.clone();
        drop(guard);

        self.deliver(subscription.subject, receiver, sink, shutdown);
        debug!(queue_group = ?subscription.queue_group, "subscribed");

        Ok(())
    }

    async fn publish(&self, envelope: OutgoingEnvelope) -> Result<(), Self::Error> {
        if self.connection.lock().is_none() {
            return Err(Error::NotStarted);
        }

        let wire = self.encode(envelope)?;
        self.broker.publish(&wire);

        Ok(())
    }

    async fn publish_batch(&self, envelopes: Vec<OutgoingEnvelope>) -> Result<(), Self::Error> {
        if self.connection.lock().is_none() {
            return Err(Error::NotStarted);
        }

        let wires = envelopes
            .into_iter()
            .map(|envelope| self.encode(envelope))
            .collect::<Result<Vec<_>, _>>()?;
        for wire in &wires {
            self.broker.publish(wire);
        }

        Ok(())
    }
}
