use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_nats::{Client, ConnectOptions, Subscriber};
use async_trait::async_trait;
use fleet_messaging::codec::CodecRegistry;
use fleet_messaging::driver::{DriverFeatures, MessageBusDriver, MessageSink};
use fleet_messaging::envelope::{IncomingEnvelope, OutgoingEnvelope};
use fleet_messaging::path::Renderer;
use fleet_messaging::subscription::RenderedSubscription;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::error::Error;
use crate::headers::{from_header_map, to_header_map};

/// Options for [`NatsDriver`].
#[derive(Clone, Debug)]
pub struct NatsDriverOptions {
    /// Server URLs.
    pub servers: Vec<String>,

    /// Connection name reported to the server.
    pub client_name: String,

    /// Connection attempts before `start` gives up.
    pub connect_attempts: u32,

    /// Pause between connection attempts.
    pub connect_retry_delay: Duration,

    /// Payload codecs.
    pub codecs: CodecRegistry,
}

impl Default for NatsDriverOptions {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            client_name: "fleet-messaging".to_string(),
            connect_attempts: 30,
            connect_retry_delay: Duration::from_secs(1),
            codecs: CodecRegistry::new(),
        }
    }
}

#[derive(Clone)]
struct Connection {
    client: Client,
    sink: Arc<dyn MessageSink>,
    shutdown: CancellationToken,
}

/// Driver over a NATS connection.
pub struct NatsDriver {
    servers: String,
    client_name: String,
    connect_attempts: u32,
    connect_retry_delay: Duration,
    codecs: Arc<CodecRegistry>,
    renderer: Renderer,
    connection: Mutex<Option<Connection>>,
    tasks: TaskTracker,
}

impl NatsDriver {
    /// Creates a driver. Nothing connects until `start`.
    #[must_use]
    pub fn new(options: NatsDriverOptions) -> Self {
        let NatsDriverOptions {
            servers,
            client_name,
            connect_attempts,
            connect_retry_delay,
            codecs,
        } = options;

        Self {
            servers: servers.join(","),
            client_name,
            connect_attempts: connect_attempts.max(1),
            connect_retry_delay,
            codecs: Arc::new(codecs),
            renderer: Renderer::wildcard(),
            connection: Mutex::new(None),
            tasks: TaskTracker::new(),
        }
    }

    fn connection(&self) -> Result<Connection, Error> {
        self.connection.lock().clone().ok_or(Error::NotStarted)
    }

    async fn connect(&self) -> Result<Client, Error> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match ConnectOptions::new()
                .name(self.client_name.as_str())
                .connect(self.servers.as_str())
                .await
            {
                Ok(client) => return Ok(client),
                Err(e) if attempt < self.connect_attempts => {
                    warn!(
                        attempt,
                        servers = %self.servers,
                        error = %e,
                        "failed to connect to NATS, retrying"
                    );
                    tokio::time::sleep(self.connect_retry_delay).await;
                }
                Err(e) => {
                    return Err(Error::Connect {
                        attempts: attempt,
                        kind: e.kind(),
                    });
                }
            }
        }
    }

    async fn send(&self, client: &Client, envelope: OutgoingEnvelope) -> Result<(), Error> {
        let OutgoingEnvelope {
            subject,
            mut headers,
            message,
        } = envelope;
        let payload = self.codecs.encode(&message, &mut headers)?;

        client
            .publish_with_headers(subject, to_header_map(&headers), payload)
            .await
            .map_err(|e| Error::Publish(e.kind()))
    }

    fn deliver(
        &self,
        subscribed_subject: String,
        mut subscriber: Subscriber,
        connection: Connection,
    ) {
        let codecs = self.codecs.clone();
        let Connection { sink, shutdown, .. } = connection;

        self.tasks.spawn(async move {
            loop {
                let message = tokio::select! {
                    () = shutdown.cancelled() => break,
                    message = subscriber.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                let headers = from_header_map(message.headers.as_ref());
                let decoded = match codecs.decode(&message.payload, &headers) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        warn!(subject = %message.subject, error = %e, "dropping undecodable message");
                        continue;
                    }
                };

                let envelope = IncomingEnvelope {
                    subject: message.subject.to_string(),
                    subscribed_subject: subscribed_subject.clone(),
                    headers,
                    message: decoded,
                };
                sink.on_receive_message(envelope).await;
            }

            if let Err(e) = subscriber.unsubscribe().await {
                debug!(subject = %subscribed_subject, error = %e, "failed to unsubscribe");
            }
        });
    }
}

impl fmt::Debug for NatsDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsDriver")
            .field("servers", &self.servers)
            .field("client_name", &self.client_name)
            .field("started", &self.connection.lock().is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageBusDriver for NatsDriver {
    type Error = Error;

    fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    fn features(&self) -> DriverFeatures {
        DriverFeatures {
            supports_abstract_subjects: true,
            supports_temporary_queues: true,
        }
    }

    #[instrument(skip_all, fields(servers = %self.servers))]
    async fn start(&self, sink: Arc<dyn MessageSink>) -> Result<(), Self::Error> {
        if self.connection.lock().is_some() {
            return Ok(());
        }

        let client = self.connect().await?;
        info!(client_name = %self.client_name, "connected to NATS");

        self.tasks.reopen();
        *self.connection.lock() = Some(Connection {
            client,
            sink,
            shutdown: CancellationToken::new(),
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), Self::Error> {
        let connection = self.connection.lock().take();
        self.tasks.close();

        if let Some(connection) = connection {
            connection.shutdown.cancel();
            connection
                .client
                .flush()
                .await
                .map_err(|e| Error::Flush(e.kind()))?;
        }

        Ok(())
    }

    async fn wait_for_close(&self) {
        self.tasks.wait().await;
    }

    #[instrument(skip(self), fields(subject = %subscription.subject))]
    async fn subscribe(&self, subscription: RenderedSubscription) -> Result<(), Self::Error> {
        let connection = self.connection()?;
        let RenderedSubscription {
            subject,
            queue_group,
            ..
        } = subscription;

        let subscriber = match &queue_group {
            Some(group) => {
                connection
                    .client
                    .queue_subscribe(subject.clone(), group.clone())
                    .await
            }
            None => connection.client.subscribe(subject.clone()).await,
        }
        .map_err(|e| Error::Subscribe {
            subject: subject.clone(),
            message: e.to_string(),
        })?;
        debug!(queue_group = ?queue_group, "subscribed");

        self.deliver(subject, subscriber, connection);

        Ok(())
    }

    async fn publish(&self, envelope: OutgoingEnvelope) -> Result<(), Self::Error> {
        let connection = self.connection()?;

        self.send(&connection.client, envelope).await
    }

    async fn publish_batch(&self, envelopes: Vec<OutgoingEnvelope>) -> Result<(), Self::Error> {
        let connection = self.connection()?;

        for envelope in envelopes {
            self.send(&connection.client, envelope).await?;
        }

        connection
            .client
            .flush()
            .await
            .map_err(|e| Error::Flush(e.kind()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_messaging::envelope::{Headers, Message, TypedBody};
    use fleet_messaging::path::RenderProfile;
    use fleet_messaging::subscription::SubscriptionKind;

    #[test]
    fn test_default_options() {
        let options = NatsDriverOptions::default();

        assert_eq!(options.connect_attempts, 30);
        assert_eq!(options.connect_retry_delay, Duration::from_secs(1));
        assert_eq!(options.servers, vec!["nats://localhost:4222".to_string()]);
    }

    #[test]
    fn test_renders_wildcard_subjects() {
        let driver = NatsDriver::new(NatsDriverOptions {
            servers: vec!["nats://a:4222".to_string(), "nats://b:4222".to_string()],
            ..NatsDriverOptions::default()
        });

        assert_eq!(driver.renderer().profile(), RenderProfile::Wildcard);
        assert!(driver.features().supports_abstract_subjects);
        assert_eq!(driver.servers, "nats://a:4222,nats://b:4222");
    }

    #[tokio::test]
    async fn test_requires_start() {
        let driver = NatsDriver::new(NatsDriverOptions::default());

        assert!(matches!(
            driver
                .subscribe(RenderedSubscription {
                    kind: SubscriptionKind::Topic,
                    subject: "fleet.events".to_string(),
                    queue_group: None,
                })
                .await,
            Err(Error::NotStarted)
        ));
        assert!(matches!(
            driver
                .publish(OutgoingEnvelope {
                    subject: "fleet.events".to_string(),
                    headers: Headers::new(),
                    message: Message::Event(TypedBody::new("vehicle-stopped")),
                })
                .await,
            Err(Error::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_attempts() {
        let driver = NatsDriver::new(NatsDriverOptions {
            servers: vec!["nats://127.0.0.1:1".to_string()],
            connect_attempts: 2,
            connect_retry_delay: Duration::from_millis(10),
            ..NatsDriverOptions::default()
        });

        assert!(matches!(
            driver.connect().await,
            Err(Error::Connect { attempts: 2, .. })
        ));
    }
}
