#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fleet_messaging::codec::CodecRegistry;
use fleet_messaging::envelope::TypedMessage;
use fleet_messaging::handler::{HandlerContext, RequestError, RequestHandler};
use fleet_messaging::identity::ServiceIdentity;
use fleet_messaging::path::{MessagePath, PublishPath, RenderProfile, SubscribePath};
use fleet_messaging::request::RequestOptions;
use fleet_messaging::subscription::MessageSubscription;
use fleet_messaging::{BusOptions, CancelOptions, DiagnosticsOptions, MessageBus};
use fleet_messaging_memory::{MemoryBroker, MemoryDriver, MemoryDriverOptions};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Bus = MessageBus<MemoryDriver>;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Echo {
    pub text: String,
}

impl TypedMessage for Echo {
    const MESSAGE_TYPE: &'static str = "echo";
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoReply {
    pub text: String,
    pub responder: String,
}

impl TypedMessage for EchoReply {
    const MESSAGE_TYPE: &'static str = "echo-reply";
}

/// Echoes after `delay`, failing on the text "fail".
pub struct EchoHandler {
    pub responder: String,
    pub delay: Duration,
    pub calls: Arc<AtomicUsize>,
}

impl EchoHandler {
    pub fn new(responder: &str) -> Self {
        Self {
            responder: responder.to_string(),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl RequestHandler for EchoHandler {
    type Request = Echo;
    type Response = EchoReply;

    fn name(&self) -> &str {
        "echo"
    }

    async fn process_request(
        &self,
        request: Echo,
        _context: &HandlerContext,
    ) -> Result<EchoReply, RequestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        if request.text == "fail" {
            return Err(RequestError::failed("asked to fail"));
        }

        Ok(EchoReply {
            text: request.text,
            responder: self.responder.clone(),
        })
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LongJob {
    pub job: String,
}

impl TypedMessage for LongJob {
    const MESSAGE_TYPE: &'static str = "long-job";
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct LongJobDone {}

impl TypedMessage for LongJobDone {
    const MESSAGE_TYPE: &'static str = "long-job-done";
}

/// Loops until cancelled or `limit` elapsed.
pub struct LongJobHandler {
    pub limit: Duration,
    pub started: Arc<AtomicUsize>,
    pub cancelled: Arc<AtomicUsize>,
}

impl LongJobHandler {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            started: Arc::new(AtomicUsize::new(0)),
            cancelled: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl RequestHandler for LongJobHandler {
    type Request = LongJob;
    type Response = LongJobDone;

    fn name(&self) -> &str {
        "long-job"
    }

    async fn process_request(
        &self,
        _request: LongJob,
        context: &HandlerContext,
    ) -> Result<LongJobDone, RequestError> {
        self.started.fetch_add(1, Ordering::SeqCst);

        tokio::select! {
            () = context.cancellation_token().cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(RequestError::Cancelled)
            }
            () = tokio::time::sleep(self.limit) => Ok(LongJobDone {}),
        }
    }
}

pub fn path(template: &str) -> MessagePath {
    MessagePath::parse(template).unwrap()
}

pub fn publish_path(template: &str) -> PublishPath {
    path(template).publish(&[]).unwrap()
}

pub fn subscribe_path(template: &str) -> SubscribePath {
    path(template).subscribe(&[]).unwrap()
}

pub fn options() -> BusOptions {
    BusOptions {
        poll_interval: Duration::from_millis(20),
        cancel: CancelOptions {
            default_timeout: Duration::from_secs(2),
            ..CancelOptions::default()
        },
        diagnostics: DiagnosticsOptions {
            ping_timeout: Duration::from_millis(300),
            info_timeout: Duration::from_millis(300),
            ..DiagnosticsOptions::default()
        },
        ..BusOptions::default()
    }
}

pub fn driver(broker: &MemoryBroker, profile: RenderProfile, codecs: CodecRegistry) -> MemoryDriver {
    MemoryDriver::new(MemoryDriverOptions {
        broker: broker.clone(),
        profile,
        codecs,
    })
}

pub async fn bus(broker: &MemoryBroker, name: &str, instance: u32) -> Bus {
    bus_with(
        broker,
        name,
        instance,
        RenderProfile::Wildcard,
        CodecRegistry::new(),
    )
    .await
}

pub async fn bus_with(
    broker: &MemoryBroker,
    name: &str,
    instance: u32,
    profile: RenderProfile,
    codecs: CodecRegistry,
) -> Bus {
    let bus = MessageBus::new(
        ServiceIdentity::new(name, instance),
        driver(broker, profile, codecs),
        options(),
    )
    .unwrap();
    bus.start().await.unwrap();
    bus
}

/// Starts a bus answering [`Echo`] on a queue subscription to `template`.
pub async fn echo_service(broker: &MemoryBroker, name: &str, instance: u32, template: &str) -> Bus {
    let bus = bus(broker, name, instance).await;
    bus.register_request_handler(EchoHandler::new(&format!("{name}-{instance}")))
        .unwrap();
    bus.subscribe(MessageSubscription::queue(subscribe_path(template)))
        .await
        .unwrap();
    bus
}

pub fn echo_request(template: &str) -> RequestOptions {
    RequestOptions::new(publish_path(template)).with_timeout(Duration::from_secs(2))
}

pub fn echo(text: &str) -> Echo {
    Echo {
        text: text.to_string(),
    }
}

pub fn new_id() -> Uuid {
    Uuid::new_v4()
}
