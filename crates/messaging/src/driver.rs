//! The seam between the bus and a concrete transport.

use std::error::Error as StdError;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::{IncomingEnvelope, OutgoingEnvelope, Response};
use crate::error::Error;
use crate::path::Renderer;
use crate::subscription::RenderedSubscription;

/// Marker trait for driver errors.
pub trait DriverError: StdError + Send + Sync + 'static {}

/// Capabilities a transport advertises.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverFeatures {
    /// Subjects may contain wildcards.
    pub supports_abstract_subjects: bool,

    /// Per instance inboxes can be created on the fly.
    pub supports_temporary_queues: bool,
}

/// Receives traffic from a driver.
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    /// Called for every message delivered on any subscription. Drivers
    /// await it before delivering the next message of the same
    /// subscription. It returns once the message is routed, so responses
    /// reach their matchers in arrival order while handlers run detached.
    async fn on_receive_message(&self, envelope: IncomingEnvelope);

    /// Sends `response` to the reply address of `request`.
    async fn on_reply_to(&self, request: &IncomingEnvelope, response: Response)
    -> Result<(), Error>;
}

/// One transport binding.
#[async_trait]
pub trait MessageBusDriver: Debug + Send + Sync + 'static {
    /// Driver specific error.
    type Error: DriverError;

    /// How paths become subjects on this transport.
    fn renderer(&self) -> &Renderer;

    /// Capabilities of this transport.
    fn features(&self) -> DriverFeatures;

    /// Connects and starts delivering to `sink`.
    async fn start(&self, sink: Arc<dyn MessageSink>) -> Result<(), Self::Error>;

    /// Disconnects. Subscriptions stop delivering.
    async fn stop(&self) -> Result<(), Self::Error>;

    /// Resolves once the driver has stopped and all delivery tasks ended.
    async fn wait_for_close(&self);

    /// Starts delivering messages matching `subscription`.
    async fn subscribe(&self, subscription: RenderedSubscription) -> Result<(), Self::Error>;

    /// Publishes one message.
    async fn publish(&self, envelope: OutgoingEnvelope) -> Result<(), Self::Error>;

    /// Publishes several messages.
    async fn publish_batch(&self, envelopes: Vec<OutgoingEnvelope>) -> Result<(), Self::Error> {
        for envelope in envelopes {
            self.publish(envelope).await?;
        }

        Ok(())
    }
}
