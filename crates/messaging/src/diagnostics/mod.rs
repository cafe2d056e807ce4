//! Liveness and introspection over the control channels.

mod info;
mod ping;

pub use info::{InfoRequest, InfoResponse};
pub use ping::{PingRequest, PingResponse};

pub(crate) use info::InfoHandler;
pub(crate) use ping::PingHandler;

use futures::StreamExt;
use tracing::debug;

use crate::bus::{MessageBus, ResponseStream};
use crate::driver::MessageBusDriver;
use crate::envelope::TypedMessage;
use crate::error::Error;
use crate::path::PublishPath;
use crate::paths;
use crate::request::RequestOptions;
use crate::subscription::MessageSubscriptions;

#[derive(Debug, Default)]
pub(crate) struct SubscriptionState {
    pub(crate) started: bool,
    pub(crate) subscriptions: MessageSubscriptions,
}

impl<D: MessageBusDriver> MessageBus<D> {
    /// Pings every instance and collects the pongs that arrive in time.
    ///
    /// # Errors
    ///
    /// Returns an error if the ping cannot be sent.
    pub async fn ping(&self) -> Result<Vec<PingResponse>, Error> {
        let options = &self.inner.options.diagnostics;
        let request = RequestOptions::new(self.inner.control.clone())
            .with_limit(options.limit)
            .with_timeout(options.ping_timeout);

        collect(self.request_many(&PingRequest {}, request).await?).await
    }

    /// Collects descriptions of every instance, or only of `service_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn info(&self, service_name: Option<&str>) -> Result<Vec<InfoResponse>, Error> {
        let options = &self.inner.options.diagnostics;
        let request = RequestOptions::new(control_path(service_name, &self.inner.control)?)
            .with_limit(options.limit)
            .with_timeout(options.info_timeout);
        let body = InfoRequest {
            service_name: service_name.map(ToString::to_string),
        };

        collect(self.request_many(&body, request).await?).await
    }
}

/// The broadcast control path, or the per service one.
pub(crate) fn control_path(
    service_name: Option<&str>,
    control: &PublishPath,
) -> Result<PublishPath, Error> {
    match service_name {
        Some(name) => Ok(paths::service_control()?.publish(&[("name", name)])?),
        None => Ok(control.clone()),
    }
}

/// Drains a stream of typed responses. Running out of time ends the
/// collection normally.
async fn collect<T: TypedMessage>(mut responses: ResponseStream) -> Result<Vec<T>, Error> {
    let mut collected = Vec::new();

    while let Some(response) = responses.next().await {
        match response {
            Ok(response) => match response.decode::<T>() {
                Ok(body) => collected.push(body),
                Err(e) => debug!(error = %e, "skipping undecodable diagnostics response"),
            },
            Err(Error::RequestTimeout(_)) => break,
            Err(e) => return Err(e),
        }
    }

    Ok(collected)
}
