use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::SubscriptionState;
use crate::cancel::{CANCEL_TYPES, CancelRequest};
use crate::envelope::TypedMessage;
use crate::error::Error;
use crate::handler::{HandlerContext, HandlerInfo, HandlerRegistry, RequestError, RequestHandler};
use crate::identity::ServiceIdentity;
use crate::routes::{MessageRoute, MessageRoutes};
use crate::subscription::RenderedSubscription;

/// Introspection request.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoRequest {
    /// Service the request was addressed to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

impl TypedMessage for InfoRequest {
    const MESSAGE_TYPE: &'static str = "info-req";
}

/// What one instance reports about itself.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    /// Who answered.
    pub identity: ServiceIdentity,

    /// Its subscriptions.
    pub subscriptions: Vec<RenderedSubscription>,

    /// Its handlers, including the built-in ones.
    pub handlers: Vec<HandlerInfo>,

    /// Routes it observed recently.
    #[serde(default)]
    pub routes: Vec<MessageRoute>,
}

impl TypedMessage for InfoResponse {
    const MESSAGE_TYPE: &'static str = "info-resp";
}

pub(crate) struct InfoHandler {
    identity: ServiceIdentity,
    subscriptions: Arc<tokio::sync::Mutex<SubscriptionState>>,
    registry: Weak<RwLock<HandlerRegistry>>,
    routes: Arc<Mutex<MessageRoutes>>,
}

impl InfoHandler {
    pub(crate) const fn new(
        identity: ServiceIdentity,
        subscriptions: Arc<tokio::sync::Mutex<SubscriptionState>>,
        registry: Weak<RwLock<HandlerRegistry>>,
        routes: Arc<Mutex<MessageRoutes>>,
    ) -> Self {
        Self {
            identity,
            subscriptions,
            registry,
            routes,
        }
    }
}

#[async_trait]
impl RequestHandler for InfoHandler {
    type Request = InfoRequest;
    type Response = InfoResponse;

    fn name(&self) -> &str {
        "info"
    }

    fn description(&self) -> Option<&str> {
        Some("Reports subscriptions, handlers and observed routes")
    }

    async fn process_request(
        &self,
        _request: InfoRequest,
        _context: &HandlerContext,
    ) -> Result<InfoResponse, RequestError> {
        let registry = self.registry.upgrade().ok_or(Error::BusDropped)?;
        let mut handlers = registry.read().handlers();
        handlers.push(HandlerInfo {
            name: CancelRequest::HANDLER_NAME.to_string(),
            message_types: CANCEL_TYPES.iter().map(ToString::to_string).collect(),
            description: Some("Cancels in-flight requests".to_string()),
        });

        let subscriptions = self
            .subscriptions
            .lock()
            .await
            .subscriptions
            .entries()
            .to_vec();

        Ok(InfoResponse {
            identity: self.identity.clone(),
            subscriptions,
            handlers,
            routes: self.routes.lock().routes(),
        })
    }
}
