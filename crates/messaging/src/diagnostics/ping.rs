use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::TypedMessage;
use crate::handler::{HandlerContext, RequestError, RequestHandler};
use crate::identity::ServiceIdentity;

/// Liveness probe.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PingRequest {}

impl TypedMessage for PingRequest {
    const MESSAGE_TYPE: &'static str = "ping";
}

/// Answer to [`PingRequest`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PingResponse {
    /// Who answered.
    pub identity: ServiceIdentity,
}

impl TypedMessage for PingResponse {
    const MESSAGE_TYPE: &'static str = "pong";
}

pub(crate) struct PingHandler {
    identity: ServiceIdentity,
}

impl PingHandler {
    pub(crate) const fn new(identity: ServiceIdentity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl RequestHandler for PingHandler {
    type Request = PingRequest;
    type Response = PingResponse;

    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> Option<&str> {
        Some("Answers liveness probes")
    }

    async fn process_request(
        &self,
        _request: PingRequest,
        _context: &HandlerContext,
    ) -> Result<PingResponse, RequestError> {
        Ok(PingResponse {
            identity: self.identity.clone(),
        })
    }
}
