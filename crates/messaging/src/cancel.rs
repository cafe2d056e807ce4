//! Cooperative cancellation of in-flight requests, cascading to the
//! requests they spawned.
//!
//! Cancel requests bypass the handler registry: the dispatcher hands them
//! to a dedicated worker so they are never queued behind the work they are
//! meant to cancel. For each one the worker
//!
//! 1. finds matching entries in the active handlers table,
//! 2. optionally cascades a by-parent cancel one level deeper,
//! 3. flags the matched entries,
//! 4. optionally waits for them to settle,
//! 5. replies with a [`CancelResponse`].
//!
//! The whole procedure runs within three quarters of the cancel
//! request's timeout so the caller hears back before it gives up.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::active::ActiveRequest;
use crate::bus::MessageBus;
use crate::diagnostics::control_path;
use crate::driver::MessageBusDriver;
use crate::envelope::{IncomingEnvelope, Message, Request, TypedBody, TypedMessage};
use crate::error::Error;
use crate::handler::{HandlerContext, RequestError, respond};
use crate::identity::ServiceIdentity;
use crate::request::RequestOptions;

/// Wire type of [`CancelRequest::ById`].
pub const CANCEL_BY_ID: &str = "cancel-request-id";

/// Wire type of [`CancelRequest::ByType`].
pub const CANCEL_BY_TYPE: &str = "cancel-request-type";

/// Wire type of [`CancelRequest::ByParentId`].
pub const CANCEL_BY_PARENT_ID: &str = "cancel-request-parentId";

/// Every cancel request type.
pub const CANCEL_TYPES: [&str; 3] = [CANCEL_BY_ID, CANCEL_BY_TYPE, CANCEL_BY_PARENT_ID];

/// Which in-flight requests to cancel.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum CancelRequest {
    /// One request by id.
    #[serde(rename = "cancel-request-id", rename_all = "camelCase")]
    ById {
        /// Id of the request.
        request_id: Uuid,
        /// Also cancel requests it spawned.
        #[serde(default)]
        cancel_child_requests: bool,
        /// Reply only once the matched handlers settled.
        #[serde(default)]
        wait_on_completion: bool,
    },

    /// Every request with a body type, optionally scoped to one service.
    #[serde(rename = "cancel-request-type", rename_all = "camelCase")]
    ByType {
        /// Body type of the requests.
        request_type: String,
        /// Only cancel on instances of this service.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service_name: Option<String>,
        /// Also cancel requests they spawned.
        #[serde(default)]
        cancel_child_requests: bool,
        /// Reply only once the matched handlers settled.
        #[serde(default)]
        wait_on_completion: bool,
    },

    /// Every request spawned by a parent.
    #[serde(rename = "cancel-request-parentId", rename_all = "camelCase")]
    ByParentId {
        /// Id of the parent request.
        parent_id: Uuid,
        /// Cascade depth of this cancel.
        #[serde(default)]
        depth: u32,
        /// Also cancel requests the children spawned.
        #[serde(default)]
        cancel_child_requests: bool,
        /// Reply only once the matched handlers settled.
        #[serde(default)]
        wait_on_completion: bool,
    },
}

impl CancelRequest {
    /// Name the cancellation worker reports in `info`.
    pub const HANDLER_NAME: &'static str = "cancel";

    /// Cancels one request.
    #[must_use]
    pub const fn by_id(request_id: Uuid) -> Self {
        Self::ById {
            request_id,
            cancel_child_requests: false,
            wait_on_completion: false,
        }
    }

    /// Cancels every request of a type.
    #[must_use]
    pub fn by_type(request_type: impl Into<String>) -> Self {
        Self::ByType {
            request_type: request_type.into(),
            service_name: None,
            cancel_child_requests: false,
            wait_on_completion: false,
        }
    }

    /// Cancels every child of a parent.
    #[must_use]
    pub const fn by_parent_id(parent_id: Uuid) -> Self {
        Self::ByParentId {
            parent_id,
            depth: 0,
            cancel_child_requests: false,
            wait_on_completion: false,
        }
    }

    /// Sets whether cancellation cascades to child requests.
    #[must_use]
    pub fn with_cascade(mut self, cascade: bool) -> Self {
        match &mut self {
            Self::ById {
                cancel_child_requests,
                ..
            }
            | Self::ByType {
                cancel_child_requests,
                ..
            }
            | Self::ByParentId {
                cancel_child_requests,
                ..
            } => *cancel_child_requests = cascade,
        }
        self
    }

    /// Sets whether the reply waits for handlers to settle.
    #[must_use]
    pub fn with_wait(mut self, wait: bool) -> Self {
        match &mut self {
            Self::ById {
                wait_on_completion, ..
            }
            | Self::ByType {
                wait_on_completion, ..
            }
            | Self::ByParentId {
                wait_on_completion, ..
            } => *wait_on_completion = wait,
        }
        self
    }

    /// Wire type.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::ById { .. } => CANCEL_BY_ID,
            Self::ByType { .. } => CANCEL_BY_TYPE,
            Self::ByParentId { .. } => CANCEL_BY_PARENT_ID,
        }
    }

    /// Whether to cascade to child requests.
    #[must_use]
    pub const fn cancels_children(&self) -> bool {
        match self {
            Self::ById {
                cancel_child_requests,
                ..
            }
            | Self::ByType {
                cancel_child_requests,
                ..
            }
            | Self::ByParentId {
                cancel_child_requests,
                ..
            } => *cancel_child_requests,
        }
    }

    /// Whether to wait for handlers to settle before replying.
    #[must_use]
    pub const fn waits_on_completion(&self) -> bool {
        match self {
            Self::ById {
                wait_on_completion, ..
            }
            | Self::ByType {
                wait_on_completion, ..
            }
            | Self::ByParentId {
                wait_on_completion, ..
            } => *wait_on_completion,
        }
    }

    /// Cascade depth. Zero unless this is a cascaded by-parent cancel.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        match self {
            Self::ByParentId { depth, .. } => *depth,
            _ => 0,
        }
    }

    /// Wire body.
    ///
    /// # Errors
    ///
    /// Never fails for well-formed variants.
    pub fn to_body(&self) -> Result<TypedBody, serde_json::Error> {
        TypedBody::from_serializable(self)
    }

    fn matches(&self, entry: &ActiveRequest, identity: &ServiceIdentity) -> bool {
        match self {
            Self::ById { request_id, .. } => entry.request.id == *request_id,
            Self::ByType {
                request_type,
                service_name,
                ..
            } => {
                service_name
                    .as_ref()
                    .is_none_or(|service_name| *service_name == identity.name)
                    && entry.request.body_type() == request_type
                    && !entry.is_cancelled()
            }
            Self::ByParentId { parent_id, .. } => entry.request.parent_id == Some(*parent_id),
        }
    }
}

/// What one instance did about a cancel request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    /// Whether anything matched on this instance.
    pub found: bool,

    /// Who answered.
    pub identity: ServiceIdentity,

    /// Requests flagged here plus those flagged by cascades.
    pub cancelled_message_count: usize,
}

impl TypedMessage for CancelResponse {
    const MESSAGE_TYPE: &'static str = "cancel-response";
}

/// Aggregate of every [`CancelResponse`] a caller collected.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CancelSummary {
    /// Whether any instance found a match.
    pub found: bool,

    /// Total requests flagged.
    pub cancelled_message_count: usize,

    /// Instances that answered.
    pub responders: Vec<ServiceIdentity>,
}

impl CancelSummary {
    fn add(&mut self, response: CancelResponse) {
        self.found |= response.found;
        self.cancelled_message_count += response.cancelled_message_count;
        self.responders.push(response.identity);
    }
}

/// Whether a message is a cancel request.
pub(crate) fn is_cancel_request(message: &Message) -> bool {
    message
        .as_request()
        .is_some_and(|request| CANCEL_TYPES.contains(&request.body_type()))
}

impl<D: MessageBusDriver> MessageBus<D> {
    /// Broadcasts a cancel request, to every instance or only to
    /// `service_name`, and aggregates the answers that arrive within
    /// `timeout` (the cancel default when unset).
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn cancel(
        &self,
        cancel: CancelRequest,
        service_name: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<CancelSummary, Error> {
        let timeout = timeout.unwrap_or(self.inner.options.cancel.default_timeout);
        let options = RequestOptions::new(control_path(service_name, &self.inner.control)?)
            .with_limit(self.inner.options.cancel.cascade_limit)
            .with_timeout(timeout);

        let summary = self
            .collect_cancel_responses(vec![(cancel.to_body()?, options)])
            .await?;
        info!(
            found = summary.found,
            cancelled = summary.cancelled_message_count,
            responders = summary.responders.len(),
            "cancel request completed"
        );

        Ok(summary)
    }

    pub(crate) fn spawn_cancel_worker(&self) {
        let receiver = self.inner.cancel_receiver.clone();
        let inner = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.lock().clone();
        let tasks = self.inner.tasks.clone();

        self.inner.tasks.spawn(async move {
            // Held for the worker's lifetime, so a restarted bus waits for
            // the previous worker to exit.
            let mut receiver = tokio::select! {
                () = shutdown.cancelled() => return,
                receiver = receiver.lock_owned() => receiver,
            };

            loop {
                let envelope = tokio::select! {
                    () = shutdown.cancelled() => break,
                    envelope = receiver.recv() => match envelope {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };
                let Some(inner) = inner.upgrade() else {
                    break;
                };

                let bus = Self { inner };
                tasks.spawn(async move { bus.handle_cancel(envelope).await });
            }
        });
    }

    async fn handle_cancel(&self, envelope: IncomingEnvelope) {
        let context = HandlerContext::new(
            Arc::new(envelope),
            CancellationToken::new(),
            self.inner.sink.clone(),
        );

        if let Err(e) = respond(&context, || async {
            let request = context
                .request()
                .ok_or_else(|| RequestError::failed("expected a request"))?;
            let cancel = request
                .body
                .decode::<CancelRequest>()
                .map_err(RequestError::InvalidBody)?;

            Ok::<_, RequestError>(self.process_cancel(&cancel, request).await)
        })
        .await
        {
            warn!(error = %e, "failed to process cancel request");
        }
    }

    async fn process_cancel(&self, cancel: &CancelRequest, request: &Request) -> CancelResponse {
        let options = &self.inner.options.cancel;
        let started = Instant::now();
        let budget = request
            .timeout
            .map_or(options.default_timeout, Duration::from_millis)
            / 4
            * 3;

        let identity = &self.inner.identity;
        let matched = self
            .inner
            .active
            .filter(|entry| cancel.matches(entry, identity));
        let found = !matched.is_empty();
        let wait = cancel.waits_on_completion();
        let mut cancelled = 0;

        debug!(
            cancel_type = cancel.message_type(),
            matched = matched.len(),
            budget = ?budget,
            "processing cancel request"
        );

        if found && cancel.cancels_children() {
            let depth = cancel.depth() + 1;

            if depth > options.max_depth {
                warn!(depth, max_depth = options.max_depth, "cancel cascade depth exceeded");
            } else {
                let cascade_budget = if wait { budget / 2 } else { budget };
                cancelled += self.cascade(&matched, depth, wait, cascade_budget).await;
            }
        }

        for entry in &matched {
            entry.token.cancel();
        }
        cancelled += matched.len();

        if wait && found {
            let remaining = budget.saturating_sub(started.elapsed());
            self.wait_for_completion(&matched, remaining).await;
        }

        CancelResponse {
            found,
            identity: identity.clone(),
            cancelled_message_count: cancelled,
        }
    }

    async fn cascade(
        &self,
        parents: &[ActiveRequest],
        depth: u32,
        wait: bool,
        budget: Duration,
    ) -> usize {
        if budget < Duration::from_millis(1) {
            warn!(depth, "no time left to cascade cancellation");
            return 0;
        }

        let mut requests = Vec::with_capacity(parents.len());
        for parent in parents {
            let cancel = CancelRequest::ByParentId {
                parent_id: parent.request.id,
                depth,
                cancel_child_requests: true,
                wait_on_completion: wait,
            };

            match cancel.to_body() {
                Ok(body) => requests.push((
                    body,
                    RequestOptions::new(self.inner.control.clone())
                        .with_limit(self.inner.options.cancel.cascade_limit)
                        .with_timeout(budget),
                )),
                Err(e) => warn!(error = %e, "failed to encode cascaded cancel request"),
            }
        }

        match self.collect_cancel_responses(requests).await {
            Ok(summary) => summary.cancelled_message_count,
            Err(e) => {
                warn!(depth, error = %e, "failed to cascade cancellation");
                0
            }
        }
    }

    async fn collect_cancel_responses(
        &self,
        requests: Vec<(TypedBody, RequestOptions)>,
    ) -> Result<CancelSummary, Error> {
        let mut responses = self.request_batch(requests).await?;
        let mut summary = CancelSummary::default();

        while let Some(response) = responses.next().await {
            match response {
                Ok(response) => match response.decode::<CancelResponse>() {
                    Ok(response) => summary.add(response),
                    Err(e) => warn!(error = %e, "ignoring malformed cancel response"),
                },
                Err(Error::RequestTimeout(timeout)) => {
                    debug!(
                        outstanding = timeout.outstanding.len(),
                        responders = summary.responders.len(),
                        "stopped collecting cancel responses"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(summary)
    }

    async fn wait_for_completion(&self, matched: &[ActiveRequest], budget: Duration) {
        // Unbounded when the budget overflows the clock.
        let deadline = Instant::now().checked_add(budget);
        let poll_interval = self.inner.options.cancel.poll_interval;

        loop {
            let pending = matched
                .iter()
                .filter(|entry| self.inner.active.contains(&entry.request.id))
                .count();
            if pending == 0 {
                return;
            }

            let pause = match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    warn!(pending, "cancelled handlers did not settle in time");
                    return;
                }
                Some(deadline) => {
                    poll_interval.min(deadline.saturating_duration_since(Instant::now()))
                }
                None => poll_interval,
            };

            tokio::time::sleep(pause).await;
        }
    }
}
