use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::envelope::{Headers, Response};
use crate::error::Error;
use crate::path::Destination;

/// Decides whether a correlated response counts toward a request's limit.
pub type ResponseValidator = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Per request settings.
#[derive(Clone)]
pub struct RequestOptions {
    /// Where the request goes.
    pub destination: Destination,

    /// Request id. Generated when unset.
    pub id: Option<Uuid>,

    /// Request that caused this one.
    pub parent_id: Option<Uuid>,

    /// Number of responses to collect.
    pub limit: usize,

    /// How long to wait for `limit` responses. `None` waits forever unless
    /// the bus has a default.
    pub timeout: Option<Duration>,

    /// Absolute deadline sent to responders. Derived from `timeout` when
    /// unset.
    pub deadline: Option<DateTime<Utc>>,

    /// Extra headers.
    pub headers: Headers,

    /// Responses failing this are consumed but not delivered or counted.
    pub validator: Option<ResponseValidator>,
}

impl RequestOptions {
    /// One response, no timeout.
    pub fn new(destination: impl Into<Destination>) -> Self {
        Self {
            destination: destination.into(),
            id: None,
            parent_id: None,
            limit: 1,
            timeout: None,
            deadline: None,
            headers: Headers::new(),
            validator: None,
        }
    }

    /// Sets the request id.
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the parent request id.
    #[must_use]
    pub fn with_parent_id(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Sets the response limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets an absolute deadline for responders.
    #[must_use]
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the response validator.
    #[must_use]
    pub fn with_validator(
        mut self,
        validator: impl Fn(&Response) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.limit < 1 {
            return Err(Error::InvalidLimit(self.limit));
        }

        if let Some(timeout) = self.timeout {
            if timeout < Duration::from_millis(1) {
                return Err(Error::InvalidTimeout(timeout));
            }
        }

        Ok(())
    }

    pub(crate) fn timeout_millis(&self) -> Option<u64> {
        self.timeout
            .map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
    }

    pub(crate) fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.deadline.or_else(|| {
            self.timeout
                .and_then(|timeout| chrono::Duration::from_std(timeout).ok())
                .and_then(|timeout| now.checked_add_signed(timeout))
        })
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("destination", &self.destination)
            .field("id", &self.id)
            .field("parent_id", &self.parent_id)
            .field("limit", &self.limit)
            .field("timeout", &self.timeout)
            .field("deadline", &self.deadline)
            .field("headers", &self.headers)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}
