//! Correlation of incoming responses with outstanding requests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::envelope::ResponseEnvelope;
use crate::error::RequestTimeoutError;
use crate::request::{RequestOptions, ResponseValidator};

struct Outstanding {
    limit: usize,
    validator: Option<ResponseValidator>,
    received: usize,
}

/// Tracks the requests of one batch and buffers their responses.
pub struct ResponseMatcher {
    requests: HashMap<Uuid, Outstanding>,
    order: Vec<Uuid>,
    buffered: VecDeque<ResponseEnvelope>,
    started: Instant,
    max_timeout: Duration,
}

impl ResponseMatcher {
    /// An empty matcher whose clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: HashMap::new(),
            order: Vec::new(),
            buffered: VecDeque::new(),
            started: Instant::now(),
            max_timeout: Duration::ZERO,
        }
    }

    /// Starts waiting for responses to `request_id`.
    pub fn register(&mut self, request_id: Uuid, options: &RequestOptions) {
        if let Some(timeout) = options.timeout {
            self.max_timeout = self.max_timeout.max(timeout);
        }

        if self
            .requests
            .insert(
                request_id,
                Outstanding {
                    limit: options.limit.max(1),
                    validator: options.validator.clone(),
                    received: 0,
                },
            )
            .is_none()
        {
            self.order.push(request_id);
        }
    }

    /// Claims a response if it answers a registered request.
    ///
    /// Responses rejected by the validator are claimed but neither buffered
    /// nor counted.
    pub fn try_match(&mut self, response: &ResponseEnvelope) -> bool {
        let request_id = response.response.request_id();
        let Some(outstanding) = self.requests.get_mut(&request_id) else {
            return false;
        };

        if outstanding
            .validator
            .as_ref()
            .is_some_and(|validator| !validator(&response.response))
        {
            return true;
        }

        outstanding.received += 1;
        if outstanding.received >= outstanding.limit {
            self.requests.remove(&request_id);
        }
        self.buffered.push_back(response.clone());

        true
    }

    /// Whether every request is satisfied and the buffer is drained.
    ///
    /// # Errors
    ///
    /// Returns the outstanding ids once the largest timeout has elapsed.
    pub fn is_done(&self) -> Result<bool, RequestTimeoutError> {
        if self.requests.is_empty() {
            return Ok(self.buffered.is_empty());
        }

        let elapsed = self.started.elapsed();
        if !self.max_timeout.is_zero() && elapsed >= self.max_timeout {
            return Err(RequestTimeoutError {
                outstanding: self.outstanding(),
                elapsed,
            });
        }

        Ok(false)
    }

    /// Drains buffered responses in arrival order.
    pub fn take_matches(&mut self) -> Vec<ResponseEnvelope> {
        self.buffered.drain(..).collect()
    }

    /// Ids still waiting, in registration order.
    #[must_use]
    pub fn outstanding(&self) -> Vec<Uuid> {
        self.order
            .iter()
            .filter(|id| self.requests.contains_key(id))
            .copied()
            .collect()
    }

    /// When the batch times out, if it does.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        if self.max_timeout.is_zero() {
            return None;
        }

        self.started.checked_add(self.max_timeout)
    }
}

impl Default for ResponseMatcher {
    fn default() -> Self {
        Self::new()
    }
}

struct SharedMatcher {
    matcher: Mutex<ResponseMatcher>,
    notify: Notify,
}

/// All live matchers of one bus.
#[derive(Clone, Default)]
pub struct ResponseMatcherCollection {
    matchers: Arc<Mutex<Vec<(u64, Arc<SharedMatcher>)>>>,
    next_id: Arc<AtomicU64>,
}

impl ResponseMatcherCollection {
    /// Adds a matcher, released when the handle drops.
    #[must_use]
    pub fn acquire(&self) -> MatcherHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(SharedMatcher {
            matcher: Mutex::new(ResponseMatcher::new()),
            notify: Notify::new(),
        });
        self.matchers.lock().push((id, shared.clone()));

        MatcherHandle {
            id,
            shared,
            collection: self.clone(),
        }
    }

    /// Offers a response to each matcher in turn. The first to claim it
    /// wins.
    pub fn match_response(&self, response: &ResponseEnvelope) -> bool {
        let matchers = self.matchers.lock();

        for (_, shared) in matchers.iter() {
            if shared.matcher.lock().try_match(response) {
                shared.notify.notify_one();
                return true;
            }
        }

        false
    }

    /// Number of live matchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.matchers.lock().len()
    }

    /// Whether no matcher is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matchers.lock().is_empty()
    }

    fn release(&self, id: u64) {
        self.matchers.lock().retain(|(existing, _)| *existing != id);
    }
}

/// A matcher owned by one request stream.
pub struct MatcherHandle {
    id: u64,
    shared: Arc<SharedMatcher>,
    collection: ResponseMatcherCollection,
}

impl MatcherHandle {
    /// See [`ResponseMatcher::register`].
    pub fn register(&self, request_id: Uuid, options: &RequestOptions) {
        self.shared.matcher.lock().register(request_id, options);
    }

    /// See [`ResponseMatcher::take_matches`].
    #[must_use]
    pub fn take_matches(&self) -> Vec<ResponseEnvelope> {
        self.shared.matcher.lock().take_matches()
    }

    /// See [`ResponseMatcher::is_done`].
    ///
    /// # Errors
    ///
    /// See [`ResponseMatcher::is_done`].
    pub fn is_done(&self) -> Result<bool, RequestTimeoutError> {
        self.shared.matcher.lock().is_done()
    }

    /// Waits for a new match, at most `poll_interval` and never past the
    /// deadline.
    pub async fn wait(&self, poll_interval: Duration) {
        let deadline = self.shared.matcher.lock().deadline();
        let wait_for = deadline.map_or(poll_interval, |deadline| {
            poll_interval.min(deadline.saturating_duration_since(Instant::now()))
        });

        if wait_for.is_zero() {
            return;
        }

        let _ = tokio::time::timeout(wait_for, self.shared.notify.notified()).await;
    }
}

impl Drop for MatcherHandle {
    fn drop(&mut self) {
        self.collection.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{ErrorCode, Headers, Response, TypedBody};
    use crate::path::ReplyPath;

    fn options(limit: usize) -> RequestOptions {
        RequestOptions::new(ReplyPath::new("svc")).with_limit(limit)
    }

    fn response(request_id: Uuid) -> ResponseEnvelope {
        ResponseEnvelope {
            subject: "inbox".to_string(),
            headers: Headers::new(),
            response: Response::success(request_id, TypedBody::new("pong")),
        }
    }

    fn numbered(request_id: Uuid, n: usize) -> ResponseEnvelope {
        ResponseEnvelope {
            subject: format!("inbox.{n}"),
            ..response(request_id)
        }
    }

    fn subjects(matches: Vec<ResponseEnvelope>) -> Vec<String> {
        matches.into_iter().map(|response| response.subject).collect()
    }

    #[tokio::test]
    async fn test_limit_bounds_deliveries() {
        let id = Uuid::new_v4();
        let mut matcher = ResponseMatcher::new();
        matcher.register(id, &options(3));

        assert!(matcher.try_match(&response(id)));
        assert_eq!(matcher.outstanding(), vec![id]);
        assert!(matcher.try_match(&response(id)));
        assert_eq!(matcher.outstanding(), vec![id]);
        assert_eq!(matcher.is_done(), Ok(false));

        assert!(matcher.try_match(&response(id)));
        assert!(matcher.outstanding().is_empty());
        for _ in 0..2 {
            assert!(!matcher.try_match(&response(id)));
        }

        assert_eq!(matcher.take_matches().len(), 3);
        assert_eq!(matcher.is_done(), Ok(true));
    }

    #[tokio::test]
    async fn test_matches_drain_in_arrival_order() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let mut matcher = ResponseMatcher::new();
        matcher.register(first, &options(2));
        matcher.register(second, &options(2));

        matcher.try_match(&numbered(first, 0));
        matcher.try_match(&numbered(second, 1));
        assert_eq!(subjects(matcher.take_matches()), vec!["inbox.0", "inbox.1"]);

        matcher.try_match(&numbered(second, 2));
        matcher.try_match(&numbered(first, 3));
        assert_eq!(subjects(matcher.take_matches()), vec!["inbox.2", "inbox.3"]);
        assert!(matcher.take_matches().is_empty());
        assert_eq!(matcher.is_done(), Ok(true));
    }

    #[tokio::test]
    async fn test_unknown_responses_are_not_claimed() {
        let mut matcher = ResponseMatcher::new();
        matcher.register(Uuid::new_v4(), &options(1));

        assert!(!matcher.try_match(&response(Uuid::new_v4())));
        assert!(matcher.take_matches().is_empty());
    }

    #[tokio::test]
    async fn test_validator_rejects_without_counting() {
        let id = Uuid::new_v4();
        let mut matcher = ResponseMatcher::new();
        matcher.register(id, &options(1).with_validator(Response::is_success));

        let rejected = ResponseEnvelope {
            response: Response::error(id, ErrorCode::Exception, None),
            ..response(id)
        };
        assert!(matcher.try_match(&rejected));
        assert!(matcher.take_matches().is_empty());
        assert_eq!(matcher.outstanding(), vec![id]);

        assert!(matcher.try_match(&response(id)));
        assert_eq!(matcher.take_matches().len(), 1);
        assert!(matcher.outstanding().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_outstanding_ids() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let mut matcher = ResponseMatcher::new();
        matcher.register(first, &options(1).with_timeout(Duration::from_millis(500)));
        matcher.register(second, &options(1).with_timeout(Duration::from_secs(2)));

        matcher.try_match(&response(first));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(matcher.is_done(), Ok(false));

        tokio::time::advance(Duration::from_secs(1)).await;
        let err = matcher.is_done().unwrap_err();
        assert_eq!(err.outstanding, vec![second]);
        assert_eq!(matcher.take_matches().len(), 1);
    }

    #[tokio::test]
    async fn test_first_matcher_claims() {
        let collection = ResponseMatcherCollection::default();
        let id = Uuid::new_v4();

        let first = collection.acquire();
        let second = collection.acquire();
        first.register(id, &options(1));
        second.register(id, &options(1));

        assert!(collection.match_response(&response(id)));
        assert_eq!(first.take_matches().len(), 1);
        assert!(second.take_matches().is_empty());

        drop(first);
        assert_eq!(collection.len(), 1);
        drop(second);
        assert!(collection.is_empty());
    }

    #[tokio::test]
    async fn test_wait_wakes_on_match() {
        let collection = ResponseMatcherCollection::default();
        let id = Uuid::new_v4();
        let handle = collection.acquire();
        handle.register(id, &options(1));

        let matcher = collection.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            matcher.match_response(&response(id));
        });

        tokio::time::timeout(Duration::from_secs(1), handle.wait(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(handle.take_matches().len(), 1);
    }
}
