//! Requests currently being processed on this node.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::envelope::{IncomingEnvelope, Request};

/// One in-flight request.
#[derive(Clone, Debug)]
pub struct ActiveRequest {
    /// The request.
    pub request: Request,

    /// Envelope it arrived in.
    pub envelope: Arc<IncomingEnvelope>,

    /// Handlers processing it.
    pub handlers: Vec<String>,

    /// Flagged when cancellation is requested.
    pub token: CancellationToken,

    slot: u64,
}

impl ActiveRequest {
    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct ActiveState {
    entries: HashMap<Uuid, ActiveRequest>,
    next_slot: u64,
}

/// Table of in-flight requests keyed by request id.
#[derive(Clone, Debug, Default)]
pub struct ActiveHandlers {
    state: Arc<Mutex<ActiveState>>,
}

impl ActiveHandlers {
    /// Records a request until the returned guard is dropped.
    pub(crate) fn enter(
        &self,
        request: &Request,
        envelope: Arc<IncomingEnvelope>,
        handlers: Vec<String>,
    ) -> ActiveGuard {
        let token = CancellationToken::new();
        let mut state = self.state.lock();

        state.next_slot += 1;
        let slot = state.next_slot;

        state.entries.insert(
            request.id,
            ActiveRequest {
                request: request.clone(),
                envelope,
                handlers,
                token: token.clone(),
                slot,
            },
        );

        ActiveGuard {
            handlers: self.clone(),
            id: request.id,
            slot,
            token,
        }
    }

    /// Entry for a request id.
    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<ActiveRequest> {
        self.state.lock().entries.get(id).cloned()
    }

    /// Whether a request is in flight.
    #[must_use]
    pub fn contains(&self, id: &Uuid) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    /// Entries matching a predicate.
    pub fn filter(&self, predicate: impl Fn(&ActiveRequest) -> bool) -> Vec<ActiveRequest> {
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| predicate(entry))
            .cloned()
            .collect()
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}

/// Removes its entry when processing settles.
#[derive(Debug)]
pub(crate) struct ActiveGuard {
    handlers: ActiveHandlers,
    id: Uuid,
    slot: u64,
    token: CancellationToken,
}

impl ActiveGuard {
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut state = self.handlers.state.lock();

        // A redelivered request with the same id may have replaced the entry.
        if state
            .entries
            .get(&self.id)
            .is_some_and(|entry| entry.slot == self.slot)
        {
            state.entries.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Headers, Message, TypedBody};

    fn request() -> (Request, Arc<IncomingEnvelope>) {
        let request = Request {
            id: Uuid::new_v4(),
            reply_to: "inbox".to_string(),
            parent_id: None,
            timeout: None,
            expires_at: None,
            body: TypedBody::new("work"),
        };
        let envelope = Arc::new(IncomingEnvelope {
            subject: "work".to_string(),
            subscribed_subject: "work".to_string(),
            headers: Headers::new(),
            message: Message::Request(request.clone()),
        });
        (request, envelope)
    }

    #[test]
    fn test_guard_removes_entry() {
        let active = ActiveHandlers::default();
        let (request, envelope) = request();

        let guard = active.enter(&request, envelope, vec!["worker".to_string()]);
        assert!(active.contains(&request.id));

        guard.token().cancel();
        assert!(active.get(&request.id).unwrap().is_cancelled());

        drop(guard);
        assert!(active.is_empty());
    }

    #[test]
    fn test_stale_guard_keeps_newer_entry() {
        let active = ActiveHandlers::default();
        let (request, envelope) = request();

        let first = active.enter(&request, envelope.clone(), Vec::new());
        let second = active.enter(&request, envelope, Vec::new());

        drop(first);
        assert!(active.contains(&request.id));

        drop(second);
        assert!(!active.contains(&request.id));
    }
}
