//! Subject based routing between in-process subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use fleet_messaging::envelope::Headers;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

const SEPARATOR: char = '.';
const SINGLE_WILDCARD: &str = "*";
const MULTI_WILDCARD: &str = ">";

/// An encoded message as it travels through the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireMessage {
    /// Concrete subject it was published to.
    pub subject: String,

    /// Headers.
    pub headers: Headers,

    /// Encoded payload.
    pub payload: Bytes,
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    pattern: String,
    group: Option<String>,
    sender: mpsc::UnboundedSender<WireMessage>,
}

#[derive(Debug, Default)]
struct BrokerState {
    subscribers: Vec<Subscriber>,
    next_id: u64,
    cursors: HashMap<(String, String), usize>,
    published: u64,
}

/// Shared in-process broker. Clones share the same routing table.
#[derive(Clone, Debug, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to `pattern`. Subscribers sharing a `group` on the same
    /// pattern take turns receiving each message.
    pub fn subscribe(
        &self,
        pattern: impl Into<String>,
        group: Option<String>,
    ) -> (u64, mpsc::UnboundedReceiver<WireMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock();

        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.push(Subscriber {
            id,
            pattern: pattern.into(),
            group,
            sender,
        });

        (id, receiver)
    }

    /// Removes a subscriber. Its receiver sees the channel close.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|subscriber| subscriber.id != id);

        state.subscribers.len() != before
    }

    /// Routes a message and returns how many subscribers it was handed to.
    pub fn publish(&self, message: &WireMessage) -> usize {
        let mut state = self.state.lock();
        state.published += 1;
        state
            .subscribers
            .retain(|subscriber| !subscriber.sender.is_closed());

        let mut groups: HashMap<(String, String), Vec<usize>> = HashMap::new();
        let mut targets = Vec::new();

        for (index, subscriber) in state.subscribers.iter().enumerate() {
            if !subject_matches(&subscriber.pattern, &message.subject) {
                continue;
            }

            match &subscriber.group {
                Some(group) => groups
                    .entry((subscriber.pattern.clone(), group.clone()))
                    .or_default()
                    .push(index),
                None => targets.push(index),
            }
        }

        for (key, members) in groups {
            let cursor = state.cursors.entry(key).or_default();
            targets.push(members[*cursor % members.len()]);
            *cursor = cursor.wrapping_add(1);
        }

        let mut delivered = 0;
        for index in targets {
            if state.subscribers[index].sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }

        trace!(subject = %message.subject, delivered, "routed message");
        delivered
    }

    /// Number of live subscribers whose pattern is exactly `pattern`.
    #[must_use]
    pub fn subscription_count(&self, pattern: &str) -> usize {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|subscriber| subscriber.pattern == pattern && !subscriber.sender.is_closed())
            .count()
    }

    /// Messages published since the broker was created.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.state.lock().published
    }
}

/// Whether `subject` matches `pattern`, where `*` matches one token and a
/// trailing `>` matches one or more.
#[must_use]
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut patterns = pattern.split(SEPARATOR);
    let mut subjects = subject.split(SEPARATOR);

    loop {
        match (patterns.next(), subjects.next()) {
            (Some(MULTI_WILDCARD), Some(_)) => return patterns.next().is_none(),
            (Some(SINGLE_WILDCARD), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(subject: &str) -> WireMessage {
        WireMessage {
            subject: subject.to_string(),
            headers: Headers::new(),
            payload: Bytes::from_static(b"{}"),
        }
    }

    #[test]
    fn test_subject_matching() {
        assert!(subject_matches("events.vehicles", "events.vehicles"));
        assert!(!subject_matches("events.vehicles", "events.vehicles.query"));
        assert!(subject_matches("events.*.query", "events.vehicles.query"));
        assert!(!subject_matches("events.*", "events.vehicles.query"));
        assert!(subject_matches("events.>", "events.vehicles.query"));
        assert!(!subject_matches("events.>", "events"));
        assert!(!subject_matches("events.vehicles.query", "events.vehicles"));
    }

    #[tokio::test]
    async fn test_topic_subscribers_all_receive() {
        let broker = MemoryBroker::new();
        let (_, mut first) = broker.subscribe("fleet.*", None);
        let (_, mut second) = broker.subscribe("fleet.status", None);

        assert_eq!(broker.publish(&message("fleet.status")), 2);
        assert_eq!(first.recv().await.unwrap().subject, "fleet.status");
        assert_eq!(second.recv().await.unwrap().subject, "fleet.status");
    }

    #[tokio::test]
    async fn test_queue_group_round_robin() {
        let broker = MemoryBroker::new();
        let (_, mut first) = broker.subscribe("jobs", Some("workers".to_string()));
        let (_, mut second) = broker.subscribe("jobs", Some("workers".to_string()));

        for _ in 0..4 {
            assert_eq!(broker.publish(&message("jobs")), 1);
        }

        let mut counts = [0, 0];
        while first.try_recv().is_ok() {
            counts[0] += 1;
        }
        while second.try_recv().is_ok() {
            counts[1] += 1;
        }
        assert_eq!(counts, [2, 2]);
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_receiver() {
        let broker = MemoryBroker::new();
        let (id, mut receiver) = broker.subscribe("jobs", None);

        assert!(broker.unsubscribe(id));
        assert!(!broker.unsubscribe(id));
        assert_eq!(broker.publish(&message("jobs")), 0);
        assert!(receiver.recv().await.is_none());
        assert_eq!(broker.published_count(), 1);
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let broker = MemoryBroker::new();
        let (_, receiver) = broker.subscribe("jobs", None);
        assert_eq!(broker.subscription_count("jobs"), 1);

        drop(receiver);
        assert_eq!(broker.subscription_count("jobs"), 0);
        assert_eq!(broker.publish(&message("jobs")), 0);
    }
}
