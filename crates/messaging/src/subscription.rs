use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::path::SubscribePath;

/// Delivery semantics of a subscription.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    /// Each message goes to exactly one instance of the service.
    Queue,

    /// Each message goes to every subscriber.
    Topic,
}

/// A subscription request in path form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageSubscription {
    /// Delivery semantics.
    pub kind: SubscriptionKind,

    /// What to listen on.
    pub path: SubscribePath,
}

impl MessageSubscription {
    /// Load balanced across instances of this service.
    #[must_use]
    pub const fn queue(path: SubscribePath) -> Self {
        Self {
            kind: SubscriptionKind::Queue,
            path,
        }
    }

    /// Delivered to every instance.
    #[must_use]
    pub const fn topic(path: SubscribePath) -> Self {
        Self {
            kind: SubscriptionKind::Topic,
            path,
        }
    }
}

/// A subscription after rendering, as handed to the driver.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedSubscription {
    /// Delivery semantics.
    pub kind: SubscriptionKind,

    /// Rendered transport subject or pattern.
    pub subject: String,

    /// Queue group for queue subscriptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_group: Option<String>,
}

/// Set of rendered subscriptions in insertion order.
#[derive(Debug, Default)]
pub struct MessageSubscriptions {
    entries: Vec<RenderedSubscription>,
    keys: HashSet<(SubscriptionKind, String)>,
}

impl MessageSubscriptions {
    /// Adds a subscription. Returns `false` if an equivalent one exists.
    pub fn add(&mut self, subscription: RenderedSubscription) -> bool {
        if !self
            .keys
            .insert((subscription.kind, subscription.subject.clone()))
        {
            return false;
        }
        self.entries.push(subscription);
        true
    }

    /// Removes a subscription.
    pub fn remove(&mut self, subscription: &RenderedSubscription) -> bool {
        if !self
            .keys
            .remove(&(subscription.kind, subscription.subject.clone()))
        {
            return false;
        }
        self.entries.retain(|entry| {
            entry.kind != subscription.kind || entry.subject != subscription.subject
        });
        true
    }

    /// Whether an equivalent subscription exists.
    #[must_use]
    pub fn contains(&self, kind: SubscriptionKind, subject: &str) -> bool {
        self.keys.contains(&(kind, subject.to_string()))
    }

    /// All subscriptions.
    #[must_use]
    pub fn entries(&self) -> &[RenderedSubscription] {
        &self.entries
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are none.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(kind: SubscriptionKind, subject: &str) -> RenderedSubscription {
        RenderedSubscription {
            kind,
            subject: subject.to_string(),
            queue_group: None,
        }
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut subscriptions = MessageSubscriptions::default();

        assert!(subscriptions.add(rendered(SubscriptionKind::Topic, "events.a")));
        assert!(!subscriptions.add(rendered(SubscriptionKind::Topic, "events.a")));
        assert!(subscriptions.add(rendered(SubscriptionKind::Queue, "events.a")));
        assert_eq!(subscriptions.len(), 2);
    }

    #[test]
    fn test_remove() {
        let mut subscriptions = MessageSubscriptions::default();
        let subscription = rendered(SubscriptionKind::Topic, "events.a");
        subscriptions.add(subscription.clone());

        assert!(subscriptions.remove(&subscription));
        assert!(!subscriptions.contains(SubscriptionKind::Topic, "events.a"));
        assert!(subscriptions.is_empty());
    }
}
