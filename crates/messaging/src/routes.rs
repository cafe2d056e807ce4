use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// One observed flow of a message type between two services.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRoute {
    /// Body type.
    pub message_type: String,

    /// Normalized subject the message arrived on.
    pub subject: String,

    /// Subscription that matched.
    pub subscription: String,

    /// Sender identity.
    pub sender: String,

    /// Receiver identity.
    pub receiver: String,
}

impl MessageRoute {
    /// Deduplication key.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.subject, self.subscription, self.message_type, self.sender, self.receiver
        )
    }
}

/// Recently observed routes. The oldest route is evicted once `capacity`
/// is reached.
#[derive(Debug)]
pub struct MessageRoutes {
    routes: VecDeque<MessageRoute>,
    keys: HashSet<String>,
    capacity: usize,
}

impl MessageRoutes {
    /// An empty set holding at most `capacity` routes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            routes: VecDeque::new(),
            keys: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Records a route. Returns `false` if it was already known.
    pub fn add(&mut self, route: MessageRoute) -> bool {
        if !self.keys.insert(route.key()) {
            return false;
        }

        if self.routes.len() >= self.capacity {
            if let Some(evicted) = self.routes.pop_front() {
                self.keys.remove(&evicted.key());
            }
        }
        self.routes.push_back(route);

        true
    }

    /// Known routes, oldest first.
    #[must_use]
    pub fn routes(&self) -> Vec<MessageRoute> {
        self.routes.iter().cloned().collect()
    }

    /// Number of known routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
