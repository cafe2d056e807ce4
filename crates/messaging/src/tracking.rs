//! Sequence tracking of messages per emitter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::envelope::TypedMessage;
use crate::identity::ServiceIdentity;

/// Position of a message in its emitter's sequence.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MessageTracking {
    /// Emitting instance.
    pub emitter: ServiceIdentity,

    /// Monotonic sequence number.
    pub sequence: u64,
}

/// Acknowledges receipt up to a tracking position.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MessageTrackingAck {
    /// Acknowledged position.
    pub tracking: MessageTracking,
}

impl TypedMessage for MessageTrackingAck {
    const MESSAGE_TYPE: &'static str = "message-tracking-ack";
}

/// Hands out sequence numbers for one emitter.
#[derive(Debug)]
pub struct MessageTracker {
    emitter: ServiceIdentity,
    sequence: AtomicU64,
}

impl MessageTracker {
    /// Starts at sequence zero.
    #[must_use]
    pub const fn new(emitter: ServiceIdentity) -> Self {
        Self {
            emitter,
            sequence: AtomicU64::new(0),
        }
    }

    /// Next position.
    pub fn next(&self) -> MessageTracking {
        MessageTracking {
            emitter: self.emitter.clone(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    /// Last sequence handed out.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

/// Latest known position of one emitter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrackingState {
    /// Highest position seen.
    pub tracking: MessageTracking,

    /// Messages seen from this emitter.
    pub counter: u64,

    /// Whether `tracking` advanced since the last [`MessageTrackingCollection::take_dirty`].
    pub dirty: bool,
}

/// Latest positions of every emitter seen.
#[derive(Debug, Default)]
pub struct MessageTrackingCollection {
    by_emitter: HashMap<String, TrackingState>,
}

impl MessageTrackingCollection {
    /// An empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a position. Only advances on a higher sequence.
    pub fn add(&mut self, tracking: MessageTracking) -> &TrackingState {
        let state = self
            .by_emitter
            .entry(tracking.emitter.instance_key())
            .or_insert_with(|| TrackingState {
                tracking: tracking.clone(),
                counter: 0,
                dirty: true,
            });

        state.counter += 1;
        if tracking.sequence > state.tracking.sequence {
            state.tracking = tracking;
            state.dirty = true;
        }

        state
    }

    /// State of an emitter.
    #[must_use]
    pub fn find(&self, emitter: &ServiceIdentity) -> Option<&TrackingState> {
        self.by_emitter.get(&emitter.instance_key())
    }

    /// All states.
    pub fn list(&self) -> impl Iterator<Item = &TrackingState> {
        self.by_emitter.values()
    }

    /// States that advanced since the last call, now marked clean.
    pub fn take_dirty(&mut self) -> Vec<TrackingState> {
        self.by_emitter
            .values_mut()
            .filter(|state| state.dirty)
            .map(|state| {
                state.dirty = false;
                state.clone()
            })
            .collect()
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.by_emitter.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_sequence() {
        let tracker = MessageTracker::new(ServiceIdentity::new("telemetry", 1));

        assert_eq!(tracker.next().sequence, 1);
        assert_eq!(tracker.next().sequence, 2);
        assert_eq!(tracker.current(), 2);
    }

    #[test]
    fn test_collection_keeps_highest() {
        let tracker = MessageTracker::new(ServiceIdentity::new("telemetry", 1));
        let first = tracker.next();
        let second = tracker.next();
        let mut collection = MessageTrackingCollection::new();

        collection.add(second.clone());
        collection.take_dirty();

        let state = collection.add(first);
        assert_eq!(state.tracking, second);
        assert_eq!(state.counter, 2);
        assert!(!state.dirty);
        assert!(collection.take_dirty().is_empty());

        collection.add(tracker.next());
        assert_eq!(collection.take_dirty().len(), 1);
        assert_eq!(
            collection
                .find(&ServiceIdentity::new("telemetry", 1))
                .map(|state| state.tracking.sequence),
            Some(3)
        );
    }
}
