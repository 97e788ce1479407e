//! Per-consumer failure bookkeeping.
//!
//! Maps message identity to its consecutive callback failure count. One
//! tracker per consumer instance, written only by that instance's cycle —
//! the strictly sequential cycle makes it single-writer, so the tracker
//! itself carries no locking. Entries live only as long as the instance:
//! a restart resets every message's retry budget.

use std::collections::HashMap;

use conveyor_core::{Message, MessageId};

/// A tracked message with its consecutive failure count.
#[derive(Debug, Clone)]
pub struct TrackedMessage {
    /// The failing message, retained for dead-letter delivery.
    pub message: Message,
    /// Consecutive callback failures observed so far. Never decreases.
    pub failures: u32,
}

/// In-memory map from message identity to consecutive failure count.
///
/// Keyed strictly by the store-assigned id: two deliveries with identical
/// key and value never merge counts.
#[derive(Debug, Default)]
pub struct FailureTracker {
    entries: HashMap<MessageId, TrackedMessage>,
}

impl FailureTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one callback failure for a message and returns the new count.
    ///
    /// Creates the entry at 1 on the first failure.
    pub fn increment(&mut self, message: &Message) -> u32 {
        let entry = self
            .entries
            .entry(message.id.clone())
            .or_insert_with(|| TrackedMessage { message: message.clone(), failures: 0 });
        entry.failures += 1;
        entry.failures
    }

    /// Removes a message's entry. Called exactly when the message is
    /// acknowledged.
    pub fn clear(&mut self, id: &MessageId) {
        self.entries.remove(id);
    }

    /// Entries whose failure count reached the threshold — the set swept
    /// for dead-lettering.
    pub fn entries_at_or_above(&self, threshold: u32) -> Vec<TrackedMessage> {
        self.entries.values().filter(|entry| entry.failures >= threshold).cloned().collect()
    }

    /// Failure count for a message, if it is tracked.
    pub fn count_for(&self, id: &MessageId) -> Option<u32> {
        self.entries.get(id).map(|entry| entry.failures)
    }

    /// Snapshot of all tracked identities and counts.
    pub fn snapshot(&self) -> Vec<(MessageId, u32)> {
        self.entries.iter().map(|(id, entry)| (id.clone(), entry.failures)).collect()
    }

    /// Number of tracked messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
