//! Message model and dead-letter record.
//!
//! Defines the store-assigned message identity, the message entity held
//! transiently by consumers, and the record handed to a dead-letter sink
//! when a message exhausts its retry budget.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned message identifier.
///
/// Wraps the stream entry id the store hands out on append (for Redis
/// Streams, a `millis-sequence` pair such as `1526919030474-55`). Identifiers
/// are monotonically ordered by the store within a topic; the wrapper exists
/// so failure bookkeeping is keyed by identity and can never be confused
/// with a message key or value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Returns the raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// A message as delivered by the queue store.
///
/// Immutable once appended; owned by the store and held transiently by the
/// consumer until acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned identity, unique and ordered within the topic.
    pub id: MessageId,
    /// Producer-supplied key.
    pub key: String,
    /// Producer-supplied value.
    pub value: String,
}

/// A message that exhausted its retry budget, with its delivery context.
///
/// Handed to a dead-letter sink exactly once per exhaustion; after the sink
/// has seen it the message is acknowledged and leaves local tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The terminally-failed message.
    pub message: Message,
    /// Topic the message was consumed from.
    pub topic: String,
    /// Consumer group the failing consumer belongs to.
    pub group: String,
    /// Consumer instance that exhausted the retry budget.
    pub consumer: String,
    /// Consecutive callback failures observed at sweep time.
    pub failure_count: u32,
    /// When the retry budget was declared exhausted.
    pub failed_at: DateTime<Utc>,
}
