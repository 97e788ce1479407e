//! The queue store contract consumed by producers and consumers.

use std::{future::Future, pin::Pin, time::Duration};

use conveyor_core::{error::Result, CoreError, Message, MessageId};

/// Operations a log-structured, consumer-group-aware queue store provides.
///
/// This trait abstracts the store edge so the consumption engine can be
/// exercised against an in-memory implementation in tests while production
/// wiring uses Redis Streams. Durable delivery and acknowledgment state
/// lives behind this contract; callers hold no durable state of their own.
pub trait QueueStore: Send + Sync + 'static {
    /// Appends a message to a topic bounded at `max_len` entries.
    ///
    /// The topic is trimmed to at most `max_len` entries on append, oldest
    /// first. Returns the store-assigned, monotonically ordered id.
    fn append(
        &self,
        topic: &str,
        max_len: usize,
        key: &str,
        value: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageId>> + Send + '_>>;

    /// Reads messages newly available to `consumer` within `group`.
    ///
    /// Blocks up to `block` waiting for messages (a zero `block` reads
    /// without waiting) and preserves store insertion order. Each message is
    /// delivered to exactly one member of the group and joins that member's
    /// pending set until acknowledged. Returns `CoreError::NoMessage` when
    /// the wait times out empty.
    fn read_new(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
        block: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>>;

    /// Reads `consumer`'s pending messages: delivered earlier, possibly
    /// before a crash, never acknowledged.
    ///
    /// Does not block. Returns `CoreError::NoMessage` when the pending set
    /// is empty.
    fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>>;

    /// Acknowledges one message, removing it from the group's pending set.
    ///
    /// Succeeds only if exactly one pending entry was removed; any other
    /// count is `CoreError::AckRejected`.
    fn acknowledge(
        &self,
        topic: &str,
        group: &str,
        id: &MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Declares a consumer group on a topic, creating the topic if needed.
    ///
    /// Idempotent: declaring a group that already exists succeeds.
    fn create_group(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Rejects empty identifiers before they reach the store.
pub(crate) fn require_nonempty(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CoreError::invalid_input(format!("{field} can't be empty")));
    }
    Ok(())
}
