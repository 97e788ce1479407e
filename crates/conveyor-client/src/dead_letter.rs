//! Dead-letter sink capability.
//!
//! Messages whose consecutive failure count reaches the retry limit are
//! handed here instead of being retried forever. The sink is the terminal
//! fallback: a rejection is logged and never blocks acknowledgment of the
//! exhausted message.

use std::{future::Future, pin::Pin};

use conveyor_core::DeadLetter;
use tracing::error;

/// Terminal fallback for messages that exhausted their retry budget.
///
/// One operation; any implementation satisfying it can be substituted at
/// consumer construction.
pub trait DeadLetterSink: Send + Sync + 'static {
    /// Accepts a terminally-failed message.
    ///
    /// A returned error is logged by the caller and never escalated; the
    /// message is acknowledged regardless of the outcome here.
    fn accept(
        &self,
        letter: DeadLetter,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

/// Default sink: records the dead letter in the log and accepts it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl LogSink {
    /// Creates a new logging sink.
    pub fn new() -> Self {
        Self
    }
}

impl DeadLetterSink for LogSink {
    fn accept(
        &self,
        letter: DeadLetter,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            error!(
                message_id = %letter.message.id,
                topic = %letter.topic,
                group = %letter.group,
                consumer = %letter.consumer,
                failures = letter.failure_count,
                "message exceeded retry limit"
            );
            Ok(())
        })
    }
}
