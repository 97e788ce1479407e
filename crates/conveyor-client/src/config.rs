//! Configuration for consumer and producer instances.
//!
//! One struct per instance kind, documented defaults, and a single
//! normalization step applied at construction: unset (zero) options receive
//! their defaults, everything else is taken as given.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_DEAD_LETTER_DELIVER_TIMEOUT_MS, DEFAULT_HANDLE_MESSAGES_TIMEOUT_MS,
    DEFAULT_MAX_QUEUE_LEN, DEFAULT_MAX_RETRY_LIMIT, DEFAULT_RECEIVE_TIMEOUT_MS,
};

/// Configuration for a consumer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// How long one poll for new messages may block. Zero messages after the
    /// timeout is not an error; the cycle proceeds.
    pub receive_timeout: Duration,

    /// Consecutive callback failures at or above which a message is handed
    /// to the dead-letter sink.
    pub max_retry_limit: u32,

    /// Budget for delivering one dead letter to the sink.
    pub dead_letter_deliver_timeout: Duration,

    /// Shared budget for dispatching one batch of messages through the
    /// callback. Messages not reached within the budget stay pending and
    /// resurface next cycle.
    pub handle_messages_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_millis(DEFAULT_RECEIVE_TIMEOUT_MS),
            max_retry_limit: DEFAULT_MAX_RETRY_LIMIT,
            dead_letter_deliver_timeout: Duration::from_millis(
                DEFAULT_DEAD_LETTER_DELIVER_TIMEOUT_MS,
            ),
            handle_messages_timeout: Duration::from_millis(DEFAULT_HANDLE_MESSAGES_TIMEOUT_MS),
        }
    }
}

impl ConsumerConfig {
    /// Replaces unset (zero) options with their defaults.
    ///
    /// Applied once at consumer construction; the consumer never sees a zero
    /// timeout or a zero retry limit.
    pub fn with_defaults(self) -> Self {
        let defaults = Self::default();
        Self {
            receive_timeout: non_zero_or(self.receive_timeout, defaults.receive_timeout),
            max_retry_limit: if self.max_retry_limit == 0 {
                defaults.max_retry_limit
            } else {
                self.max_retry_limit
            },
            dead_letter_deliver_timeout: non_zero_or(
                self.dead_letter_deliver_timeout,
                defaults.dead_letter_deliver_timeout,
            ),
            handle_messages_timeout: non_zero_or(
                self.handle_messages_timeout,
                defaults.handle_messages_timeout,
            ),
        }
    }
}

/// Configuration for a producer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Bound on the topic's retained length; oldest entries are trimmed on
    /// append beyond it.
    pub max_queue_len: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self { max_queue_len: DEFAULT_MAX_QUEUE_LEN }
    }
}

impl ProducerConfig {
    /// Replaces an unset (zero) queue length with the default.
    pub fn with_defaults(self) -> Self {
        if self.max_queue_len == 0 {
            Self::default()
        } else {
            self
        }
    }
}

fn non_zero_or(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}
