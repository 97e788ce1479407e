//! Error types and result handling for queue store operations.
//!
//! Distinguishes ordinary absence of data from genuine failures: a poll that
//! returns nothing is part of normal operation, while a reply of the wrong
//! shape or an acknowledgment that removed the wrong number of entries is
//! not. Driver errors are folded into this taxonomy at the edge.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error type for queue store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Store command or transport failure.
    #[error("store error: {message}")]
    Store {
        /// Error message describing the store failure
        message: String,
    },

    /// No messages were available. An ordinary outcome, not a failure.
    #[error("no message available")]
    NoMessage,

    /// The store replied with a shape the stream contract does not allow.
    #[error("malformed store reply: {detail}")]
    MalformedReply {
        /// What was wrong with the reply
        detail: String,
    },

    /// Acknowledgment did not remove exactly one pending entry.
    #[error("acknowledgment removed {count} pending entries, expected exactly 1")]
    AckRejected {
        /// Number of entries the store reported as acknowledged
        count: i64,
    },

    /// Invalid input to a store operation.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What was invalid about the input
        message: String,
    },
}

impl CoreError {
    /// Creates a store error from a message.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store { message: message.into() }
    }

    /// Creates a malformed-reply error from a detail message.
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedReply { detail: detail.into() }
    }

    /// Creates an invalid-input error from a message.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    /// True when this is the ordinary no-data outcome rather than a failure.
    ///
    /// Consumers treat `NoMessage` as an empty poll and carry on with the
    /// cycle; every other variant is logged as an error.
    pub fn is_no_message(&self) -> bool {
        matches!(self, Self::NoMessage)
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_message_is_not_a_failure() {
        assert!(CoreError::NoMessage.is_no_message());
        assert!(!CoreError::store("connection reset").is_no_message());
        assert!(!CoreError::malformed("entry carries 3 fields").is_no_message());
        assert!(!CoreError::AckRejected { count: 0 }.is_no_message());
    }

    #[test]
    fn error_display_format() {
        assert_eq!(
            CoreError::AckRejected { count: 0 }.to_string(),
            "acknowledgment removed 0 pending entries, expected exactly 1"
        );
        assert_eq!(
            CoreError::malformed("missing value field").to_string(),
            "malformed store reply: missing value field"
        );
    }
}
