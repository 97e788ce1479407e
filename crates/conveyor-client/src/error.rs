//! Error types for consumer and producer operations.
//!
//! Fatal errors surface only at construction and lifecycle edges; once the
//! consumption loop is running, every runtime error is contained within it
//! and observable only through logging and stats.

use conveyor_core::CoreError;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error type for consumer and producer operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid construction parameters. Fatal, never retried.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// What was invalid
        message: String,
    },

    /// The consumer's background cycle is already running.
    #[error("consumer is already running")]
    AlreadyRunning,

    /// The consumer task could not be joined during shutdown.
    #[error("consumer shutdown failed: {message}")]
    ShutdownFailed {
        /// Join error description
        message: String,
    },

    /// A queue store operation failed.
    #[error(transparent)]
    Store(#[from] CoreError),
}

impl ClientError {
    /// Creates a configuration error from a message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a shutdown error from a message.
    pub fn shutdown_failed(message: impl Into<String>) -> Self {
        Self::ShutdownFailed { message: message.into() }
    }
}
