//! Core domain models for the conveyor message queue.
//!
//! Provides the message model shared between producers and consumers, the
//! error taxonomy for queue store operations, and the clock abstraction used
//! to timestamp dead letters deterministically in tests. All other crates
//! depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{DeadLetter, Message, MessageId};
pub use time::{Clock, RealClock, TestClock};
