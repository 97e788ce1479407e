//! At-least-once message consumption engine.
//!
//! This crate implements the consumer side of the queue: a background cycle
//! that claims messages exactly once per consumer group, dispatches them to
//! a user callback, retries failures, and routes messages that exhaust their
//! retry budget to a pluggable dead-letter sink. The producer side is a thin
//! pass-through to the store's append primitive.
//!
//! # Delivery cycle
//!
//! Each consumer instance runs one strictly sequential cycle on a dedicated
//! task:
//!
//! 1. **Poll new** - claim messages newly available to this group member,
//!    blocking up to the receive timeout
//! 2. **Dispatch** - invoke the callback per message under a shared batch
//!    budget; acknowledge on success, count the failure otherwise
//! 3. **Dead-letter sweep** - messages at or above the retry limit go to the
//!    sink, then are acknowledged and dropped from local tracking
//! 4. **Poll pending** - re-dispatch messages delivered earlier but never
//!    acknowledged, recovering work lost to a crash mid-processing
//!
//! The contract is at-least-once: acknowledgment is not atomic with callback
//! execution, so callbacks must be idempotent.
//!
//! # Example
//!
//! ```no_run
//! use std::{future::Future, pin::Pin, sync::Arc};
//!
//! use conveyor_client::{Consumer, ConsumerConfig, MessageHandler};
//! use conveyor_core::Message;
//! use conveyor_store::{MemoryStore, QueueStore};
//!
//! struct Echo;
//!
//! impl MessageHandler for Echo {
//!     fn handle(
//!         &self,
//!         message: Message,
//!     ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
//!         Box::pin(async move {
//!             println!("{}: {}", message.key, message.value);
//!             Ok(())
//!         })
//!     }
//! }
//!
//! # async fn example() -> Result<(), conveyor_client::ClientError> {
//! let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
//! let mut consumer = Consumer::new(
//!     store,
//!     "orders",
//!     "billing",
//!     "worker-1",
//!     Arc::new(Echo),
//!     ConsumerConfig::default(),
//! )?;
//! consumer.start()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod producer;
pub mod tracker;

pub use config::{ConsumerConfig, ProducerConfig};
pub use consumer::{Consumer, ConsumerStats, MessageHandler};
pub use dead_letter::{DeadLetterSink, LogSink};
pub use error::{ClientError, Result};
pub use producer::Producer;
pub use tracker::FailureTracker;

/// Default blocking budget for one poll of new messages.
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 2000;

/// Default consecutive-failure count at which a message is dead-lettered.
pub const DEFAULT_MAX_RETRY_LIMIT: u32 = 3;

/// Default budget for delivering one dead letter to the sink.
pub const DEFAULT_DEAD_LETTER_DELIVER_TIMEOUT_MS: u64 = 1000;

/// Default shared budget for dispatching one batch of messages.
pub const DEFAULT_HANDLE_MESSAGES_TIMEOUT_MS: u64 = 1000;

/// Default bound on a topic's retained length when producing.
pub const DEFAULT_MAX_QUEUE_LEN: usize = 500;
