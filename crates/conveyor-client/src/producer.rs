//! Producer: a pass-through to the store's append primitive.

use std::sync::Arc;

use conveyor_core::MessageId;
use conveyor_store::QueueStore;
use tracing::debug;

use crate::{config::ProducerConfig, error::Result};

/// Appends messages to bounded topics. No retry, no batching.
pub struct Producer {
    store: Arc<dyn QueueStore>,
    config: ProducerConfig,
}

impl Producer {
    /// Creates a producer over the given store.
    ///
    /// A zero `max_queue_len` receives the default bound.
    pub fn new(store: Arc<dyn QueueStore>, config: ProducerConfig) -> Self {
        Self { store, config: config.with_defaults() }
    }

    /// Appends one message and returns its store-assigned id.
    ///
    /// The topic is trimmed to the configured bound on append, oldest
    /// entries first.
    ///
    /// # Errors
    ///
    /// Returns error if the store rejects the append.
    pub async fn send(&self, topic: &str, key: &str, value: &str) -> Result<MessageId> {
        let id = self.store.append(topic, self.config.max_queue_len, key, value).await?;
        debug!(topic = %topic, message_id = %id, "message appended");
        Ok(id)
    }

    /// The normalized configuration this producer runs with.
    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }
}
