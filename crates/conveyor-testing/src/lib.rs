//! Test infrastructure for deterministic consumer testing.
//!
//! Provides an in-memory environment (store plus controllable clock),
//! scripted message handlers, a recording dead-letter sink, and a
//! fault-injecting store wrapper. Everything here runs without external
//! services and with reproducible outcomes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use anyhow::Result;
use conveyor_client::ConsumerConfig;
use conveyor_core::{MessageId, TestClock};
use conveyor_store::{MemoryStore, QueueStore};
use uuid::Uuid;

pub mod faults;
pub mod handlers;
pub mod sinks;

pub use faults::FaultStore;
pub use handlers::ScriptedHandler;
pub use sinks::RecordingSink;

/// How many entries seeded topics retain before trimming.
const SEED_TOPIC_BOUND: usize = 1000;

/// In-memory test environment: a queue store and a controllable clock.
pub struct TestEnv {
    /// The store consumers and producers under test run against.
    pub store: Arc<MemoryStore>,
    /// Deterministic clock for dead-letter timestamps.
    pub clock: TestClock,
}

impl TestEnv {
    /// Creates a fresh environment with an empty store.
    pub fn new() -> Self {
        Self { store: Arc::new(MemoryStore::new()), clock: TestClock::new() }
    }

    /// A topic name unique to this test run.
    pub fn unique_topic() -> String {
        format!("topic-{}", Uuid::new_v4().simple())
    }

    /// A group name unique to this test run.
    pub fn unique_group() -> String {
        format!("group-{}", Uuid::new_v4().simple())
    }

    /// Declares a consumer group on a topic.
    pub async fn declare(&self, topic: &str, group: &str) -> Result<()> {
        self.store.create_group(topic, group).await?;
        Ok(())
    }

    /// Appends `count` messages (`key-N` / `value-N`) and returns their ids.
    pub async fn seed(&self, topic: &str, count: usize) -> Result<Vec<MessageId>> {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let id = self
                .store
                .append(topic, SEED_TOPIC_BOUND, &format!("key-{i}"), &format!("value-{i}"))
                .await?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// A consumer configuration with a short receive timeout, so cycles over
    /// an empty topic complete quickly in tests.
    pub fn fast_config() -> ConsumerConfig {
        ConsumerConfig {
            receive_timeout: std::time::Duration::from_millis(10),
            ..ConsumerConfig::default()
        }
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
