//! Fault-injecting store wrapper.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use conveyor_core::{error::Result, CoreError, Message, MessageId};
use conveyor_store::QueueStore;

/// Wraps a store and injects one-shot failures into chosen operations.
///
/// Injected errors are consumed by the next matching call; every later call
/// passes through. Acknowledge calls are counted so tests can pin the
/// exactly-once acknowledgment discipline.
pub struct FaultStore {
    inner: Arc<dyn QueueStore>,
    next_read_new_error: Mutex<Option<CoreError>>,
    next_acknowledge_error: Mutex<Option<CoreError>>,
    acknowledge_calls: AtomicUsize,
}

impl FaultStore {
    /// Wraps the given store with no faults armed.
    pub fn new(inner: Arc<dyn QueueStore>) -> Self {
        Self {
            inner,
            next_read_new_error: Mutex::new(None),
            next_acknowledge_error: Mutex::new(None),
            acknowledge_calls: AtomicUsize::new(0),
        }
    }

    /// Arms an error for the next `read_new` call.
    pub fn fail_next_read_new(&self, error: CoreError) {
        *self.next_read_new_error.lock().expect("fault lock") = Some(error);
    }

    /// Arms an error for the next `acknowledge` call.
    pub fn fail_next_acknowledge(&self, error: CoreError) {
        *self.next_acknowledge_error.lock().expect("fault lock") = Some(error);
    }

    /// Number of acknowledge calls observed, successful or not.
    pub fn acknowledge_calls(&self) -> usize {
        self.acknowledge_calls.load(Ordering::Acquire)
    }
}

impl QueueStore for FaultStore {
    fn append(
        &self,
        topic: &str,
        max_len: usize,
        key: &str,
        value: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageId>> + Send + '_>> {
        self.inner.append(topic, max_len, key, value)
    }

    fn read_new(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
        block: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>> {
        let armed = self.next_read_new_error.lock().expect("fault lock").take();
        if let Some(error) = armed {
            return Box::pin(async move { Err(error) });
        }
        self.inner.read_new(group, consumer, topic, block)
    }

    fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>> {
        self.inner.read_pending(group, consumer, topic)
    }

    fn acknowledge(
        &self,
        topic: &str,
        group: &str,
        id: &MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.acknowledge_calls.fetch_add(1, Ordering::AcqRel);
        let armed = self.next_acknowledge_error.lock().expect("fault lock").take();
        if let Some(error) = armed {
            return Box::pin(async move { Err(error) });
        }
        self.inner.acknowledge(topic, group, id)
    }

    fn create_group(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.inner.create_group(topic, group)
    }
}
