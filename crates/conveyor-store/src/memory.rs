//! In-process implementation of the queue store contract.
//!
//! Carries the full store semantics — bounded topic log, per-group delivery
//! cursor, per-consumer ordered pending set, blocking reads woken by appends
//! — so the consumption engine can be exercised deterministically without a
//! Redis server. Also usable as an embedded store for single-process
//! deployments.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    time::Duration,
};

use conveyor_core::{error::Result, CoreError, Message, MessageId};
use tokio::sync::{Notify, RwLock};

use crate::store::{require_nonempty, QueueStore};

/// In-memory queue store.
#[derive(Default)]
pub struct MemoryStore {
    topics: RwLock<HashMap<String, TopicState>>,
    appended: Notify,
}

struct TopicState {
    /// Ordered log; sequence numbers survive trimming.
    entries: VecDeque<(u64, Message)>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

impl Default for TopicState {
    fn default() -> Self {
        Self { entries: VecDeque::new(), next_seq: 1, groups: HashMap::new() }
    }
}

#[derive(Default)]
struct GroupState {
    /// Highest sequence handed to any member of the group.
    delivered_up_to: u64,
    /// Delivered but unacknowledged entries, in delivery order. Keeps the
    /// message itself so redelivery survives log trimming.
    pending: Vec<PendingEntry>,
}

struct PendingEntry {
    seq: u64,
    consumer: String,
    message: Message,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently retained in a topic's log.
    pub async fn topic_len(&self, topic: &str) -> usize {
        self.topics.read().await.get(topic).map_or(0, |state| state.entries.len())
    }

    /// Number of unacknowledged entries in a group's pending set.
    pub async fn pending_len(&self, topic: &str, group: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .and_then(|state| state.groups.get(group))
            .map_or(0, |group_state| group_state.pending.len())
    }

    /// Delivers entries past the group cursor, or `None` when nothing is
    /// fresh. Delivered entries join the consumer's pending set.
    async fn take_new(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
    ) -> Result<Option<Vec<Message>>> {
        let mut topics = self.topics.write().await;
        let state = topics.get_mut(topic).ok_or_else(|| no_group(topic, group))?;
        let TopicState { entries, groups, .. } = &mut *state;
        let group_state = groups.get_mut(group).ok_or_else(|| no_group(topic, group))?;

        let fresh: Vec<(u64, Message)> = entries
            .iter()
            .filter(|(seq, _)| *seq > group_state.delivered_up_to)
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(None);
        }

        let mut delivered = Vec::with_capacity(fresh.len());
        for (seq, message) in fresh {
            group_state.delivered_up_to = seq;
            group_state.pending.push(PendingEntry {
                seq,
                consumer: consumer.to_owned(),
                message: message.clone(),
            });
            delivered.push(message);
        }
        Ok(Some(delivered))
    }
}

impl QueueStore for MemoryStore {
    fn append(
        &self,
        topic: &str,
        max_len: usize,
        key: &str,
        value: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageId>> + Send + '_>> {
        let topic = topic.to_owned();
        let key = key.to_owned();
        let value = value.to_owned();
        Box::pin(async move {
            require_nonempty("topic", &topic)?;
            let mut topics = self.topics.write().await;
            let state = topics.entry(topic).or_default();
            let seq = state.next_seq;
            state.next_seq += 1;
            let id = MessageId::from(format!("{seq}-0"));
            state.entries.push_back((seq, Message { id: id.clone(), key, value }));
            while state.entries.len() > max_len {
                state.entries.pop_front();
            }
            drop(topics);
            self.appended.notify_waiters();
            Ok(id)
        })
    }

    fn read_new(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
        block: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>> {
        let group = group.to_owned();
        let consumer = consumer.to_owned();
        let topic = topic.to_owned();
        Box::pin(async move {
            require_nonempty("group", &group)?;
            require_nonempty("consumer", &consumer)?;
            require_nonempty("topic", &topic)?;
            let deadline = tokio::time::Instant::now() + block;
            loop {
                // Arm the wakeup before checking so an append between the
                // check and the wait is not missed.
                let notified = self.appended.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(messages) = self.take_new(&group, &consumer, &topic).await? {
                    return Ok(messages);
                }

                let now = tokio::time::Instant::now();
                if now >= deadline {
                    return Err(CoreError::NoMessage);
                }
                if tokio::time::timeout(deadline - now, notified).await.is_err() {
                    return Err(CoreError::NoMessage);
                }
            }
        })
    }

    fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>> {
        let group = group.to_owned();
        let consumer = consumer.to_owned();
        let topic = topic.to_owned();
        Box::pin(async move {
            require_nonempty("group", &group)?;
            require_nonempty("consumer", &consumer)?;
            require_nonempty("topic", &topic)?;
            let topics = self.topics.read().await;
            let state = topics.get(&topic).ok_or_else(|| no_group(&topic, &group))?;
            let group_state =
                state.groups.get(&group).ok_or_else(|| no_group(&topic, &group))?;
            let messages: Vec<Message> = group_state
                .pending
                .iter()
                .filter(|entry| entry.consumer == consumer)
                .map(|entry| entry.message.clone())
                .collect();
            if messages.is_empty() {
                return Err(CoreError::NoMessage);
            }
            Ok(messages)
        })
    }

    fn acknowledge(
        &self,
        topic: &str,
        group: &str,
        id: &MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let topic = topic.to_owned();
        let group = group.to_owned();
        let id = id.clone();
        Box::pin(async move {
            require_nonempty("topic", &topic)?;
            require_nonempty("group", &group)?;
            require_nonempty("message id", id.as_str())?;
            let mut topics = self.topics.write().await;
            let removed = topics
                .get_mut(&topic)
                .and_then(|state| state.groups.get_mut(&group))
                .map_or(0, |group_state| {
                    let before = group_state.pending.len();
                    group_state.pending.retain(|entry| entry.message.id != id);
                    before - group_state.pending.len()
                });
            if removed != 1 {
                return Err(CoreError::AckRejected {
                    count: i64::try_from(removed).unwrap_or(i64::MAX),
                });
            }
            Ok(())
        })
    }

    fn create_group(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let topic = topic.to_owned();
        let group = group.to_owned();
        Box::pin(async move {
            require_nonempty("topic", &topic)?;
            require_nonempty("group", &group)?;
            let mut topics = self.topics.write().await;
            topics.entry(topic).or_default().groups.entry(group).or_default();
            Ok(())
        })
    }
}

fn no_group(topic: &str, group: &str) -> CoreError {
    CoreError::store(format!("no such consumer group '{group}' for topic '{topic}'"))
}
