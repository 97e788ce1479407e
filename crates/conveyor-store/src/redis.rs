//! Redis Streams implementation of the queue store contract.
//!
//! Topics are streams, groups are stream consumer groups, the pending set is
//! the group's pending entries list. The connection is a managed multiplexed
//! connection: reconnection, pipelining and concurrent use across producer
//! and consumer instances are the `redis` crate's concern, not this module's.

use std::{future::Future, pin::Pin, time::Duration};

use conveyor_core::{error::Result, CoreError, Message, MessageId};
use redis::{
    aio::ConnectionManager,
    streams::{StreamMaxlen, StreamReadOptions, StreamReadReply},
    AsyncCommands,
};
use tracing::debug;

use crate::store::{require_nonempty, QueueStore};

/// Queue store backed by Redis Streams.
///
/// Cheap to clone; clones share the underlying managed connection.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connects to the store at the given Redis URL.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the initial connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        debug!("queue store connection established");
        Ok(Self { manager })
    }

    /// Wraps an existing managed connection.
    pub fn with_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

impl QueueStore for RedisStore {
    fn append(
        &self,
        topic: &str,
        max_len: usize,
        key: &str,
        value: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageId>> + Send + '_>> {
        let mut conn = self.manager.clone();
        let topic = topic.to_owned();
        let key = key.to_owned();
        let value = value.to_owned();
        Box::pin(async move {
            require_nonempty("topic", &topic)?;
            let id: String = conn
                .xadd_maxlen(
                    &topic,
                    StreamMaxlen::Equals(max_len),
                    "*",
                    &[(key.as_str(), value.as_str())],
                )
                .await?;
            Ok(MessageId::from(id))
        })
    }

    fn read_new(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
        block: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>> {
        let mut conn = self.manager.clone();
        let group = group.to_owned();
        let consumer = consumer.to_owned();
        let topic = topic.to_owned();
        Box::pin(async move {
            require_identity(&group, &consumer, &topic)?;
            let mut options = StreamReadOptions::default().group(&group, &consumer);
            // BLOCK 0 would wait forever; a zero budget reads without waiting.
            if !block.is_zero() {
                let block_ms = usize::try_from(block.as_millis()).unwrap_or(usize::MAX);
                options = options.block(block_ms);
            }
            let reply: Option<StreamReadReply> =
                conn.xread_options(&[topic.as_str()], &[">"], &options).await?;
            parse_stream_reply(reply)
        })
    }

    fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + '_>> {
        let mut conn = self.manager.clone();
        let group = group.to_owned();
        let consumer = consumer.to_owned();
        let topic = topic.to_owned();
        Box::pin(async move {
            require_identity(&group, &consumer, &topic)?;
            let options = StreamReadOptions::default().group(&group, &consumer);
            // Reading from id 0 returns entries already delivered to this
            // consumer but never acknowledged.
            let reply: Option<StreamReadReply> =
                conn.xread_options(&[topic.as_str()], &["0"], &options).await?;
            parse_stream_reply(reply)
        })
    }

    fn acknowledge(
        &self,
        topic: &str,
        group: &str,
        id: &MessageId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let mut conn = self.manager.clone();
        let topic = topic.to_owned();
        let group = group.to_owned();
        let id = id.clone();
        Box::pin(async move {
            require_nonempty("topic", &topic)?;
            require_nonempty("group", &group)?;
            require_nonempty("message id", id.as_str())?;
            let count: i64 = conn.xack(&topic, &group, &[id.as_str()]).await?;
            if count != 1 {
                return Err(CoreError::AckRejected { count });
            }
            Ok(())
        })
    }

    fn create_group(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let mut conn = self.manager.clone();
        let topic = topic.to_owned();
        let group = group.to_owned();
        Box::pin(async move {
            require_nonempty("topic", &topic)?;
            require_nonempty("group", &group)?;
            let created: redis::RedisResult<String> =
                conn.xgroup_create_mkstream(&topic, &group, "0").await;
            match created {
                Ok(_) => {
                    debug!(topic = %topic, group = %group, "consumer group declared");
                    Ok(())
                },
                // The group already exists; declaring it again is fine.
                Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }
}

fn require_identity(group: &str, consumer: &str, topic: &str) -> Result<()> {
    require_nonempty("group", group)?;
    require_nonempty("consumer", consumer)?;
    require_nonempty("topic", topic)?;
    Ok(())
}

/// Maps a stream read reply onto the message model.
///
/// Every entry must carry exactly one key/value field pair; anything else is
/// a malformed reply, distinct from the ordinary no-message outcome.
fn parse_stream_reply(reply: Option<StreamReadReply>) -> Result<Vec<Message>> {
    let Some(reply) = reply else {
        return Err(CoreError::NoMessage);
    };

    let mut messages = Vec::new();
    for stream in reply.keys {
        for entry in stream.ids {
            if entry.map.len() != 1 {
                return Err(CoreError::malformed(format!(
                    "entry {} carries {} fields, expected exactly 1",
                    entry.id,
                    entry.map.len()
                )));
            }
            let (key, raw) = entry
                .map
                .into_iter()
                .next()
                .ok_or_else(|| CoreError::malformed("entry without fields"))?;
            let value: String = redis::from_redis_value(&raw).map_err(|_| {
                CoreError::malformed(format!("entry {} value is not a string", entry.id))
            })?;
            messages.push(Message { id: MessageId::from(entry.id), key, value });
        }
    }

    if messages.is_empty() {
        return Err(CoreError::NoMessage);
    }
    Ok(messages)
}
