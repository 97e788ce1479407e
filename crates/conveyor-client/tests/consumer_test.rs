//! Integration tests for the consumer delivery cycle.
//!
//! Drives single cycles against the in-memory store with scripted handlers
//! and recording sinks, pinning the acknowledgment discipline, failure
//! tracking, dead-letter graduation, and pending-set recovery.

use std::{
    collections::HashSet,
    future::Future,
    pin::Pin,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Result;
use conveyor_client::{ClientError, Consumer, ConsumerConfig, MessageHandler};
use conveyor_core::{Clock, CoreError, Message, TestClock};
use conveyor_store::QueueStore;
use conveyor_testing::{FaultStore, RecordingSink, ScriptedHandler, TestEnv};

const WORKER: &str = "worker-1";

#[allow(clippy::too_many_arguments)]
fn build_consumer(
    store: Arc<dyn QueueStore>,
    topic: &str,
    group: &str,
    handler: Arc<ScriptedHandler>,
    sink: Arc<RecordingSink>,
    clock: TestClock,
    config: ConsumerConfig,
) -> Consumer {
    Consumer::with_dead_letter_sink(
        store,
        topic,
        group,
        WORKER,
        handler,
        sink,
        Arc::new(clock) as Arc<dyn Clock>,
        config,
    )
    .expect("consumer construction should succeed")
}

#[tokio::test]
async fn successful_callback_acknowledges_and_never_tracks() -> Result<()> {
    let env = TestEnv::new();
    let topic = TestEnv::unique_topic();
    let group = TestEnv::unique_group();
    env.declare(&topic, &group).await?;
    let ids = env.seed(&topic, 1).await?;

    let handler = Arc::new(ScriptedHandler::succeeding());
    let sink = Arc::new(RecordingSink::new());
    let consumer = build_consumer(
        env.store.clone(),
        &topic,
        &group,
        handler.clone(),
        sink.clone(),
        env.clock.clone(),
        TestEnv::fast_config(),
    );

    consumer.run_cycle().await;

    assert_eq!(handler.invoked_ids(), ids);
    assert_eq!(env.store.pending_len(&topic, &group).await, 0);
    assert!(consumer.tracked_failures().await.is_empty());
    assert!(sink.letters().is_empty());
    let stats = consumer.stats().await;
    assert_eq!(stats.messages_delivered, 1);
    assert_eq!(stats.cycles_completed, 1);
    Ok(())
}

#[tokio::test]
async fn two_failures_graduate_to_dead_letter_at_limit_two() -> Result<()> {
    let env = TestEnv::new();
    let topic = TestEnv::unique_topic();
    let group = TestEnv::unique_group();
    env.declare(&topic, &group).await?;
    let ids = env.seed(&topic, 1).await?;

    let handler = Arc::new(ScriptedHandler::always_failing());
    let sink = Arc::new(RecordingSink::new());
    let config = ConsumerConfig { max_retry_limit: 2, ..TestEnv::fast_config() };
    let consumer = build_consumer(
        env.store.clone(),
        &topic,
        &group,
        handler.clone(),
        sink.clone(),
        env.clock.clone(),
        config,
    );

    // First cycle: fails on the new read, fails again on the pending read.
    consumer.run_cycle().await;
    assert_eq!(handler.attempts_for(&ids[0]), 2);
    assert_eq!(consumer.tracked_failures().await, vec![(ids[0].clone(), 2)]);
    assert!(sink.letters().is_empty());

    // Second cycle: the sweep finds the exhausted entry, delivers it to the
    // sink, acknowledges it, and drops local tracking.
    consumer.run_cycle().await;
    let letters = sink.letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].message.id, ids[0]);
    assert_eq!(letters[0].topic, topic);
    assert_eq!(letters[0].group, group);
    assert_eq!(letters[0].consumer, WORKER);
    assert_eq!(letters[0].failure_count, 2);
    assert!(consumer.tracked_failures().await.is_empty());
    assert_eq!(env.store.pending_len(&topic, &group).await, 0);
    assert_eq!(consumer.stats().await.dead_letters, 1);

    // The callback was never invoked again after exhaustion.
    assert_eq!(handler.attempts_for(&ids[0]), 2);
    Ok(())
}

#[tokio::test]
async fn empty_poll_completes_the_cycle_without_error() -> Result<()> {
    let env = TestEnv::new();
    let topic = TestEnv::unique_topic();
    let group = TestEnv::unique_group();
    env.declare(&topic, &group).await?;

    let handler = Arc::new(ScriptedHandler::succeeding());
    let sink = Arc::new(RecordingSink::new());
    let consumer = build_consumer(
        env.store.clone(),
        &topic,
        &group,
        handler.clone(),
        sink,
        env.clock.clone(),
        TestEnv::fast_config(),
    );

    consumer.run_cycle().await;

    let stats = consumer.stats().await;
    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.messages_delivered, 0);
    assert!(handler.invocations().is_empty());
    Ok(())
}

/// Handler that always fails messages carrying one specific key.
struct KeyedHandler {
    failing_key: String,
}

impl MessageHandler for KeyedHandler {
    fn handle(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            if message.key == self.failing_key {
                anyhow::bail!("poisoned key");
            }
            Ok(())
        })
    }
}

#[tokio::test]
async fn acknowledged_and_tracked_are_mutually_exclusive() -> Result<()> {
    let env = TestEnv::new();
    let topic = TestEnv::unique_topic();
    let group = TestEnv::unique_group();
    env.declare(&topic, &group).await?;
    let ids = env.seed(&topic, 2).await?;

    let handler = Arc::new(KeyedHandler { failing_key: "key-0".to_owned() });
    let consumer = Consumer::with_dead_letter_sink(
        env.store.clone(),
        &topic,
        &group,
        WORKER,
        handler,
        Arc::new(RecordingSink::new()),
        Arc::new(env.clock.clone()) as Arc<dyn Clock>,
        TestEnv::fast_config(),
    )?;

    consumer.run_cycle().await;

    // key-0 failed twice (new read, then pending read): tracked, still
    // pending, not acknowledged. key-1 succeeded: acknowledged, untracked.
    let tracked: HashSet<_> =
        consumer.tracked_failures().await.into_iter().map(|(id, _)| id).collect();
    assert!(tracked.contains(&ids[0]));
    assert!(!tracked.contains(&ids[1]));
    assert_eq!(env.store.pending_len(&topic, &group).await, 1);
    let pending = env.store.read_pending(&group, WORKER, &topic).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, ids[0]);
    Ok(())
}

#[tokio::test]
async fn prior_incarnation_pending_message_is_recovered() -> Result<()> {
    let env = TestEnv::new();
    let topic = TestEnv::unique_topic();
    let group = TestEnv::unique_group();
    env.declare(&topic, &group).await?;
    let ids = env.seed(&topic, 1).await?;

    // A previous incarnation claimed the message and crashed before
    // acknowledging: delivered, never acked.
    let claimed = env.store.read_new(&group, WORKER, &topic, Duration::ZERO).await?;
    assert_eq!(claimed.len(), 1);

    let handler = Arc::new(ScriptedHandler::succeeding());
    let consumer = build_consumer(
        env.store.clone(),
        &topic,
        &group,
        handler.clone(),
        Arc::new(RecordingSink::new()),
        env.clock.clone(),
        TestEnv::fast_config(),
    );

    // The next cycle sees nothing new and recovers the message through the
    // pending path.
    consumer.run_cycle().await;

    assert_eq!(handler.invoked_ids(), ids);
    assert_eq!(env.store.pending_len(&topic, &group).await, 0);
    assert_eq!(consumer.stats().await.messages_delivered, 1);
    Ok(())
}

#[tokio::test]
async fn ack_failure_leaves_message_neither_tracked_nor_cleared() -> Result<()> {
    let env = TestEnv::new();
    let topic = TestEnv::unique_topic();
    let group = TestEnv::unique_group();
    env.declare(&topic, &group).await?;
    env.seed(&topic, 1).await?;

    let store = Arc::new(FaultStore::new(env.store.clone()));
    store.fail_next_acknowledge(CoreError::store("connection reset"));

    let handler = Arc::new(ScriptedHandler::succeeding());
    let consumer = build_consumer(
        store.clone(),
        &topic,
        &group,
        handler.clone(),
        Arc::new(RecordingSink::new()),
        env.clock.clone(),
        TestEnv::fast_config(),
    );

    consumer.run_cycle().await;

    // The failed ack left the message in the pending set, untracked; the
    // same cycle's pending phase redelivered it and the second ack stuck.
    assert_eq!(store.acknowledge_calls(), 2);
    assert!(consumer.tracked_failures().await.is_empty());
    assert_eq!(env.store.pending_len(&topic, &group).await, 0);
    let stats = consumer.stats().await;
    assert_eq!(stats.messages_delivered, 1);
    assert_eq!(stats.callback_failures, 0);
    Ok(())
}

#[tokio::test]
async fn ack_is_attempted_once_per_delivery() -> Result<()> {
    let env = TestEnv::new();
    let topic = TestEnv::unique_topic();
    let group = TestEnv::unique_group();
    env.declare(&topic, &group).await?;
    env.seed(&topic, 1).await?;

    let store = Arc::new(FaultStore::new(env.store.clone()));
    let handler = Arc::new(ScriptedHandler::succeeding());
    let consumer = build_consumer(
        store.clone(),
        &topic,
        &group,
        handler,
        Arc::new(RecordingSink::new()),
        env.clock.clone(),
        TestEnv::fast_config(),
    );

    consumer.run_cycle().await;

    // One successful delivery, one acknowledgment; the pending phase saw an
    // empty set and never re-acked.
    assert_eq!(store.acknowledge_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn sink_rejection_never_blocks_acknowledgment() -> Result<()> {
    let env = TestEnv::new();
    let topic = TestEnv::unique_topic();
    let group = TestEnv::unique_group();
    env.declare(&topic, &group).await?;
    env.seed(&topic, 1).await?;

    let start = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let clock = TestClock::with_start_time(start);
    let handler = Arc::new(ScriptedHandler::always_failing());
    let sink = Arc::new(RecordingSink::rejecting());
    let config = ConsumerConfig { max_retry_limit: 1, ..TestEnv::fast_config() };
    let consumer = build_consumer(
        env.store.clone(),
        &topic,
        &group,
        handler,
        sink.clone(),
        clock,
        config,
    );

    // One failure reaches the limit; the sweep runs within the same cycle.
    consumer.run_cycle().await;

    let letters = sink.letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].failure_count, 1);
    assert_eq!(SystemTime::from(letters[0].failed_at), start);
    // Rejected by the sink, acknowledged anyway.
    assert!(consumer.tracked_failures().await.is_empty());
    assert_eq!(env.store.pending_len(&topic, &group).await, 0);
    assert_eq!(consumer.stats().await.dead_letters, 1);
    Ok(())
}

#[tokio::test]
async fn sweep_ack_failure_keeps_the_entry_for_the_next_sweep() -> Result<()> {
    let env = TestEnv::new();
    let topic = TestEnv::unique_topic();
    let group = TestEnv::unique_group();
    env.declare(&topic, &group).await?;
    let ids = env.seed(&topic, 1).await?;

    let store = Arc::new(FaultStore::new(env.store.clone()));
    let handler = Arc::new(ScriptedHandler::always_failing());
    let sink = Arc::new(RecordingSink::new());
    let config = ConsumerConfig { max_retry_limit: 1, ..TestEnv::fast_config() };
    let consumer = build_consumer(
        store.clone(),
        &topic,
        &group,
        handler,
        sink.clone(),
        env.clock.clone(),
        config,
    );

    // The sweep's acknowledgment fails: the letter was delivered but the
    // entry must survive, because only acknowledgment removes it.
    store.fail_next_acknowledge(CoreError::store("connection reset"));
    consumer.run_cycle().await;
    assert_eq!(sink.letters().len(), 1);
    let tracked = consumer.tracked_failures().await;
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].0, ids[0]);

    // Next cycle's sweep re-delivers and this time the ack sticks.
    consumer.run_cycle().await;
    assert_eq!(sink.letters().len(), 2);
    assert!(consumer.tracked_failures().await.is_empty());
    assert_eq!(env.store.pending_len(&topic, &group).await, 0);
    assert_eq!(consumer.stats().await.dead_letters, 1);
    Ok(())
}

#[tokio::test]
async fn retrieval_error_abandons_the_cycle_and_the_next_one_recovers() -> Result<()> {
    let env = TestEnv::new();
    let topic = TestEnv::unique_topic();
    let group = TestEnv::unique_group();
    env.declare(&topic, &group).await?;
    env.seed(&topic, 1).await?;

    let store = Arc::new(FaultStore::new(env.store.clone()));
    store.fail_next_read_new(CoreError::store("connection reset"));

    let handler = Arc::new(ScriptedHandler::succeeding());
    let consumer = build_consumer(
        store,
        &topic,
        &group,
        handler.clone(),
        Arc::new(RecordingSink::new()),
        env.clock.clone(),
        TestEnv::fast_config(),
    );

    consumer.run_cycle().await;
    assert_eq!(consumer.stats().await.cycles_completed, 0);
    assert!(handler.invocations().is_empty());

    consumer.run_cycle().await;
    let stats = consumer.stats().await;
    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.messages_delivered, 1);
    Ok(())
}

/// Handler that never completes, for pinning the shared batch budget.
struct StallingHandler;

impl MessageHandler for StallingHandler {
    fn handle(
        &self,
        _message: Message,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(std::future::pending())
    }
}

#[tokio::test]
async fn stalled_callback_exhausts_the_batch_budget_and_leaves_message_pending() -> Result<()> {
    let env = TestEnv::new();
    let topic = TestEnv::unique_topic();
    let group = TestEnv::unique_group();
    env.declare(&topic, &group).await?;
    env.seed(&topic, 1).await?;

    let config = ConsumerConfig {
        handle_messages_timeout: Duration::from_millis(50),
        ..TestEnv::fast_config()
    };
    let consumer = Consumer::with_dead_letter_sink(
        env.store.clone(),
        &topic,
        &group,
        WORKER,
        Arc::new(StallingHandler),
        Arc::new(RecordingSink::new()),
        Arc::new(env.clock.clone()) as Arc<dyn Clock>,
        config,
    )?;

    consumer.run_cycle().await;

    // The callback never returned: no failure was counted, nothing was
    // acknowledged, and the message stays pending for the next cycle.
    assert!(consumer.tracked_failures().await.is_empty());
    assert_eq!(env.store.pending_len(&topic, &group).await, 1);
    assert_eq!(consumer.stats().await.cycles_completed, 1);
    Ok(())
}

#[tokio::test]
async fn construction_rejects_empty_identity() {
    let env = TestEnv::new();
    let handler = Arc::new(ScriptedHandler::succeeding());

    for (topic, group, consumer) in
        [("", "g", "c"), ("t", "", "c"), ("t", "g", "")]
    {
        let result = Consumer::new(
            env.store.clone(),
            topic,
            group,
            consumer,
            handler.clone(),
            ConsumerConfig::default(),
        );
        assert!(matches!(result, Err(ClientError::Configuration { .. })));
    }
}

#[tokio::test]
async fn zero_config_options_receive_defaults() -> Result<()> {
    let env = TestEnv::new();
    let consumer = Consumer::new(
        env.store.clone(),
        "orders",
        "billing",
        WORKER,
        Arc::new(ScriptedHandler::succeeding()),
        ConsumerConfig {
            receive_timeout: Duration::ZERO,
            max_retry_limit: 0,
            dead_letter_deliver_timeout: Duration::ZERO,
            handle_messages_timeout: Duration::ZERO,
        },
    )?;
    assert_eq!(*consumer.config(), ConsumerConfig::default());
    Ok(())
}

#[tokio::test]
async fn start_runs_the_background_cycle_until_stopped() -> Result<()> {
    let env = TestEnv::new();
    let topic = TestEnv::unique_topic();
    let group = TestEnv::unique_group();
    env.declare(&topic, &group).await?;
    env.seed(&topic, 2).await?;

    let handler = Arc::new(ScriptedHandler::succeeding());
    let mut consumer = build_consumer(
        env.store.clone(),
        &topic,
        &group,
        handler,
        Arc::new(RecordingSink::new()),
        env.clock.clone(),
        TestEnv::fast_config(),
    );

    assert!(!consumer.is_running());
    consumer.start()?;
    assert!(consumer.is_running());
    assert!(matches!(consumer.start(), Err(ClientError::AlreadyRunning)));

    tokio::time::timeout(Duration::from_secs(5), async {
        while consumer.stats().await.messages_delivered < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both messages should be delivered");

    consumer.stop().await?;
    assert_eq!(env.store.pending_len(&topic, &group).await, 0);
    Ok(())
}

#[tokio::test]
async fn stop_unblocks_a_waiting_poll_promptly() -> Result<()> {
    let env = TestEnv::new();
    let topic = TestEnv::unique_topic();
    let group = TestEnv::unique_group();
    env.declare(&topic, &group).await?;

    let config = ConsumerConfig {
        receive_timeout: Duration::from_secs(30),
        ..ConsumerConfig::default()
    };
    let mut consumer = build_consumer(
        env.store.clone(),
        &topic,
        &group,
        Arc::new(ScriptedHandler::succeeding()),
        Arc::new(RecordingSink::new()),
        env.clock.clone(),
        config,
    );

    consumer.start()?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let begun = std::time::Instant::now();
    consumer.stop().await?;
    assert!(begun.elapsed() < Duration::from_secs(5));
    Ok(())
}
