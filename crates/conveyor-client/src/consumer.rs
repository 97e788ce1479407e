//! The consumer delivery loop.
//!
//! One consumer instance runs one strictly sequential cycle on a dedicated
//! background task: poll new messages, dispatch them to the callback,
//! sweep exhausted messages to the dead-letter sink, then re-dispatch the
//! instance's pending messages. Cancellation is cooperative and observed at
//! cycle boundaries: an in-flight poll wait is unblocked promptly, an
//! in-flight dispatch batch completes or times out first.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use conveyor_core::{Clock, CoreError, DeadLetter, Message, MessageId, RealClock};
use conveyor_store::QueueStore;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::ConsumerConfig,
    dead_letter::{DeadLetterSink, LogSink},
    error::{ClientError, Result},
    tracker::FailureTracker,
};

/// Callback invoked once per delivered message.
///
/// Errors are expected and routed into the retry/dead-letter mechanism;
/// they never crash the loop. Delivery is at-least-once, so implementations
/// must be idempotent.
pub trait MessageHandler: Send + Sync + 'static {
    /// Processes one message.
    fn handle(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

/// Counters for one consumer instance, observable while the loop runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumerStats {
    /// Completed full cycles.
    pub cycles_completed: u64,
    /// Messages acknowledged after a successful callback.
    pub messages_delivered: u64,
    /// Callback invocations that returned an error.
    pub callback_failures: u64,
    /// Messages delivered to the dead-letter sink and acknowledged.
    pub dead_letters: u64,
}

/// A named reader within a consumer group.
///
/// Construction validates and does not start the loop; call [`start`] to
/// spawn the background cycle and [`stop`] to shut it down cooperatively.
/// [`run_cycle`] executes exactly one cycle without the background task,
/// for tests and controlled processing.
///
/// [`start`]: Consumer::start
/// [`stop`]: Consumer::stop
/// [`run_cycle`]: Consumer::run_cycle
pub struct Consumer {
    runner: Arc<CycleRunner>,
    cancellation_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Consumer {
    /// Creates a consumer with the default logging dead-letter sink and the
    /// real clock.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if topic, group or consumer id
    /// is empty.
    pub fn new(
        store: Arc<dyn QueueStore>,
        topic: &str,
        group: &str,
        consumer: &str,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerConfig,
    ) -> Result<Self> {
        Self::with_dead_letter_sink(
            store,
            topic,
            group,
            consumer,
            handler,
            Arc::new(LogSink::new()),
            Arc::new(RealClock::new()),
            config,
        )
    }

    /// Creates a consumer with an injected dead-letter sink and clock.
    ///
    /// This constructor enables isolated testing: a recording sink observes
    /// exhausted messages, a test clock pins their timestamps.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if topic, group or consumer id
    /// is empty.
    #[allow(clippy::too_many_arguments)]
    pub fn with_dead_letter_sink(
        store: Arc<dyn QueueStore>,
        topic: &str,
        group: &str,
        consumer: &str,
        handler: Arc<dyn MessageHandler>,
        sink: Arc<dyn DeadLetterSink>,
        clock: Arc<dyn Clock>,
        config: ConsumerConfig,
    ) -> Result<Self> {
        validate_identity(topic, group, consumer)?;
        let runner = Arc::new(CycleRunner {
            store,
            topic: topic.to_owned(),
            group: group.to_owned(),
            consumer: consumer.to_owned(),
            handler,
            sink,
            clock,
            config: config.with_defaults(),
            tracker: RwLock::new(FailureTracker::new()),
            stats: RwLock::new(ConsumerStats::default()),
        });
        Ok(Self { runner, cancellation_token: CancellationToken::new(), task: None })
    }

    /// Starts the background cycle task.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::AlreadyRunning` if the task is already live.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(ClientError::AlreadyRunning);
        }
        let runner = Arc::clone(&self.runner);
        let token = self.cancellation_token.clone();
        let handle = tokio::spawn(async move {
            info!(
                topic = %runner.topic,
                group = %runner.group,
                consumer = %runner.consumer,
                "consumer loop starting"
            );
            runner.run(token).await;
            info!(
                topic = %runner.topic,
                group = %runner.group,
                consumer = %runner.consumer,
                "consumer loop stopped"
            );
        });
        self.task = Some(handle);
        Ok(())
    }

    /// True while the background cycle task is live.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signals cancellation and waits for the loop to observe it.
    ///
    /// An in-flight poll wait is unblocked promptly; a dispatch batch in
    /// progress completes or times out first, so stopping can take up to one
    /// cycle.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ShutdownFailed` if the task panicked.
    pub async fn stop(mut self) -> Result<()> {
        self.cancellation_token.cancel();
        if let Some(task) = self.task.take() {
            task.await.map_err(|err| ClientError::shutdown_failed(err.to_string()))?;
        }
        Ok(())
    }

    /// Executes exactly one full cycle synchronously.
    ///
    /// Runs the same poll/dispatch/sweep/pending sequence as the background
    /// task, once. Intended for tests and controlled batch processing; do
    /// not mix with a started background task.
    pub async fn run_cycle(&self) {
        self.runner.run_cycle().await;
    }

    /// Snapshot of this instance's counters.
    pub async fn stats(&self) -> ConsumerStats {
        *self.runner.stats.read().await
    }

    /// Snapshot of tracked message identities and their failure counts.
    pub async fn tracked_failures(&self) -> Vec<(MessageId, u32)> {
        self.runner.tracker.read().await.snapshot()
    }

    /// The normalized configuration this consumer runs with.
    pub fn config(&self) -> &ConsumerConfig {
        &self.runner.config
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        if self.is_running() && !self.cancellation_token.is_cancelled() {
            self.cancellation_token.cancel();
            warn!(
                topic = %self.runner.topic,
                consumer = %self.runner.consumer,
                "consumer dropped while running; cancelling its background task"
            );
        }
    }
}

fn validate_identity(topic: &str, group: &str, consumer: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(ClientError::configuration("topic can't be empty"));
    }
    if group.is_empty() {
        return Err(ClientError::configuration("group id can't be empty"));
    }
    if consumer.is_empty() {
        return Err(ClientError::configuration("consumer id can't be empty"));
    }
    Ok(())
}

/// The cycle state shared between the handle and the background task.
///
/// All mutation happens from one cycle at a time; the locks exist so the
/// handle can observe stats and tracked failures while the loop runs.
struct CycleRunner {
    store: Arc<dyn QueueStore>,
    topic: String,
    group: String,
    consumer: String,
    handler: Arc<dyn MessageHandler>,
    sink: Arc<dyn DeadLetterSink>,
    clock: Arc<dyn Clock>,
    config: ConsumerConfig,
    tracker: RwLock<FailureTracker>,
    stats: RwLock<ConsumerStats>,
}

impl CycleRunner {
    /// Repeats the cycle until cancellation, which is observed at cycle
    /// boundaries. The poll wait is raced against the token so a blocked
    /// read does not delay shutdown by the full receive timeout.
    async fn run(&self, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }
            let received = tokio::select! {
                () = token.cancelled() => break,
                received = self.receive_new() => received,
            };
            self.complete_cycle(received).await;
        }
    }

    /// One full cycle without cancellation: poll new, dispatch, sweep,
    /// poll pending, dispatch.
    async fn run_cycle(&self) {
        let received = self.receive_new().await;
        self.complete_cycle(received).await;
    }

    /// Everything after the poll-new wait. Retrieval errors abandon the
    /// cycle; the loop retries on the next one with no backoff.
    async fn complete_cycle(&self, received: CoreResult<Vec<Message>>) {
        let new_messages = match received {
            Ok(messages) => messages,
            Err(err) => {
                error!(error = %err, "receiving new messages failed");
                return;
            },
        };
        self.dispatch_batch(new_messages).await;

        self.sweep_dead_letters().await;

        match self.receive_pending().await {
            Ok(pending) => self.dispatch_batch(pending).await,
            Err(err) => {
                error!(error = %err, "receiving pending messages failed");
                return;
            },
        }

        self.stats.write().await.cycles_completed += 1;
    }

    /// Polls messages newly available to this group member. The no-message
    /// outcome is an empty batch, not an error.
    async fn receive_new(&self) -> CoreResult<Vec<Message>> {
        match self
            .store
            .read_new(&self.group, &self.consumer, &self.topic, self.config.receive_timeout)
            .await
        {
            Ok(messages) => Ok(messages),
            Err(err) if err.is_no_message() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    /// Polls this member's pending messages: delivered earlier, possibly
    /// before a crash, never acknowledged.
    async fn receive_pending(&self) -> CoreResult<Vec<Message>> {
        match self.store.read_pending(&self.group, &self.consumer, &self.topic).await {
            Ok(messages) => Ok(messages),
            Err(err) if err.is_no_message() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    /// Dispatches one batch under the shared handling budget.
    ///
    /// Messages not reached when the budget expires were never invoked;
    /// they stay in the store's pending set and resurface next cycle.
    async fn dispatch_batch(&self, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        let budget = self.config.handle_messages_timeout;
        let dispatch = async {
            for message in messages {
                self.dispatch_one(message).await;
            }
        };
        if tokio::time::timeout(budget, dispatch).await.is_err() {
            warn!(
                budget_ms = budget.as_millis(),
                "batch handling budget expired; unreached messages stay pending"
            );
        }
    }

    /// Success acknowledges and clears tracking; failure counts against the
    /// message; a failed acknowledgment leaves the message as-is so it
    /// resurfaces via the pending path.
    async fn dispatch_one(&self, message: Message) {
        if let Err(err) = self.handler.handle(message.clone()).await {
            let failures = self.tracker.write().await.increment(&message);
            self.stats.write().await.callback_failures += 1;
            warn!(
                message_id = %message.id,
                failures,
                error = %err,
                "callback failed"
            );
            return;
        }

        match self.store.acknowledge(&self.topic, &self.group, &message.id).await {
            Ok(()) => {
                self.tracker.write().await.clear(&message.id);
                self.stats.write().await.messages_delivered += 1;
                debug!(message_id = %message.id, "message acknowledged");
            },
            Err(err) => {
                error!(
                    message_id = %message.id,
                    error = %err,
                    "acknowledgment failed"
                );
            },
        }
    }

    /// Delivers every entry at or above the retry limit to the sink, then
    /// acknowledges it. Exhausting the retry budget terminates local
    /// tracking whatever the sink said; only a failed acknowledgment keeps
    /// an entry alive for the next sweep.
    async fn sweep_dead_letters(&self) {
        let exhausted =
            self.tracker.read().await.entries_at_or_above(self.config.max_retry_limit);
        for entry in exhausted {
            let letter = DeadLetter {
                message: entry.message.clone(),
                topic: self.topic.clone(),
                group: self.group.clone(),
                consumer: self.consumer.clone(),
                failure_count: entry.failures,
                failed_at: DateTime::<Utc>::from(self.clock.now_system()),
            };
            let delivery = self.sink.accept(letter);
            match tokio::time::timeout(self.config.dead_letter_deliver_timeout, delivery).await {
                Ok(Ok(())) => {},
                Ok(Err(err)) => {
                    warn!(
                        message_id = %entry.message.id,
                        error = %err,
                        "dead letter sink rejected message"
                    );
                },
                Err(_) => {
                    warn!(
                        message_id = %entry.message.id,
                        "dead letter delivery timed out"
                    );
                },
            }

            match self.store.acknowledge(&self.topic, &self.group, &entry.message.id).await {
                Ok(()) => {
                    self.tracker.write().await.clear(&entry.message.id);
                    self.stats.write().await.dead_letters += 1;
                    info!(
                        message_id = %entry.message.id,
                        failures = entry.failures,
                        "dead letter acknowledged"
                    );
                },
                Err(err) => {
                    error!(
                        message_id = %entry.message.id,
                        error = %err,
                        "acknowledgment failed for dead letter"
                    );
                },
            }
        }
    }
}

type CoreResult<T> = std::result::Result<T, CoreError>;
