//! Conveyor consumer daemon.
//!
//! Wires a Redis-backed queue store into a consumer instance that logs
//! every message it handles. Configuration comes from the environment;
//! shutdown is signal-driven and cooperative.

use std::{future::Future, pin::Pin, sync::Arc};

use anyhow::{Context, Result};
use conveyor_client::{Consumer, ConsumerConfig, MessageHandler};
use conveyor_core::Message;
use conveyor_store::{QueueStore, RedisStore};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    info!(
        redis_url = %config.redis_url_masked(),
        topic = %config.topic,
        group = %config.group,
        consumer = %config.consumer,
        "configuration loaded"
    );

    let store: Arc<dyn QueueStore> = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .context("failed to connect to the queue store")?,
    );
    store
        .create_group(&config.topic, &config.group)
        .await
        .context("failed to declare the consumer group")?;

    let mut consumer = Consumer::new(
        store,
        &config.topic,
        &config.group,
        &config.consumer,
        Arc::new(EchoHandler),
        ConsumerConfig::default(),
    )?;
    consumer.start()?;
    info!("conveyor consumer running");

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    consumer.stop().await?;
    info!("conveyor shutdown complete");
    Ok(())
}

/// Handler that logs each message it is handed.
struct EchoHandler;

impl MessageHandler for EchoHandler {
    fn handle(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            info!(
                message_id = %message.id,
                key = %message.key,
                value = %message.value,
                "message handled"
            );
            Ok(())
        })
    }
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,conveyor=debug"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Daemon configuration.
struct Config {
    /// Redis connection string
    redis_url: String,
    /// Topic to consume
    topic: String,
    /// Consumer group id
    group: String,
    /// Consumer instance id
    consumer: String,
}

impl Config {
    /// Loads configuration from environment variables.
    fn from_env() -> Result<Self> {
        let redis_url =
            std::env::var("REDIS_URL").context("REDIS_URL environment variable not set")?;
        let topic = std::env::var("CONVEYOR_TOPIC")
            .context("CONVEYOR_TOPIC environment variable not set")?;
        let group =
            std::env::var("CONVEYOR_GROUP").unwrap_or_else(|_| "conveyor".to_string());
        let consumer =
            std::env::var("CONVEYOR_CONSUMER").unwrap_or_else(|_| "conveyor-1".to_string());

        Ok(Self { redis_url, topic, group, consumer })
    }

    /// Returns the Redis URL with any password masked for logging.
    fn redis_url_masked(&self) -> String {
        if let Some(at_pos) = self.redis_url.find('@') {
            if let Some(scheme_end) = self.redis_url.find("//") {
                return format!(
                    "{}//***@{}",
                    &self.redis_url[..scheme_end],
                    &self.redis_url[at_pos + 1..]
                );
            }
        }
        self.redis_url.clone()
    }
}
