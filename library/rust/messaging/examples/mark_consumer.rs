//! mark-service.events を購読し、markCreated をログに出すサンプルコンシューマー。
//!
//! ```text
//! MESSAGING_CONFIG=config/messaging.yaml cargo run --example mark_consumer --features kafka
//! ```
//!
//! 設定ファイルがない場合は localhost:9092 に接続する。

use anyhow::Context;
use rtm_messaging::events::{self, MarkEvent};
use rtm_messaging::{Consumer, ConsumerConfig, HandlerError, MessagingConfig, Router};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logger(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if format == "text" {
        registry.with(fmt::layer().with_target(true)).init();
    } else {
        registry.with(fmt::layer().json().with_target(true)).init();
    }
}

fn load_config() -> anyhow::Result<ConsumerConfig> {
    let consumer = match std::env::var("MESSAGING_CONFIG") {
        Ok(path) => MessagingConfig::load(&path)
            .with_context(|| format!("load messaging config from {path}"))?
            .consumer,
        Err(_) => None,
    };

    Ok(consumer.unwrap_or_else(|| {
        ConsumerConfig::default()
            .with_brokers(["localhost:9092"])
            .with_topic(events::service_topic("mark-service"))
            .with_group_id("mark-consumer-example")
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger(&std::env::var("LOG_FORMAT").unwrap_or_default());

    let config = load_config()?;
    let consumer = Consumer::kafka(&config).context("create kafka consumer")?;

    let mut router = Router::new(|e: &MarkEvent| e.event_type());
    router.register_fn(events::MARK_CREATED, |event: MarkEvent| async move {
        if event.payload.owner_id <= 0 {
            return Err(HandlerError::skip(format!(
                "mark {} has no owner",
                event.payload.mark_id
            )));
        }
        tracing::info!(
            event_id = %event.id,
            mark_id = event.payload.mark_id,
            owner_id = event.payload.owner_id,
            mark_name = %event.payload.mark_name,
            "mark created"
        );
        Ok(())
    });

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    tracing::info!(topics = ?consumer.topics(), group_id = consumer.group_id(), "consumer starting");
    consumer.run(cancel, &router.message_handler()).await?;
    tracing::info!("consumer stopped");
    Ok(())
}
