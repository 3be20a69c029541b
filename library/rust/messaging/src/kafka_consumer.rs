//! KafkaMessageReader: rdkafka を使用した MessageReader 実装。
//! feature = "kafka" で有効化される。

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message as _};
use rdkafka::{Offset, TopicPartitionList};

use crate::config::ConsumerConfig;
use crate::consumer::MessageReader;
use crate::error::MessagingError;
use crate::message::{Header, Message};

/// KafkaMessageReader は rdkafka の StreamConsumer を使った実装。
/// 自動コミットは無効化し、コミットは [`MessageReader::commit`] でのみ行う。
pub struct KafkaMessageReader {
    consumer: StreamConsumer,
    closed: AtomicBool,
}

impl KafkaMessageReader {
    pub fn new(config: &ConsumerConfig) -> Result<Self, MessagingError> {
        config.validate()?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers_string())
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000")
            .set("auto.offset.reset", "earliest")
            .set("fetch.min.bytes", config.min_bytes.to_string())
            .set("fetch.max.bytes", config.max_bytes.to_string())
            .set("fetch.wait.max.ms", config.max_wait_ms.to_string())
            .create()
            .map_err(|e| MessagingError::Transport(format!("create consumer: {e}")))?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| MessagingError::Transport(format!("subscribe: {e}")))?;

        tracing::info!(
            brokers = %config.brokers_string(),
            topics = ?config.topics,
            group_id = %config.group_id,
            "kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            closed: AtomicBool::new(false),
        })
    }
}

fn to_message(msg: &BorrowedMessage<'_>) -> Message {
    let headers = msg
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| Header::new(h.key, h.value.unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();

    Message {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().unwrap_or_default().to_vec(),
        value: msg.payload().unwrap_or_default().to_vec(),
        headers,
    }
}

#[async_trait]
impl MessageReader for KafkaMessageReader {
    async fn fetch_message(&self) -> Result<Message, MessagingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MessagingError::Closed("reader"));
        }
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| MessagingError::Transport(format!("fetch message: {e}")))?;
        Ok(to_message(&msg))
    }

    async fn commit(&self, message: &Message) -> Result<(), MessagingError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )
        .map_err(|e| MessagingError::Commit(e.to_string()))?;

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| MessagingError::Commit(e.to_string()))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.consumer.unsubscribe();
        }
        Ok(())
    }
}
