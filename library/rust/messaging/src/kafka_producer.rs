//! KafkaMessageWriter: rdkafka を使用した MessageWriter 実装。
//! feature = "kafka" で有効化される。

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header as KafkaHeader, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};

use crate::config::ProducerConfig;
use crate::error::MessagingError;
use crate::message::{Header, Message};
use crate::producer::MessageWriter;

const QUEUE_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// KafkaMessageWriter は rdkafka の FutureProducer を使った実装。
///
/// パーティショナーには `fnv1a_random` を指定するため、
/// 同じキーは [`crate::partitioner::HashPartitioner`] と同じパーティションに入る。
/// kafka-go の `Hash` バランサーとの違いは [`crate::partitioner::HashPartitioner`] を参照。
pub struct KafkaMessageWriter {
    producer: FutureProducer,
    async_send: bool,
    closed: AtomicBool,
}

impl KafkaMessageWriter {
    pub fn new(config: &ProducerConfig) -> Result<Self, MessagingError> {
        config.validate()?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers_string())
            .set("batch.num.messages", config.batch_size.to_string())
            .set("linger.ms", config.batch_timeout_ms.to_string())
            .set("partitioner", "fnv1a_random")
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| MessagingError::Transport(format!("create producer: {e}")))?;

        tracing::info!(
            brokers = %config.brokers_string(),
            topic = %config.topic,
            async_send = config.async_send,
            "kafka producer created"
        );

        Ok(Self {
            producer,
            async_send: config.async_send,
            closed: AtomicBool::new(false),
        })
    }
}

fn owned_headers(headers: &[Header]) -> OwnedHeaders {
    headers.iter().fold(OwnedHeaders::new(), |acc, h| {
        acc.insert(KafkaHeader {
            key: &h.key,
            value: Some(h.value.as_slice()),
        })
    })
}

fn record(message: &Message) -> FutureRecord<'_, [u8], [u8]> {
    let record = FutureRecord::to(&message.topic)
        .payload(message.value.as_slice())
        .headers(owned_headers(&message.headers));
    // 空キーはキーなしで送り、ラウンドロビンに任せる
    if message.key.is_empty() {
        record
    } else {
        record.key(message.key.as_slice())
    }
}

#[async_trait]
impl MessageWriter for KafkaMessageWriter {
    async fn write_messages(&self, messages: Vec<Message>) -> Result<(), MessagingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MessagingError::Closed("writer"));
        }

        if self.async_send {
            for message in &messages {
                let delivery = self
                    .producer
                    .send_result(record(message))
                    .map_err(|(e, _)| MessagingError::Transport(e.to_string()))?;
                let topic = message.topic.clone();
                tokio::spawn(async move {
                    match delivery.await {
                        Ok(Ok(_)) => {}
                        Ok(Err((e, _))) => {
                            tracing::error!(topic = %topic, error = %e, "async delivery failed");
                        }
                        Err(_) => {
                            tracing::error!(topic = %topic, "async delivery canceled");
                        }
                    }
                });
            }
            return Ok(());
        }

        let results = join_all(
            messages
                .iter()
                .map(|message| self.producer.send(record(message), QUEUE_TIMEOUT)),
        )
        .await;

        for result in results {
            result.map_err(|(e, _)| MessagingError::Transport(e.to_string()))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.producer
            .flush(FLUSH_TIMEOUT)
            .map_err(|e| MessagingError::Transport(format!("flush producer: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::Headers;

    #[test]
    fn test_owned_headers_preserve_order_and_values() {
        let headers = vec![Header::new("event_type", "markCreated"), Header::new("user_id", "7")];
        let owned = owned_headers(&headers);
        assert_eq!(owned.count(), 2);
        let first = owned.get(0);
        assert_eq!(first.key, "event_type");
        assert_eq!(first.value, Some(b"markCreated".as_slice()));
        assert_eq!(owned.get(1).key, "user_id");
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = KafkaMessageWriter::new(&ProducerConfig::default());
        assert!(matches!(result, Err(MessagingError::Configuration(_))));
    }
}
