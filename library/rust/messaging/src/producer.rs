use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ProducerConfig;
use crate::error::MessagingError;
use crate::headers::EventMeta;
use crate::message::{Header, Message};

/// MessageWriter はトランスポートへの書き込みインターフェース。
/// バッチングと配信確認の待ち方（同期・非同期）は実装側が設定に従って制御する。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait MessageWriter: Send + Sync {
    /// メッセージを書き込む。パーティションはキーから決定される。
    async fn write_messages(&self, messages: Vec<Message>) -> Result<(), MessagingError>;

    /// 未送信のメッセージを送り切ってからクローズする。
    async fn close(&self) -> Result<(), MessagingError>;
}

/// BatchEntry は publish_batch に渡す 1 件分のイベント。
#[derive(Debug, Clone)]
pub struct BatchEntry<E> {
    /// 空の場合は既定トピック
    pub topic: String,
    pub key: String,
    pub event: E,
    pub headers: Vec<Header>,
}

impl<E> BatchEntry<E> {
    pub fn new(key: impl Into<String>, event: E) -> Self {
        Self {
            topic: String::new(),
            key: key.into(),
            event,
            headers: Vec::new(),
        }
    }

    pub fn to_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_headers(mut self, headers: Vec<Header>) -> Self {
        self.headers = headers;
        self
    }
}

/// Producer はイベントを JSON にシリアライズしてトランスポートへ発行する。
///
/// 複数タスクから同時に publish してよい。発行失敗の再試行は行わないため、
/// 再試行ポリシーは呼び出し側で決める。
pub struct Producer {
    writer: Arc<dyn MessageWriter>,
    default_topic: String,
}

impl Producer {
    pub fn new(writer: Arc<dyn MessageWriter>, config: &ProducerConfig) -> Self {
        Self {
            writer,
            default_topic: config.topic.clone(),
        }
    }

    /// rdkafka を使ったプロデューサーを生成する。
    #[cfg(feature = "kafka")]
    pub fn kafka(config: &ProducerConfig) -> Result<Self, MessagingError> {
        let writer = crate::kafka_producer::KafkaMessageWriter::new(config)?;
        Ok(Self::new(Arc::new(writer), config))
    }

    pub fn default_topic(&self) -> &str {
        &self.default_topic
    }

    /// 既定トピックへイベントを発行する。
    /// key はパーティショニングに使われ、同じ key のイベントは同じパーティションに入る。
    pub async fn publish<E>(
        &self,
        key: &str,
        event: &E,
        headers: Vec<Header>,
    ) -> Result<(), MessagingError>
    where
        E: Serialize + ?Sized + Sync,
    {
        self.publish_to("", key, event, headers).await
    }

    /// 指定トピックへイベントを発行する。topic が空なら既定トピックを使う。
    pub async fn publish_to<E>(
        &self,
        topic: &str,
        key: &str,
        event: &E,
        headers: Vec<Header>,
    ) -> Result<(), MessagingError>
    where
        E: Serialize + ?Sized + Sync,
    {
        let value = serde_json::to_vec(event).map_err(MessagingError::Marshal)?;
        let topic = self.resolve_topic(topic);
        let message = Message::new(topic, key.as_bytes(), value).with_headers(headers);

        if let Err(e) = self.writer.write_messages(vec![message]).await {
            tracing::error!(topic = %topic, key = %key, error = %e, "publish failed");
            return Err(MessagingError::Transport(format!("write message: {e}")));
        }

        tracing::debug!(topic = %topic, key = %key, "event published");
        Ok(())
    }

    /// メタデータをヘッダーに載せて既定トピックへ発行する。
    /// パーティションキーには meta.user_id を使う（空ならトランスポートが選ぶ）。
    pub async fn publish_with_meta<E>(
        &self,
        meta: &EventMeta,
        payload: &E,
    ) -> Result<(), MessagingError>
    where
        E: Serialize + ?Sized + Sync,
    {
        self.publish_to_with_meta("", meta, payload).await
    }

    /// メタデータをヘッダーに載せて指定トピックへ発行する。
    pub async fn publish_to_with_meta<E>(
        &self,
        topic: &str,
        meta: &EventMeta,
        payload: &E,
    ) -> Result<(), MessagingError>
    where
        E: Serialize + ?Sized + Sync,
    {
        self.publish_to(topic, &meta.user_id, payload, meta.to_headers())
            .await
    }

    /// 複数イベントを 1 回の書き込みで発行する。
    ///
    /// 全エントリを先にシリアライズし、1 件でも失敗すれば何も書き込まずにそのエラーを返す。
    /// 書き込み自体が失敗した場合、トランスポートが一部のメッセージを既に配信している可能性がある。
    pub async fn publish_batch<E>(&self, entries: &[BatchEntry<E>]) -> Result<(), MessagingError>
    where
        E: Serialize + Sync,
    {
        let mut messages = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let value = serde_json::to_vec(&entry.event)
                .map_err(|source| MessagingError::MarshalBatch { index, source })?;
            messages.push(
                Message::new(self.resolve_topic(&entry.topic), entry.key.as_bytes(), value)
                    .with_headers(entry.headers.clone()),
            );
        }

        let count = messages.len();
        if let Err(e) = self.writer.write_messages(messages).await {
            tracing::error!(count, error = %e, "publish batch failed");
            return Err(MessagingError::Transport(format!("write batch: {e}")));
        }

        tracing::debug!(count, "event batch published");
        Ok(())
    }

    /// ライターをクローズする。
    pub async fn close(&self) -> Result<(), MessagingError> {
        self.writer.close().await
    }

    fn resolve_topic<'a>(&'a self, topic: &'a str) -> &'a str {
        if topic.is_empty() {
            &self.default_topic
        } else {
            topic
        }
    }
}
