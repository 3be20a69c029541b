use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::classify::{ErrorKind, HandlerError};
use crate::config::ConsumerConfig;
use crate::error::MessagingError;
use crate::message::Message;

/// MessageReader はトランスポートからの受信インターフェース。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait MessageReader: Send + Sync {
    /// 次のメッセージを受信するまで待つ。
    async fn fetch_message(&self) -> Result<Message, MessagingError>;

    /// メッセージのオフセットを即時コミットする。
    async fn commit(&self, message: &Message) -> Result<(), MessagingError>;

    /// リーダーをクローズする。2 回目以降の呼び出しは何もしない。
    async fn close(&self) -> Result<(), MessagingError>;
}

/// MessageHandler は Consumer::run が各メッセージに対して呼び出す処理。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        (**self).handle(message).await
    }
}

/// FnHandler は async クロージャを MessageHandler として扱うアダプター。
pub struct FnHandler<F>(F);

/// async クロージャから MessageHandler を生成する。
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        (self.0)(message.clone()).await
    }
}

/// フェッチ失敗時の指数バックオフ。成功すると初期値に戻る。
#[derive(Debug, Clone)]
struct FetchBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl FetchBackoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Consumer はメッセージを 1 件ずつ fetch → handle → commit する。
///
/// ハンドラーの結果の分類に応じてコミットの有無が決まる。
/// 同一インスタンスで run を並行に呼び出してはならない。
pub struct Consumer {
    reader: Arc<dyn MessageReader>,
    topics: Vec<String>,
    group_id: String,
    retry_delay: Duration,
    backoff_initial: Duration,
    backoff_max: Duration,
}

impl Consumer {
    pub fn new(reader: Arc<dyn MessageReader>, config: &ConsumerConfig) -> Self {
        Self {
            reader,
            topics: config.topics.clone(),
            group_id: config.group_id.clone(),
            retry_delay: config.retry_delay(),
            backoff_initial: Duration::from_millis(config.fetch_backoff_initial_ms),
            backoff_max: Duration::from_millis(config.fetch_backoff_max_ms),
        }
    }

    /// rdkafka を使ったコンシューマーを生成する。
    #[cfg(feature = "kafka")]
    pub fn kafka(config: &ConsumerConfig) -> Result<Self, MessagingError> {
        let reader = crate::kafka_consumer::KafkaMessageReader::new(config)?;
        Ok(Self::new(Arc::new(reader), config))
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// キャンセルされるまでメッセージを処理し続ける。
    ///
    /// キャンセルはフェッチの合間にのみ確認され、実行中のハンドラーは最後まで走る。
    /// キャンセル時はリーダーをクローズして戻る。
    pub async fn run<H>(&self, cancel: CancellationToken, handler: &H) -> Result<(), MessagingError>
    where
        H: MessageHandler + ?Sized,
    {
        tracing::info!(
            topics = ?self.topics,
            group = %self.group_id,
            "starting consumer"
        );

        let mut backoff = FetchBackoff::new(self.backoff_initial, self.backoff_max);

        loop {
            if cancel.is_cancelled() {
                return self.stop().await;
            }

            let fetched = tokio::select! {
                biased;
                () = cancel.cancelled() => return self.stop().await,
                fetched = self.reader.fetch_message() => fetched,
            };

            match fetched {
                Ok(message) => {
                    backoff.reset();
                    let span = tracing::info_span!(
                        "consume",
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                    );
                    self.process_message(&message, handler)
                        .instrument(span)
                        .await;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "error reading message"
                    );
                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => return self.stop().await,
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    async fn process_message<H>(&self, message: &Message, handler: &H)
    where
        H: MessageHandler + ?Sized,
    {
        if let Err(err) = handler.handle(message).await {
            match err.kind() {
                ErrorKind::Skip => {
                    tracing::warn!(error = %err, "skipping message");
                }
                ErrorKind::Retryable => {
                    tracing::warn!(
                        error = %err,
                        delay_ms = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX),
                        "retryable error, offset not committed"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    return;
                }
                ErrorKind::Fatal => {
                    tracing::error!(error = %err, "fatal error, dropping message");
                }
                ErrorKind::Unclassified => {
                    tracing::error!(error = %err, "error handling message");
                }
            }
        }

        if let Err(e) = self.reader.commit(message).await {
            tracing::error!(error = %e, "error committing message");
        }
    }

    async fn stop(&self) -> Result<(), MessagingError> {
        tracing::info!(group = %self.group_id, "cancellation requested, stopping consumer");
        self.reader.close().await
    }

    /// リーダーをクローズする。run が戻った後に呼んでも安全。
    pub async fn close(&self) -> Result<(), MessagingError> {
        self.reader.close().await
    }
}
