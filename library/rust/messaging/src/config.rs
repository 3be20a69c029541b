use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::MessagingError;

/// ProducerConfig はプロデューサーの設定を表す。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProducerConfig {
    /// Kafka ブローカーアドレスのリスト（例: ["kafka:9092"]）
    #[serde(default)]
    pub brokers: Vec<String>,
    /// 既定の送信先トピック（例: "mark-service.events"）
    #[serde(default)]
    pub topic: String,
    /// 1 バッチに詰めるメッセージ数
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// バッチを確定するまでの待ち時間（ミリ秒）
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// true の場合、配信確認を待たずに publish が返る
    #[serde(default, rename = "async")]
    pub async_send: bool,
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_ms() -> u64 {
    10
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            topic: String::new(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            async_send: false,
        }
    }
}

impl ProducerConfig {
    pub fn with_brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.brokers = brokers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout_ms = duration_millis(timeout);
        self
    }

    pub fn with_async(mut self, async_send: bool) -> Self {
        self.async_send = async_send;
        self
    }

    /// ブローカーアドレスをカンマ区切り文字列で返す（rdkafka 用）。
    pub fn brokers_string(&self) -> String {
        self.brokers.join(",")
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// 実ブローカーへ接続する前の検証。
    pub fn validate(&self) -> Result<(), MessagingError> {
        if self.brokers.is_empty() {
            return Err(MessagingError::Configuration(
                "producer: at least one broker must be specified".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(MessagingError::Configuration(
                "producer: batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// ConsumerConfig はコンシューマーの設定を表す。
/// トピックは生成時に固定され、実行中に変更できない。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumerConfig {
    #[serde(default)]
    pub brokers: Vec<String>,
    /// 購読するトピック。YAML では `topic: x` と `topics: [x, y]` のどちらも受け付ける。
    #[serde(default, alias = "topic", deserialize_with = "one_or_many")]
    pub topics: Vec<String>,
    /// コンシューマーグループ ID（消費するサービスごとに 1 つ）
    #[serde(default)]
    pub group_id: String,
    #[serde(default = "default_min_bytes")]
    pub min_bytes: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// フェッチの最大待ち時間（ミリ秒）
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// 0 は手動・即時コミットを意味する。それ以外の値はサポートしない。
    #[serde(default)]
    pub commit_interval_ms: u64,
    /// Retryable 分類時にループを止める時間（ミリ秒）
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// フェッチ失敗時のバックオフ初期値（ミリ秒）。0 で待機なし。
    #[serde(default = "default_fetch_backoff_initial_ms")]
    pub fetch_backoff_initial_ms: u64,
    /// フェッチ失敗時のバックオフ上限（ミリ秒）
    #[serde(default = "default_fetch_backoff_max_ms")]
    pub fetch_backoff_max_ms: u64,
}

fn default_min_bytes() -> usize {
    1
}

fn default_max_bytes() -> usize {
    10_000_000
}

fn default_max_wait_ms() -> u64 {
    500
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_fetch_backoff_initial_ms() -> u64 {
    100
}

fn default_fetch_backoff_max_ms() -> u64 {
    5000
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(topic) => vec![topic],
        OneOrMany::Many(topics) => topics,
    })
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            topics: Vec::new(),
            group_id: String::new(),
            min_bytes: default_min_bytes(),
            max_bytes: default_max_bytes(),
            max_wait_ms: default_max_wait_ms(),
            commit_interval_ms: 0,
            retry_delay_ms: default_retry_delay_ms(),
            fetch_backoff_initial_ms: default_fetch_backoff_initial_ms(),
            fetch_backoff_max_ms: default_fetch_backoff_max_ms(),
        }
    }
}

impl ConsumerConfig {
    pub fn with_brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.brokers = brokers.into_iter().map(Into::into).collect();
        self
    }

    /// 単一トピックを購読する。
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics = vec![topic.into()];
        self
    }

    /// 複数トピックをグループ購読する。
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = duration_millis(delay);
        self
    }

    pub fn with_fetch_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.fetch_backoff_initial_ms = duration_millis(initial);
        self.fetch_backoff_max_ms = duration_millis(max);
        self
    }

    pub fn brokers_string(&self) -> String {
        self.brokers.join(",")
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// 実ブローカーへ接続する前の検証。
    pub fn validate(&self) -> Result<(), MessagingError> {
        if self.brokers.is_empty() {
            return Err(MessagingError::Configuration(
                "consumer: at least one broker must be specified".to_string(),
            ));
        }
        if self.topics.is_empty() || self.topics.iter().any(String::is_empty) {
            return Err(MessagingError::Configuration(
                "consumer: at least one non-empty topic must be specified".to_string(),
            ));
        }
        if self.group_id.is_empty() {
            return Err(MessagingError::Configuration(
                "consumer: group_id is required".to_string(),
            ));
        }
        if self.commit_interval_ms != 0 {
            return Err(MessagingError::Configuration(
                "consumer: commit_interval_ms must be 0 (manual commit)".to_string(),
            ));
        }
        if self.min_bytes > self.max_bytes {
            return Err(MessagingError::Configuration(
                "consumer: min_bytes must not exceed max_bytes".to_string(),
            ));
        }
        Ok(())
    }
}

/// MessagingConfig はサービス設定ファイル内のメッセージング節を表す。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessagingConfig {
    #[serde(default)]
    pub producer: Option<ProducerConfig>,
    #[serde(default)]
    pub consumer: Option<ConsumerConfig>,
}

impl MessagingConfig {
    /// YAML 文字列から読み込む。
    pub fn from_yaml_str(yaml: &str) -> Result<Self, MessagingError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| MessagingError::Configuration(format!("failed to parse YAML: {e}")))
    }

    /// YAML ファイルから読み込む。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MessagingError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            MessagingError::Configuration(format!(
                "failed to read file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml_str(&yaml)
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
