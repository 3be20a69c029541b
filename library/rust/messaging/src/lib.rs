//! rtm-messaging: サービス間イベントメッセージングのコアライブラリ。
//!
//! ドメインイベントを JSON エンベロープに包んでトピックへ発行し、
//! コンシューマーグループとして受信して種別ごとのハンドラーへ振り分ける。
//! ハンドラーのエラーは Skip / Retryable / Fatal に分類され、
//! オフセットをコミットするかどうかが決まる。
//!
//! トランスポートは [`producer::MessageWriter`] と [`consumer::MessageReader`] で抽象化している。
//! `kafka` feature で rdkafka 実装が、[`memory`] でプロセス内ブローカーが使える。

pub mod classify;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod events;
pub mod headers;
pub mod memory;
pub mod message;
pub mod partitioner;
pub mod producer;
pub mod router;

#[cfg(feature = "kafka")]
pub mod kafka_consumer;
#[cfg(feature = "kafka")]
pub mod kafka_producer;

pub use classify::{ErrorKind, HandlerError};
pub use config::{ConsumerConfig, MessagingConfig, ProducerConfig};
pub use consumer::{handler_fn, Consumer, MessageHandler, MessageReader};
pub use error::MessagingError;
pub use event::Envelope;
pub use headers::{extract_meta, get_header, make_headers, EventMeta};
pub use memory::InMemoryBroker;
pub use message::{Header, Message};
pub use partitioner::{HashPartitioner, Partitioner};
pub use producer::{BatchEntry, MessageWriter, Producer};
pub use router::{EventDecoder, EventHandler, JsonDecoder, Router};

#[cfg(feature = "kafka")]
pub use kafka_consumer::KafkaMessageReader;
#[cfg(feature = "kafka")]
pub use kafka_producer::KafkaMessageWriter;

#[cfg(feature = "mock")]
pub use consumer::MockMessageReader;
#[cfg(feature = "mock")]
pub use producer::MockMessageWriter;
