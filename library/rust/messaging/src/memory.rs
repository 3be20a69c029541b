//! プロセス内で完結するパーティション付きブローカー。
//!
//! テストやローカル実行で Kafka の代わりに使う。キーによるパーティショニング、
//! コンシューマーグループ単位のコミット済みオフセット、コミット回数の記録を持つ。
//! リーダーはコミット済みオフセット（なければ先頭）から読み始めるため、
//! コミットされなかったメッセージは新しいリーダーで再配信される。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::consumer::MessageReader;
use crate::error::MessagingError;
use crate::message::Message;
use crate::partitioner::{HashPartitioner, Partitioner};
use crate::producer::MessageWriter;

#[derive(Default)]
struct LogState {
    /// topic -> パーティションごとのログ
    logs: HashMap<String, Vec<Vec<Message>>>,
    /// (group, topic, partition) -> 次に読むオフセット
    committed: HashMap<(String, String, i32), i64>,
    commit_count: usize,
}

struct BrokerInner {
    partitions: i32,
    partitioner: Arc<dyn Partitioner>,
    state: Mutex<LogState>,
    appended: Notify,
}

/// InMemoryBroker はメモリ上のトピックログ。clone すると同じログを共有する。
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    /// トピックごとに partitions 個のパーティションを持つブローカーを生成する。
    pub fn new(partitions: i32) -> Self {
        Self::with_partitioner(partitions, Arc::new(HashPartitioner::new()))
    }

    pub fn with_partitioner(partitions: i32, partitioner: Arc<dyn Partitioner>) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                partitions: partitions.max(1),
                partitioner,
                state: Mutex::new(LogState::default()),
                appended: Notify::new(),
            }),
        }
    }

    pub fn partitions(&self) -> i32 {
        self.inner.partitions
    }

    pub fn writer(&self) -> InMemoryWriter {
        InMemoryWriter {
            broker: self.inner.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// group_id のコンシューマーとして topics を購読するリーダーを生成する。
    pub fn reader<I, S>(&self, group_id: impl Into<String>, topics: I) -> InMemoryReader
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InMemoryReader {
            broker: self.inner.clone(),
            group_id: group_id.into(),
            topics: topics.into_iter().map(Into::into).collect(),
            positions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// トピックに書き込まれた全メッセージを、パーティション順・オフセット順で返す。
    pub async fn messages(&self, topic: &str) -> Vec<Message> {
        let state = self.inner.state.lock().await;
        state
            .logs
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// グループのコミット済みオフセット（次に読む位置）を返す。
    pub async fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        let state = self.inner.state.lock().await;
        state
            .committed
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// これまでに受け付けたコミットの回数。
    pub async fn commit_count(&self) -> usize {
        self.inner.state.lock().await.commit_count
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(1)
    }
}

/// InMemoryWriter は InMemoryBroker への MessageWriter 実装。
pub struct InMemoryWriter {
    broker: Arc<BrokerInner>,
    closed: AtomicBool,
}

#[async_trait]
impl MessageWriter for InMemoryWriter {
    async fn write_messages(&self, messages: Vec<Message>) -> Result<(), MessagingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MessagingError::Closed("writer"));
        }

        let partitions = self.broker.partitions;
        {
            let mut state = self.broker.state.lock().await;
            for mut message in messages {
                if message.topic.is_empty() {
                    return Err(MessagingError::Transport(
                        "message has no topic".to_string(),
                    ));
                }
                let partition = self.broker.partitioner.partition(&message.key, partitions);
                let log = state
                    .logs
                    .entry(message.topic.clone())
                    .or_insert_with(|| vec![Vec::new(); usize::try_from(partitions).unwrap_or(1)]);
                let slot = usize::try_from(partition).unwrap_or(0);
                let log = log.get_mut(slot).ok_or_else(|| {
                    MessagingError::Transport(format!("partition {partition} out of range"))
                })?;
                message.partition = partition;
                message.offset = i64::try_from(log.len()).unwrap_or(i64::MAX);
                log.push(message);
            }
        }
        self.broker.appended.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// InMemoryReader は InMemoryBroker からの MessageReader 実装。
pub struct InMemoryReader {
    broker: Arc<BrokerInner>,
    group_id: String,
    topics: Vec<String>,
    /// (topic, partition) -> このリーダーが次に読むオフセット
    positions: Mutex<HashMap<(String, i32), i64>>,
    closed: AtomicBool,
}

impl InMemoryReader {
    async fn poll_next(&self) -> Option<Message> {
        let state = self.broker.state.lock().await;
        let mut positions = self.positions.lock().await;

        for topic in &self.topics {
            let Some(log) = state.logs.get(topic) else {
                continue;
            };
            for (slot, partition_log) in log.iter().enumerate() {
                let partition = i32::try_from(slot).unwrap_or(i32::MAX);
                let position = *positions
                    .entry((topic.clone(), partition))
                    .or_insert_with(|| {
                        state
                            .committed
                            .get(&(self.group_id.clone(), topic.clone(), partition))
                            .copied()
                            .unwrap_or(0)
                    });
                let Some(message) = usize::try_from(position)
                    .ok()
                    .and_then(|index| partition_log.get(index))
                else {
                    continue;
                };
                positions.insert((topic.clone(), partition), position + 1);
                return Some(message.clone());
            }
        }
        None
    }
}

#[async_trait]
impl MessageReader for InMemoryReader {
    async fn fetch_message(&self) -> Result<Message, MessagingError> {
        loop {
            // 書き込み通知を取りこぼさないよう、ログを確認する前に待機を登録する
            let appended = self.broker.appended.notified();
            if self.closed.load(Ordering::SeqCst) {
                return Err(MessagingError::Closed("reader"));
            }
            if let Some(message) = self.poll_next().await {
                return Ok(message);
            }
            appended.await;
        }
    }

    async fn commit(&self, message: &Message) -> Result<(), MessagingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MessagingError::Closed("reader"));
        }
        let mut state = self.broker.state.lock().await;
        state.committed.insert(
            (
                self.group_id.clone(),
                message.topic.clone(),
                message.partition,
            ),
            message.offset + 1,
        );
        state.commit_count += 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.appended.notify_waiters();
        }
        Ok(())
    }
}
