use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rtm_messaging::events::{
    self, CommentEvent, CommentPayload, MarkEvent, MarkPayload, MARK_CREATED,
};
use rtm_messaging::{
    extract_meta, get_header, handler_fn, BatchEntry, Consumer, ConsumerConfig, EventMeta,
    HandlerError, InMemoryBroker, Message, MessageWriter, Partitioner, Producer, ProducerConfig,
    Router,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const MARK_TOPIC: &str = "mark-service.events";
const GROUP: &str = "gamification-service";
const RUN_TIMEOUT: Duration = Duration::from_secs(5);

fn producer(broker: &InMemoryBroker, topic: &str) -> Producer {
    Producer::new(
        Arc::new(broker.writer()),
        &ProducerConfig::default().with_topic(topic),
    )
}

fn consumer(broker: &InMemoryBroker, topics: &[&str]) -> Consumer {
    let config = ConsumerConfig::default()
        .with_topics(topics.iter().copied())
        .with_group_id(GROUP)
        .with_retry_delay(Duration::from_millis(10));
    Consumer::new(
        Arc::new(broker.reader(GROUP, topics.iter().copied())),
        &config,
    )
}

fn mark_created(mark_id: i64, owner_id: i64) -> MarkEvent {
    MarkEvent::mark_created(MarkPayload::new(mark_id, 1, owner_id, "finish the book", None))
}

#[tokio::test]
async fn test_publish_route_commit_end_to_end() {
    let broker = InMemoryBroker::new(4);
    let event = mark_created(7, 42);
    producer(&broker, MARK_TOPIC)
        .publish("7", &event, Vec::new())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new(|e: &MarkEvent| e.event_type());
    {
        let seen = seen.clone();
        let cancel = cancel.clone();
        router.register_fn(MARK_CREATED, move |event: MarkEvent| {
            let seen = seen.clone();
            let cancel = cancel.clone();
            async move {
                seen.lock().await.push(event.payload.mark_id);
                cancel.cancel();
                Ok::<(), HandlerError>(())
            }
        });
    }

    let consumer = consumer(&broker, &[MARK_TOPIC]);
    tokio::time::timeout(RUN_TIMEOUT, consumer.run(cancel, &router.message_handler()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(*seen.lock().await, vec![7]);
    assert_eq!(broker.commit_count().await, 1);

    let stored = broker.messages(MARK_TOPIC).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].key, b"7");
    assert_eq!(
        broker
            .committed_offset(GROUP, MARK_TOPIC, stored[0].partition)
            .await,
        Some(1)
    );
}

struct FirstBytePartitioner;

impl Partitioner for FirstBytePartitioner {
    fn partition(&self, key: &[u8], partitions: i32) -> i32 {
        key.first().map_or(0, |b| i32::from(*b) % partitions)
    }
}

#[tokio::test]
async fn test_key_determines_partition() {
    let broker = InMemoryBroker::with_partitioner(4, Arc::new(FirstBytePartitioner));
    let producer = producer(&broker, MARK_TOPIC);

    for (key, mark_id) in [("a", 1), ("b", 2), ("a", 3), ("b", 4)] {
        producer
            .publish(key, &mark_created(mark_id, 1), Vec::new())
            .await
            .unwrap();
    }

    let stored = broker.messages(MARK_TOPIC).await;
    let partition_of = |key: &[u8]| {
        stored
            .iter()
            .filter(|m| m.key == key)
            .map(|m| m.partition)
            .collect::<Vec<_>>()
    };
    assert_eq!(partition_of(b"a"), vec![1, 1]);
    assert_eq!(partition_of(b"b"), vec![2, 2]);
}

#[tokio::test]
async fn test_per_key_order_is_preserved_through_consumer() {
    let broker = InMemoryBroker::new(3);
    let producer = producer(&broker, MARK_TOPIC);
    for mark_id in 0..6 {
        let key = if mark_id % 2 == 0 { "even" } else { "odd" };
        producer
            .publish(key, &mark_created(mark_id, 1), Vec::new())
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = seen.clone();
        let cancel = cancel.clone();
        handler_fn(move |msg: Message| {
            let seen = seen.clone();
            let cancel = cancel.clone();
            async move {
                let event: MarkEvent = msg.deserialize_json().map_err(HandlerError::skip)?;
                let mut seen = seen.lock().await;
                seen.push((msg.key_str().into_owned(), event.payload.mark_id));
                if seen.len() == 6 {
                    cancel.cancel();
                }
                Ok::<(), HandlerError>(())
            }
        })
    };

    tokio::time::timeout(RUN_TIMEOUT, consumer(&broker, &[MARK_TOPIC]).run(cancel, &handler))
        .await
        .unwrap()
        .unwrap();

    let seen = seen.lock().await;
    let ids_for = |key: &str| {
        seen.iter()
            .filter(|(k, _)| k == key)
            .map(|(_, id)| *id)
            .collect::<Vec<_>>()
    };
    assert_eq!(ids_for("even"), vec![0, 2, 4]);
    assert_eq!(ids_for("odd"), vec![1, 3, 5]);
    assert_eq!(broker.commit_count().await, 6);
}

#[tokio::test]
async fn test_retryable_message_is_redelivered_after_restart() {
    let broker = InMemoryBroker::new(1);
    producer(&broker, MARK_TOPIC)
        .publish("7", &mark_created(7, 42), Vec::new())
        .await
        .unwrap();

    // 1 回目: 依存先が落ちている想定で Retryable を返す
    let attempts = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();
    let failing = {
        let attempts = attempts.clone();
        let cancel = cancel.clone();
        handler_fn(move |_msg: Message| {
            let attempts = attempts.clone();
            let cancel = cancel.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                cancel.cancel();
                Err::<(), _>(HandlerError::retryable("database unavailable"))
            }
        })
    };
    tokio::time::timeout(RUN_TIMEOUT, consumer(&broker, &[MARK_TOPIC]).run(cancel, &failing))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(broker.commit_count().await, 0);
    assert_eq!(broker.committed_offset(GROUP, MARK_TOPIC, 0).await, None);

    // 2 回目: 同じグループで再起動すると同じメッセージが再配信される
    let cancel = CancellationToken::new();
    let redelivered = Arc::new(Mutex::new(None));
    let succeeding = {
        let redelivered = redelivered.clone();
        let cancel = cancel.clone();
        handler_fn(move |msg: Message| {
            let redelivered = redelivered.clone();
            let cancel = cancel.clone();
            async move {
                *redelivered.lock().await = Some(msg.offset);
                cancel.cancel();
                Ok::<(), HandlerError>(())
            }
        })
    };
    tokio::time::timeout(RUN_TIMEOUT, consumer(&broker, &[MARK_TOPIC]).run(cancel, &succeeding))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(*redelivered.lock().await, Some(0));
    assert_eq!(broker.commit_count().await, 1);
    assert_eq!(broker.committed_offset(GROUP, MARK_TOPIC, 0).await, Some(1));
}

#[tokio::test]
async fn test_malformed_message_is_skipped_and_stream_continues() {
    let broker = InMemoryBroker::new(1);
    broker
        .writer()
        .write_messages(vec![Message::new(MARK_TOPIC, "7", b"{not json".to_vec())])
        .await
        .unwrap();
    producer(&broker, MARK_TOPIC)
        .publish("8", &mark_created(8, 1), Vec::new())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new(|e: &MarkEvent| e.event_type());
    {
        let seen = seen.clone();
        let cancel = cancel.clone();
        router.register_fn(MARK_CREATED, move |event: MarkEvent| {
            let seen = seen.clone();
            let cancel = cancel.clone();
            async move {
                seen.lock().await.push(event.payload.mark_id);
                cancel.cancel();
                Ok::<(), HandlerError>(())
            }
        });
    }

    tokio::time::timeout(
        RUN_TIMEOUT,
        consumer(&broker, &[MARK_TOPIC]).run(cancel, &router.message_handler()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(*seen.lock().await, vec![8]);
    assert_eq!(broker.commit_count().await, 2);
    assert_eq!(broker.committed_offset(GROUP, MARK_TOPIC, 0).await, Some(2));
}

#[tokio::test]
async fn test_metadata_travels_in_headers_and_body() {
    let broker = InMemoryBroker::new(2);
    let topic = events::service_topic("comment-service");
    let producer = producer(&broker, &topic);

    let event = CommentEvent::comment_created(CommentPayload {
        comment_id: 11,
        user_id: 5,
        entity_type: "mark".to_string(),
        entity_id: 99,
        parent_id: None,
        content: "nice".to_string(),
    });
    let meta = EventMeta::new(events::COMMENT_CREATED)
        .with_user_id(5)
        .with_source_id(99);
    producer.publish_with_meta(&meta, &event).await.unwrap();

    let stored = broker.messages(&topic).await;
    assert_eq!(stored.len(), 1);
    let msg = &stored[0];

    assert_eq!(msg.key, b"5");
    let extracted = extract_meta(msg);
    assert_eq!(extracted.event_type, events::COMMENT_CREATED);
    assert_eq!(extracted.user_id, "5");
    assert_eq!(extracted.source_id, "99");
    assert_eq!(extracted.timestamp, meta.timestamp);
    assert_eq!(get_header(msg, "source_id"), "99");

    let decoded: CommentEvent = msg.deserialize_json().unwrap();
    assert_eq!(decoded.event_type(), extracted.event_type);
    assert_eq!(decoded.payload.entity_id, 99);
}

#[tokio::test]
async fn test_batch_publish_to_multiple_topics() {
    let broker = InMemoryBroker::new(2);
    let producer = producer(&broker, MARK_TOPIC);

    let entries = vec![
        BatchEntry::new("1", serde_json::json!({"type": "markCreated"})),
        BatchEntry::new("2", serde_json::json!({"type": "user.created"}))
            .to_topic(events::service_topic("user-service")),
    ];
    producer.publish_batch(&entries).await.unwrap();

    assert_eq!(broker.messages(MARK_TOPIC).await.len(), 1);
    assert_eq!(broker.messages("user-service.events").await.len(), 1);

    producer.close().await.unwrap();
    assert!(producer
        .publish("3", &serde_json::json!({}), Vec::new())
        .await
        .is_err());
}
