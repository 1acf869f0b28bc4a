//! Consumer lifecycle and delivery tests against the in-memory broker.

use message_bus_kafka::broker::BrokerError;
use message_bus_kafka::testing::{MemoryBroker, MemoryConsumerGroup};
use message_bus_kafka::{codec, handler_fn, Consumer, Error, Handlers, Message, MessageType};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("message_bus_kafka=debug")
        .try_init()
        .ok();
}

fn consumer(broker: &MemoryBroker, group_id: &str) -> (Arc<Consumer>, MemoryConsumerGroup) {
    let (group, errors) = broker.consumer_group(group_id);
    let probe = group.clone();
    (Arc::new(Consumer::with_group(group, errors)), probe)
}

/// Handlers for `message_type` forwarding every message to the returned receiver.
fn forwarding_handlers(
    message_type: MessageType,
    fail: bool,
) -> (Handlers, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut handlers = Handlers::new();
    handlers.insert(
        message_type,
        handler_fn(move |message: Message| {
            let tx = tx.clone();
            async move {
                tx.send(message)?;
                anyhow::ensure!(!fail, "handler rejected the message");
                Ok(())
            }
        }),
    );
    (handlers, rx)
}

fn spawn_consume(consumer: &Arc<Consumer>, handlers: Handlers) -> JoinHandle<message_bus_kafka::Result<()>> {
    let consumer = Arc::clone(consumer);
    tokio::spawn(async move { consumer.start_consume(handlers).await })
}

async fn next_message(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("handler channel closed")
}

async fn wait_for_commit(broker: &MemoryBroker, group: &str, topic: &str, expected: i64) {
    tokio::time::timeout(WAIT, async {
        while broker.committed(group, topic, 0) != Some(expected) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("offset was not committed in time");
}

#[tokio::test]
async fn test_close_twice_tears_down_once() {
    init_tracing();
    let broker = MemoryBroker::new();
    let (consumer, probe) = consumer(&broker, "g1");

    consumer.close().await.unwrap();
    assert!(matches!(consumer.close().await, Err(Error::AlreadyClosed)));
    assert!(matches!(consumer.close().await, Err(Error::AlreadyClosed)));

    assert_eq!(probe.close_count(), 1);
    assert!(consumer.is_closed());
    assert!(!consumer.is_started());
}

#[tokio::test]
async fn test_empty_handlers_rejected() {
    let broker = MemoryBroker::new();
    let (consumer, probe) = consumer(&broker, "g1");

    let err = consumer.start_consume(Handlers::new()).await.unwrap_err();
    assert!(matches!(err, Error::EmptyHandlers));
    assert!(err.is_config());
    assert!(!consumer.is_started());
    assert_eq!(probe.session_count(), 0);

    consumer.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_start_has_single_winner() {
    init_tracing();
    let broker = MemoryBroker::new();
    let (consumer, _probe) = consumer(&broker, "g1");
    let (handlers, _rx) = forwarding_handlers(MessageType(7), false);

    let closer = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            consumer.close().await
        })
    };

    let (first, second) = tokio::join!(
        consumer.start_consume(handlers.clone()),
        consumer.start_consume(handlers),
    );
    closer.await.unwrap().unwrap();

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(Error::AlreadyStarted)))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_start_after_close_returns_immediately() {
    let broker = MemoryBroker::new();
    let (consumer, probe) = consumer(&broker, "g1");
    let (handlers, _rx) = forwarding_handlers(MessageType(7), false);

    consumer.close().await.unwrap();
    tokio::time::timeout(WAIT, consumer.start_consume(handlers))
        .await
        .expect("start_consume kept running after close")
        .unwrap();
    assert_eq!(probe.session_count(), 0);
}

#[tokio::test]
async fn test_invalid_frame_is_skipped() {
    init_tracing();
    let broker = MemoryBroker::new();
    let (consumer, _probe) = consumer(&broker, "g1");
    let (handlers, mut rx) = forwarding_handlers(MessageType(7), false);

    broker.append("topic_7", None, b"%%% not base64 %%%");
    broker.append("topic_7", None, &codec::encode(b"hello"));

    let running = spawn_consume(&consumer, handlers);

    let message = next_message(&mut rx).await;
    assert_eq!(message.payload, b"hello");
    assert_eq!(message.metadata.offset, 1);
    wait_for_commit(&broker, "g1", "topic_7", 2).await;

    consumer.close().await.unwrap();
    running.await.unwrap().unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_handler_still_commits() {
    init_tracing();
    let broker = MemoryBroker::new();
    let (consumer, _probe) = consumer(&broker, "g1");
    let (handlers, mut rx) = forwarding_handlers(MessageType(7), true);

    let running = spawn_consume(&consumer, handlers);

    broker.append("topic_7", None, &codec::encode(b"first"));
    broker.append("topic_7", None, &codec::encode(b"second"));

    assert_eq!(next_message(&mut rx).await.payload, b"first");
    assert_eq!(next_message(&mut rx).await.payload, b"second");
    wait_for_commit(&broker, "g1", "topic_7", 2).await;

    consumer.close().await.unwrap();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_sessions_are_retried() {
    init_tracing();
    let broker = MemoryBroker::new();
    let (consumer, probe) = consumer(&broker, "g1");
    let (handlers, mut rx) = forwarding_handlers(MessageType(7), false);

    probe.fail_next_session(KafkaError::Global(RDKafkaErrorCode::AllBrokersDown));
    probe.fail_next_session(KafkaError::Global(RDKafkaErrorCode::AllBrokersDown));
    broker.append("topic_7", None, &codec::encode(b"hello"));

    let running = spawn_consume(&consumer, handlers);

    assert_eq!(next_message(&mut rx).await.payload, b"hello");
    assert_eq!(probe.session_count(), 3);

    consumer.close().await.unwrap();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_close_interrupts_retry_backoff() {
    let broker = MemoryBroker::new();
    let (consumer, probe) = consumer(&broker, "g1");
    let (handlers, _rx) = forwarding_handlers(MessageType(7), false);

    for _ in 0..20 {
        probe.fail_next_session(KafkaError::Global(RDKafkaErrorCode::AllBrokersDown));
    }
    let running = spawn_consume(&consumer, handlers);
    tokio::time::sleep(Duration::from_millis(500)).await;

    consumer.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), running)
        .await
        .expect("retry loop ignored the shutdown")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_error_drain_ends_at_close() {
    init_tracing();
    let broker = MemoryBroker::new();
    let (consumer, probe) = consumer(&broker, "g1");

    assert!(probe.report_error(BrokerError::new(
        KafkaError::MessageConsumption(RDKafkaErrorCode::RequestTimedOut),
        "fetch request timed out",
    )));
    assert!(probe.report_error(BrokerError::new(
        KafkaError::Global(RDKafkaErrorCode::BrokerTransportFailure),
        "connection refused",
    )));

    tokio::time::timeout(WAIT, consumer.close())
        .await
        .expect("close waited on the error drain forever")
        .unwrap();

    assert!(!probe.report_error(BrokerError::new(
        KafkaError::Global(RDKafkaErrorCode::AllBrokersDown),
        "after close",
    )));
}

#[tokio::test]
async fn test_group_resumes_from_committed_offset() {
    init_tracing();
    let broker = MemoryBroker::new();

    let (first, _probe) = consumer(&broker, "g1");
    let (handlers, mut rx) = forwarding_handlers(MessageType(7), false);
    let running = spawn_consume(&first, handlers);
    broker.append("topic_7", None, &codec::encode(b"one"));
    assert_eq!(next_message(&mut rx).await.payload, b"one");
    wait_for_commit(&broker, "g1", "topic_7", 1).await;
    first.close().await.unwrap();
    running.await.unwrap().unwrap();

    broker.append("topic_7", None, &codec::encode(b"two"));

    let (second, _probe) = consumer(&broker, "g1");
    let (handlers, mut rx) = forwarding_handlers(MessageType(7), false);
    let running = spawn_consume(&second, handlers);
    let message = next_message(&mut rx).await;
    assert_eq!(message.payload, b"two");
    assert_eq!(message.metadata.offset, 1);
    second.close().await.unwrap();
    running.await.unwrap().unwrap();

    // Another group reads the topic from the beginning
    let (other, _probe) = consumer(&broker, "g2");
    let (handlers, mut rx) = forwarding_handlers(MessageType(7), false);
    let running = spawn_consume(&other, handlers);
    assert_eq!(next_message(&mut rx).await.payload, b"one");
    assert_eq!(next_message(&mut rx).await.payload, b"two");
    other.close().await.unwrap();
    running.await.unwrap().unwrap();
}
