//! librdkafka-backed implementations of the broker seam.

use crate::broker::{
    BrokerError, BrokerProducer, ClaimHandler, ClaimRouter, ConsumerGroup, Delivery,
    GroupSession, OutboundRecord, Record,
};
use crate::config::{ConsumerConfig, ProducerConfig};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::client::ClientContext;
use rdkafka::consumer::{
    CommitMode, Consumer as RdkafkaConsumer, ConsumerContext, StreamConsumer,
};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Message as RdkafkaMessage};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as RdkafkaProducer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Offset, Timestamp, TopicPartitionList};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Upper bound on how long closing a producer waits for queued messages.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Error returned by calls made after the client was released.
fn client_closed() -> KafkaError {
    KafkaError::Global(RDKafkaErrorCode::BrokerDestroy)
}

/// Client context forwarding asynchronous client errors to the consumer's
/// error channel.
pub struct BusContext {
    errors: mpsc::UnboundedSender<BrokerError>,
}

impl BusContext {
    fn report(&self, error: BrokerError) {
        // The receiver only goes away once the consumer has been closed
        let _ = self.errors.send(error);
    }
}

impl ClientContext for BusContext {
    fn error(&self, error: KafkaError, reason: &str) {
        self.report(BrokerError::new(error, reason));
    }
}

// Rebalances are logged by the default hooks
impl ConsumerContext for BusContext {
    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        match result {
            Ok(()) | Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => {
                self.report(BrokerError::new(e, "offset commit failed"));
            }
        }
    }
}

/// Consumer group membership backed by an rdkafka [`StreamConsumer`].
pub struct KafkaConsumerGroup {
    consumer: Mutex<Option<Arc<StreamConsumer<BusContext>>>>,
    channel_buffer_size: usize,
}

impl KafkaConsumerGroup {
    /// Create the group client. The returned receiver yields the client's
    /// asynchronous errors until the client is dropped.
    pub fn new(config: &ConsumerConfig) -> Result<(Self, mpsc::UnboundedReceiver<BrokerError>)> {
        let client_config = config.client_config()?;
        let (errors, receiver) = mpsc::unbounded_channel();
        let consumer: StreamConsumer<BusContext> =
            client_config.create_with_context(BusContext { errors })?;

        let group = Self {
            consumer: Mutex::new(Some(Arc::new(consumer))),
            channel_buffer_size: config.channel_buffer_size(),
        };
        Ok((group, receiver))
    }

    fn consumer(&self) -> std::result::Result<Arc<StreamConsumer<BusContext>>, KafkaError> {
        self.consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(client_closed)
    }
}

#[async_trait]
impl ConsumerGroup for KafkaConsumerGroup {
    async fn consume(
        &self,
        topics: &[String],
        handler: Arc<dyn ClaimHandler>,
        shutdown: CancellationToken,
    ) -> std::result::Result<(), KafkaError> {
        let consumer = self.consumer()?;
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs)?;

        let session: Arc<dyn GroupSession> = Arc::new(KafkaSession {
            consumer: Arc::clone(&consumer),
        });
        handler.setup(session.as_ref()).await;

        let mut router = ClaimRouter::new(
            Arc::clone(&handler),
            Arc::clone(&session),
            self.channel_buffer_size,
        );

        let result = loop {
            let record = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                received = consumer.recv() => match received {
                    Ok(message) => record_from_message(&message),
                    Err(e) if ends_session(&e) => break Err(e),
                    Err(e) => {
                        consumer.context().report(BrokerError::new(e, "consume error"));
                        continue;
                    }
                },
            };

            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                // A record refused by a stopped claim stays unmarked and is
                // fetched again after the next rebalance
                _ = router.route(record) => {}
            }
        };

        // Let every claim drain what it already received
        router.finish().await;
        handler.cleanup(session.as_ref()).await;

        result
    }

    fn close(&self) -> std::result::Result<(), KafkaError> {
        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(consumer) = consumer else {
            return Ok(());
        };

        let result = match consumer.commit_consumer_state(CommitMode::Sync) {
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
            other => other,
        };
        consumer.unsubscribe();
        result
    }
}

/// Whether a receive error ends the group session.
///
/// Per-message errors (an unknown topic, a fetch timeout) only concern one
/// partition: they go to the error channel and the session keeps running.
fn ends_session(error: &KafkaError) -> bool {
    !matches!(
        error,
        KafkaError::MessageConsumption(_) | KafkaError::PartitionEOF(_)
    )
}

struct KafkaSession {
    consumer: Arc<StreamConsumer<BusContext>>,
}

impl GroupSession for KafkaSession {
    fn mark(&self, record: &Record) {
        let mut tpl = TopicPartitionList::new();
        let stored = tpl
            .add_partition_offset(
                &record.topic,
                record.partition,
                Offset::Offset(record.offset + 1),
            )
            .and_then(|()| self.consumer.store_offsets(&tpl));

        if let Err(e) = stored {
            warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "Failed to store offset: {e}"
            );
        }
    }
}

fn record_from_message(message: &BorrowedMessage<'_>) -> Record {
    let (timestamp, log_append_time) = match message.timestamp() {
        Timestamp::CreateTime(ms) => (DateTime::from_timestamp_millis(ms), None),
        Timestamp::LogAppendTime(ms) => (None, DateTime::from_timestamp_millis(ms)),
        Timestamp::NotAvailable => (None, None),
    };

    Record {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(|k| k.to_vec()),
        value: message.payload().map(|p| p.to_vec()),
        timestamp,
        log_append_time,
    }
}

/// Publishing client backed by an rdkafka [`FutureProducer`].
pub struct KafkaProducer {
    producer: Mutex<Option<FutureProducer>>,
}

impl KafkaProducer {
    pub fn new(config: &ProducerConfig) -> Result<Self> {
        let producer: FutureProducer = config.client_config()?.create()?;
        Ok(Self {
            producer: Mutex::new(Some(producer)),
        })
    }

    fn producer(&self) -> std::result::Result<FutureProducer, KafkaError> {
        self.producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(client_closed)
    }
}

#[async_trait]
impl BrokerProducer for KafkaProducer {
    async fn send(&self, record: OutboundRecord) -> std::result::Result<Delivery, KafkaError> {
        let producer = self.producer()?;
        let timestamp = Utc::now().timestamp_millis();

        let mut future_record: FutureRecord<'_, str, Vec<u8>> = FutureRecord::to(&record.topic)
            .payload(&record.value)
            .timestamp(timestamp);
        if let Some(key) = record.key.as_deref() {
            future_record = future_record.key(key);
        }

        let (partition, offset) = producer
            .send(future_record, Timeout::Never)
            .await
            .map_err(|(err, _)| err)?;

        Ok(Delivery {
            partition,
            offset,
            timestamp: DateTime::from_timestamp_millis(timestamp),
        })
    }

    fn close(&self) -> std::result::Result<(), KafkaError> {
        let producer = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match producer {
            Some(producer) => producer.flush(Timeout::After(CLOSE_FLUSH_TIMEOUT)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_producer_rejects_invalid_config() {
        let mut config = ProducerConfig::default();
        config.connection.brokers.clear();
        assert!(KafkaProducer::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_closed_producer_stops_sending() {
        // librdkafka connects lazily, so no broker is needed to create a client
        let producer = KafkaProducer::new(&ProducerConfig::default()).unwrap();
        producer.close().unwrap();

        let err = producer
            .send(OutboundRecord {
                topic: "topic_7".to_string(),
                key: None,
                value: b"aGVsbG8=".to_vec(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.rdkafka_error_code(), Some(RDKafkaErrorCode::BrokerDestroy));
    }

    #[test]
    fn test_per_message_errors_keep_the_session() {
        for error in [
            KafkaError::MessageConsumption(RDKafkaErrorCode::UnknownTopicOrPartition),
            KafkaError::MessageConsumption(RDKafkaErrorCode::RequestTimedOut),
            KafkaError::PartitionEOF(3),
        ] {
            assert!(!ends_session(&error), "{error}");
        }

        for error in [
            KafkaError::Subscription("topic_7".to_string()),
            KafkaError::Global(RDKafkaErrorCode::BrokerDestroy),
        ] {
            assert!(ends_session(&error), "{error}");
        }
    }

    #[tokio::test]
    async fn test_context_forwards_consume_errors() {
        let (errors, mut receiver) = mpsc::unbounded_channel();
        let context = BusContext { errors };

        context.report(BrokerError::new(
            KafkaError::MessageConsumption(RDKafkaErrorCode::RequestTimedOut),
            "consume error",
        ));
        let forwarded = receiver.recv().await.unwrap();
        assert!(forwarded.is_request_timeout());
        assert_eq!(forwarded.reason, "consume error");

        context.commit_callback(
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)),
            &TopicPartitionList::new(),
        );
        assert!(receiver.try_recv().is_err());

        // Reporting after the consumer went away is silently dropped
        drop(receiver);
        context.error(KafkaError::Global(RDKafkaErrorCode::AllBrokersDown), "down");
    }

    #[tokio::test]
    async fn test_consumer_group_close_is_repeatable() {
        let config = ConsumerConfig {
            group_id: "g1".to_string(),
            ..Default::default()
        };
        let (group, mut errors) = KafkaConsumerGroup::new(&config).unwrap();
        group.close().unwrap();
        group.close().unwrap();

        drop(group);
        // Dropping the client closes the error channel
        let drained = tokio::time::timeout(Duration::from_secs(30), async {
            while errors.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }
}
