use crate::broker::{BrokerError, Claim, ClaimHandler, ConsumerGroup, GroupSession, Record};
use crate::client::KafkaConsumerGroup;
use crate::config::ConsumerConfig;
use crate::error::{Error, Result};
use crate::handler::Handlers;
use crate::lifecycle::OnceFlag;
use async_trait::async_trait;
use kafka_types::{codec, BrokerMetadata, Message, MessageType};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consumes typed messages from the bus and dispatches them to handlers.
///
/// A consumer moves through `idle → started → closing → closed`:
/// [`Consumer::start_consume`] succeeds at most once, [`Consumer::close`]
/// tears everything down at most once.
///
/// NOTE: [`Consumer::close`] must be called even if the consumer was never
/// started, otherwise the broker connection and the error drain task leak.
pub struct Consumer {
    group: Arc<dyn ConsumerGroup>,
    started: OnceFlag,
    closed: OnceFlag,
    shutdown: CancellationToken,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl Consumer {
    /// Create a consumer group member connected to the brokers in `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &ConsumerConfig) -> Result<Self> {
        let (group, errors) = KafkaConsumerGroup::new(config)?;
        Ok(Self::with_group(group, errors))
    }

    /// Create a consumer on top of an existing group client.
    ///
    /// `errors` is drained in a background task until the client closes it.
    pub fn with_group(
        group: impl ConsumerGroup + 'static,
        errors: mpsc::UnboundedReceiver<BrokerError>,
    ) -> Self {
        Self {
            group: Arc::new(group),
            started: OnceFlag::new(),
            closed: OnceFlag::new(),
            shutdown: CancellationToken::new(),
            drain: Mutex::new(Some(tokio::spawn(drain_errors(errors)))),
        }
    }

    /// Consume messages until [`Consumer::close`] is called.
    ///
    /// Subscribes to the topic of every message type in `handlers`. Failed
    /// group sessions are logged and retried with a bounded backoff; only a
    /// shutdown ends the call.
    pub async fn start_consume(&self, handlers: Handlers) -> Result<()> {
        if handlers.is_empty() {
            return Err(Error::EmptyHandlers);
        }
        if !self.started.try_set() {
            return Err(Error::AlreadyStarted);
        }

        let mut topics: Vec<String> = handlers.keys().map(|t| t.topic()).collect();
        topics.sort();
        let dispatcher: Arc<dyn ClaimHandler> = Arc::new(Dispatcher { handlers });

        info!(?topics, "Starting Kafka consumer");
        let mut backoff = Backoff::default();
        loop {
            if self.shutdown.is_cancelled() {
                info!(?topics, "Kafka consumer stopped");
                return Ok(());
            }

            match self
                .group
                .consume(&topics, Arc::clone(&dispatcher), self.shutdown.clone())
                .await
            {
                Ok(()) => backoff.reset(),
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(?topics, ?delay, "Kafka consume failed: {e}");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Stop consuming and release the broker connection.
    ///
    /// Waits for the error drain task to finish. Only the first call tears
    /// down; later calls fail with [`Error::AlreadyClosed`] right away.
    pub async fn close(&self) -> Result<()> {
        if !self.closed.try_set() {
            return Err(Error::AlreadyClosed);
        }
        self.shutdown.cancel();

        // Closing commits offsets synchronously
        let group = Arc::clone(&self.group);
        let result = match tokio::task::spawn_blocking(move || group.close()).await {
            Ok(result) => result,
            Err(e) => {
                error!("Kafka consumer close task failed: {e}");
                Err(KafkaError::Global(RDKafkaErrorCode::Fail))
            }
        };

        let drain = self
            .drain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(drain) = drain {
            if let Err(e) = drain.await {
                warn!("Kafka error drain task failed: {e}");
            }
        }

        match result {
            Ok(()) => {
                info!("Kafka consumer closed");
                Ok(())
            }
            Err(e) => {
                error!("Failed to close Kafka consumer: {e}");
                Err(Error::Kafka(e))
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.is_set()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_set()
    }
}

/// Log every asynchronous broker error until the client closes the channel.
async fn drain_errors(mut errors: mpsc::UnboundedReceiver<BrokerError>) {
    while let Some(e) = errors.recv().await {
        if e.is_request_timeout() {
            warn!(reason = %e.reason, "Kafka request timed out: {}", e.error);
            continue;
        }
        warn!(reason = %e.reason, "Got Kafka consume error: {}", e.error);
    }
    debug!("Kafka error channel closed");
}

/// Routes the records of every claim to the handler of their message type.
///
/// Every record is marked once processed, whatever happened to it: records
/// that cannot be routed or decoded, and records whose handler failed, are
/// not delivered again.
struct Dispatcher {
    handlers: Handlers,
}

#[async_trait]
impl ClaimHandler for Dispatcher {
    async fn consume_claim(&self, session: &dyn GroupSession, claim: &mut Claim) {
        debug!(
            topic = claim.topic(),
            partition = claim.partition(),
            "Consuming claim"
        );
        while let Some(record) = claim.next().await {
            self.handle_record(&record).await;
            session.mark(&record);
        }
    }
}

impl Dispatcher {
    async fn handle_record(&self, record: &Record) {
        let value = record.value.as_deref().unwrap_or_default();

        let Some(message_type) = MessageType::from_topic(&record.topic) else {
            warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "Unexpected topic, skipping record"
            );
            return;
        };

        let Some(handler) = self.handlers.get(&message_type) else {
            warn!(
                message_type = %message_type,
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "No handler registered, skipping record"
            );
            return;
        };

        let payload = match codec::decode(value) {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    message_type = %message_type,
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    value = %String::from_utf8_lossy(value),
                    "Failed to decode message, skipping record: {e}"
                );
                return;
            }
        };

        let message = Message {
            payload,
            metadata: BrokerMetadata {
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset,
                key: record.key.clone(),
                timestamp: record.timestamp,
                log_append_time: record.log_append_time,
            },
        };

        // TODO: route failed messages to a retry topic instead of dropping them
        if let Err(e) = handler.serve_message(&message).await {
            error!(
                message_type = %message_type,
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "Failed to handle Kafka message bus message: {e:#}"
            );
        }
    }
}

/// Delay between failed group sessions: 50ms doubling up to 5s.
#[derive(Debug)]
struct Backoff {
    next: Duration,
}

impl Backoff {
    const INITIAL: Duration = Duration::from_millis(50);
    const MAX: Duration = Duration::from_secs(5);

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(Self::MAX);
        delay
    }

    fn reset(&mut self) {
        self.next = Self::INITIAL;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            next: Self::INITIAL,
        }
    }
}
