//! In-memory broker for exercising producers and consumers without Kafka.
//!
//! Used by the unit tests and by the integration tests under `tests/`, so it
//! is not gated behind `#[cfg(test)]`.
//!
//! The broker keeps every topic as a fixed number of partitions, each a
//! vector of records. Consumer groups remember the offsets their sessions
//! marked and start from them (or from the beginning) on the next session.

use crate::broker::{
    BrokerError, BrokerProducer, ClaimHandler, ClaimRouter, ConsumerGroup, Delivery,
    GroupSession, OutboundRecord, Record,
};
use async_trait::async_trait;
use chrono::Utc;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

const CLAIM_BUFFER_SIZE: usize = 16;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct State {
    topics: HashMap<String, Vec<Vec<Record>>>,
    /// Next offset to consume, per (group, topic, partition)
    committed: HashMap<(String, String, i32), i64>,
    round_robin: usize,
}

struct Shared {
    partitions: i32,
    state: Mutex<State>,
    appended: Notify,
}

/// Shared in-memory log. Cloning yields another handle to the same log.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// A broker creating single-partition topics.
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// A broker creating topics with `partitions` partitions.
    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            shared: Arc::new(Shared {
                partitions: partitions.max(1),
                state: Mutex::new(State::default()),
                appended: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// A producer client publishing to this broker.
    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer {
            broker: self.clone(),
            stats: Arc::new(ProducerStats::default()),
        }
    }

    /// A consumer group client plus its asynchronous error channel.
    pub fn consumer_group(
        &self,
        group_id: &str,
    ) -> (MemoryConsumerGroup, mpsc::UnboundedReceiver<BrokerError>) {
        let (errors, receiver) = mpsc::unbounded_channel();
        let group = MemoryConsumerGroup {
            broker: self.clone(),
            group_id: group_id.to_string(),
            shared: Arc::new(GroupShared {
                errors: Mutex::new(Some(errors)),
                closed: Default::default(),
                closes: AtomicUsize::new(0),
                sessions: AtomicUsize::new(0),
                session_failures: Mutex::new(VecDeque::new()),
            }),
        };
        (group, receiver)
    }

    /// Append a record with an arbitrary value, bypassing any framing.
    ///
    /// Returns the partition and offset of the new record.
    pub fn append(&self, topic: &str, key: Option<&[u8]>, value: &[u8]) -> (i32, i64) {
        let stored = {
            let mut state = self.state();
            let partition = match key {
                Some(key) => {
                    let mut hasher = DefaultHasher::new();
                    key.hash(&mut hasher);
                    (hasher.finish() % self.shared.partitions as u64) as i32
                }
                None => {
                    state.round_robin += 1;
                    (state.round_robin % self.shared.partitions as usize) as i32
                }
            };

            let partitions = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.shared.partitions as usize]);
            let log = &mut partitions[partition as usize];
            let offset = log.len() as i64;
            log.push(Record {
                topic: topic.to_string(),
                partition,
                offset,
                key: key.map(|k| k.to_vec()),
                value: Some(value.to_vec()),
                timestamp: Some(Utc::now()),
                log_append_time: None,
            });
            (partition, offset)
        };
        self.shared.appended.notify_waiters();
        stored
    }

    /// All records of `topic`, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<Record> {
        self.state()
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// The next offset `group` will consume from `topic`/`partition`, if it
    /// marked anything there.
    pub fn committed(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Records of `topics` not yet handed to the session, advancing `positions`.
    fn fetch(
        &self,
        group: &str,
        topics: &[String],
        positions: &mut HashMap<(String, i32), i64>,
    ) -> Vec<Record> {
        let state = self.state();
        let mut fetched = Vec::new();
        for topic in topics {
            let Some(partitions) = state.topics.get(topic) else {
                continue;
            };
            for (partition, log) in partitions.iter().enumerate() {
                let partition = partition as i32;
                let position = positions
                    .entry((topic.clone(), partition))
                    .or_insert_with(|| {
                        state
                            .committed
                            .get(&(group.to_string(), topic.clone(), partition))
                            .copied()
                            .unwrap_or(0)
                    });
                let start = (*position).max(0) as usize;
                if start < log.len() {
                    fetched.extend_from_slice(&log[start..]);
                    *position = log.len() as i64;
                }
            }
        }
        fetched
    }

    fn mark(&self, group: &str, record: &Record) {
        let mut state = self.state();
        let next = state
            .committed
            .entry((group.to_string(), record.topic.clone(), record.partition))
            .or_insert(0);
        *next = (*next).max(record.offset + 1);
    }
}

#[derive(Default)]
struct ProducerStats {
    sends: AtomicUsize,
    closes: AtomicUsize,
    failures: Mutex<VecDeque<KafkaError>>,
}

/// Producer client of a [`MemoryBroker`]. Clones share their counters.
#[derive(Clone)]
pub struct MemoryProducer {
    broker: MemoryBroker,
    stats: Arc<ProducerStats>,
}

impl MemoryProducer {
    /// Number of records that reached the broker, failed ones included.
    pub fn send_count(&self) -> usize {
        self.stats.sends.load(Ordering::SeqCst)
    }

    /// Number of times the client was closed.
    pub fn close_count(&self) -> usize {
        self.stats.closes.load(Ordering::SeqCst)
    }

    /// Make the next send fail with `error`.
    pub fn fail_next_send(&self, error: KafkaError) {
        self.stats
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }
}

#[async_trait]
impl BrokerProducer for MemoryProducer {
    async fn send(&self, record: OutboundRecord) -> Result<Delivery, KafkaError> {
        self.stats.sends.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .stats
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let (partition, offset) = self.broker.append(
            &record.topic,
            record.key.as_deref().map(str::as_bytes),
            &record.value,
        );
        Ok(Delivery {
            partition,
            offset,
            timestamp: Some(Utc::now()),
        })
    }

    fn close(&self) -> Result<(), KafkaError> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct GroupShared {
    errors: Mutex<Option<mpsc::UnboundedSender<BrokerError>>>,
    closed: CancellationToken,
    closes: AtomicUsize,
    sessions: AtomicUsize,
    session_failures: Mutex<VecDeque<KafkaError>>,
}

/// Consumer group client of a [`MemoryBroker`]. Clones share their state.
#[derive(Clone)]
pub struct MemoryConsumerGroup {
    broker: MemoryBroker,
    group_id: String,
    shared: Arc<GroupShared>,
}

impl MemoryConsumerGroup {
    /// Number of times the client was closed.
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Number of sessions started, failed ones included.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.load(Ordering::SeqCst)
    }

    /// Make the next session fail right away with `error`.
    pub fn fail_next_session(&self, error: KafkaError) {
        self.shared
            .session_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Report an asynchronous client error. Returns `false` once the client
    /// has been closed.
    pub fn report_error(&self, error: BrokerError) -> bool {
        self.shared
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|errors| errors.send(error).is_ok())
    }
}

#[async_trait]
impl ConsumerGroup for MemoryConsumerGroup {
    async fn consume(
        &self,
        topics: &[String],
        handler: Arc<dyn ClaimHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), KafkaError> {
        self.shared.sessions.fetch_add(1, Ordering::SeqCst);
        if self.shared.closed.is_cancelled() {
            return Err(KafkaError::Global(RDKafkaErrorCode::BrokerDestroy));
        }
        let failure = self
            .shared
            .session_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let session: Arc<dyn GroupSession> = Arc::new(MemorySession {
            broker: self.broker.clone(),
            group_id: self.group_id.clone(),
        });
        handler.setup(session.as_ref()).await;

        let mut positions = HashMap::new();
        let mut router = ClaimRouter::new(
            Arc::clone(&handler),
            Arc::clone(&session),
            CLAIM_BUFFER_SIZE,
        );

        'session: loop {
            let appended = self.broker.shared.appended.notified();

            for record in self.broker.fetch(&self.group_id, topics, &mut positions) {
                tokio::select! {
                    _ = shutdown.cancelled() => break 'session,
                    _ = router.route(record) => {}
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break 'session,
                _ = appended => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }

        router.finish().await;
        handler.cleanup(session.as_ref()).await;
        Ok(())
    }

    fn close(&self) -> Result<(), KafkaError> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        self.shared.closed.cancel();
        // Dropping the sender ends the consumer's error drain
        self.shared
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

struct MemorySession {
    broker: MemoryBroker,
    group_id: String,
}

impl GroupSession for MemorySession {
    fn mark(&self, record: &Record) {
        self.broker.mark(&self.group_id, record);
    }
}
