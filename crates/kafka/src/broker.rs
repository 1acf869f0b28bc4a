//! Broker seam.
//!
//! The producer and consumer engines talk to the broker only through the
//! traits in this module. [`crate::client`] implements them on top of
//! librdkafka; [`crate::testing`] implements them in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A record as fetched from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    /// Raw record value, still framed
    pub value: Option<Vec<u8>>,
    pub timestamp: Option<DateTime<Utc>>,
    pub log_append_time: Option<DateTime<Utc>>,
}

/// A record about to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<String>,
    /// Framed record value
    pub value: Vec<u8>,
}

/// Where the broker stored a published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// An asynchronous error reported by the broker client outside of any call.
#[derive(Debug, Clone)]
pub struct BrokerError {
    pub error: KafkaError,
    pub reason: String,
}

impl BrokerError {
    pub fn new(error: KafkaError, reason: impl Into<String>) -> Self {
        Self {
            error,
            reason: reason.into(),
        }
    }

    pub fn is_request_timeout(&self) -> bool {
        matches!(
            self.error.rdkafka_error_code(),
            Some(RDKafkaErrorCode::RequestTimedOut) | Some(RDKafkaErrorCode::OperationTimedOut)
        )
    }
}

/// Publishing side of the broker client.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Publish a record and wait for the partition leader to acknowledge it.
    async fn send(&self, record: OutboundRecord) -> Result<Delivery, KafkaError>;

    /// Flush and release the client. Called at most once.
    fn close(&self) -> Result<(), KafkaError>;
}

/// Consumer group membership of the broker client.
#[async_trait]
pub trait ConsumerGroup: Send + Sync {
    /// Join the group for `topics` and run one session.
    ///
    /// Every assigned partition is handed to `handler` as a [`Claim`]. Returns
    /// `Ok(())` once `shutdown` fires, or the error that ended the session.
    async fn consume(
        &self,
        topics: &[String],
        handler: Arc<dyn ClaimHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), KafkaError>;

    /// Leave the group and release the client. Called at most once.
    ///
    /// Dropping the client closes the broker error channel.
    fn close(&self) -> Result<(), KafkaError>;
}

/// The state of one group session.
pub trait GroupSession: Send + Sync {
    /// Mark `record` as consumed; its offset is committed with the next commit.
    fn mark(&self, record: &Record);
}

/// Callbacks driven by a [`ConsumerGroup`] session.
#[async_trait]
pub trait ClaimHandler: Send + Sync {
    /// Runs once a session has joined the group, before any claim.
    async fn setup(&self, _session: &dyn GroupSession) {}

    /// Runs once all claims of a session have finished.
    async fn cleanup(&self, _session: &dyn GroupSession) {}

    /// Process every record of one partition claim, in offset order.
    async fn consume_claim(&self, session: &dyn GroupSession, claim: &mut Claim);
}

/// The records of one partition currently assigned to this consumer.
#[derive(Debug)]
pub struct Claim {
    topic: String,
    partition: i32,
    records: mpsc::Receiver<Record>,
}

impl Claim {
    pub fn new(topic: impl Into<String>, partition: i32, records: mpsc::Receiver<Record>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            records,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Next record of the claim, or `None` once the session stops feeding it.
    pub async fn next(&mut self) -> Option<Record> {
        self.records.recv().await
    }
}

/// Fans the records of a session out to one claim task per partition.
///
/// Shared by every [`ConsumerGroup`] implementation: records of the same
/// (topic, partition) go through one bounded channel to one task, so they are
/// handled in offset order while partitions progress independently.
pub struct ClaimRouter {
    handler: Arc<dyn ClaimHandler>,
    session: Arc<dyn GroupSession>,
    buffer_size: usize,
    claims: HashMap<(String, i32), mpsc::Sender<Record>>,
    tasks: JoinSet<()>,
}

impl ClaimRouter {
    pub fn new(
        handler: Arc<dyn ClaimHandler>,
        session: Arc<dyn GroupSession>,
        buffer_size: usize,
    ) -> Self {
        Self {
            handler,
            session,
            buffer_size: buffer_size.max(1),
            claims: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Number of claims currently fed by the router.
    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    /// Hand `record` to the claim of its partition, starting the claim task
    /// on first use. Waits while the claim's channel is full.
    ///
    /// Returns `false` if the claim task had already stopped; the record is
    /// left unmarked and the next record of that partition starts a new claim.
    pub async fn route(&mut self, record: Record) -> bool {
        let sender = self
            .claims
            .entry((record.topic.clone(), record.partition))
            .or_insert_with_key(|(topic, partition)| {
                debug!("Starting claim for {topic}/{partition}");
                let (tx, rx) = mpsc::channel(self.buffer_size);
                let mut claim = Claim::new(topic.clone(), *partition, rx);
                let handler = Arc::clone(&self.handler);
                let session = Arc::clone(&self.session);
                self.tasks.spawn(async move {
                    handler.consume_claim(session.as_ref(), &mut claim).await;
                });
                tx
            });

        let sent = sender.send(record).await;
        match sent {
            Ok(()) => true,
            Err(mpsc::error::SendError(record)) => {
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "Claim stopped before the record could be delivered"
                );
                self.claims.remove(&(record.topic, record.partition));
                false
            }
        }
    }

    /// Stop feeding the claims and wait until every claim task has handled
    /// what it already received.
    pub async fn finish(mut self) {
        self.claims.clear();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Claim task failed: {e}");
            }
        }
    }
}
