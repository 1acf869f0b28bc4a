use crate::broker::{BrokerProducer, Delivery, OutboundRecord};
use crate::client::KafkaProducer;
use crate::config::ProducerConfig;
use crate::error::{Error, Result};
use crate::lifecycle::OnceFlag;
use base64::Engine;
use kafka_types::{codec, MessageType};
use protobuf::MessageFull;
use tracing::{error, info};

const TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// Modifier applied to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOption {
    /// Route the message by this key, so that messages sharing a key land on
    /// the same partition
    PartitionKey(String),
}

impl SendOption {
    pub fn partition_key(key: impl Into<String>) -> Self {
        SendOption::PartitionKey(key.into())
    }

    fn apply(&self, options: &mut SendOptions) {
        match self {
            SendOption::PartitionKey(key) if !key.is_empty() => {
                options.partition_key = Some(key.clone());
            }
            SendOption::PartitionKey(_) => {}
        }
    }
}

/// The result of folding a list of [`SendOption`]s, later options winning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub partition_key: Option<String>,
}

impl SendOptions {
    pub fn from_options(options: &[SendOption]) -> Self {
        let mut folded = SendOptions::default();
        for option in options {
            option.apply(&mut folded);
        }
        folded
    }
}

/// Publishes typed messages to the bus.
///
/// Every message of type `T` goes to topic `topic_T`, base64-framed. Sends are
/// synchronous: they return once the partition leader has acknowledged the
/// record.
///
/// NOTE: call [`Producer::close`] when done, otherwise queued messages may be
/// lost.
pub struct Producer {
    broker: Box<dyn BrokerProducer>,
    log_message: bool,
    closed: OnceFlag,
}

impl Producer {
    /// Create a producer connected to the brokers in `config`.
    pub fn new(config: &ProducerConfig) -> Result<Self> {
        let broker = KafkaProducer::new(config)?;
        Ok(Self::with_broker(broker, !config.disable_log_message))
    }

    /// Create a producer on top of an existing broker client.
    pub fn with_broker(broker: impl BrokerProducer + 'static, log_message: bool) -> Self {
        Self {
            broker: Box::new(broker),
            log_message,
            closed: OnceFlag::new(),
        }
    }

    /// Send a protobuf message.
    ///
    /// The message is serialized even if only partially populated.
    pub async fn send<M: MessageFull>(
        &self,
        message_type: MessageType,
        message: &M,
        options: &[SendOption],
    ) -> Result<Delivery> {
        if self.closed.is_set() {
            return Err(Error::AlreadyClosed);
        }
        let payload = codec::serialize(message)?;
        self.publish(message_type, &payload, options, || {
            protobuf::text_format::print_to_string(message)
        })
        .await
    }

    /// Send an already serialized payload.
    pub async fn send_bytes(
        &self,
        message_type: MessageType,
        payload: &[u8],
        options: &[SendOption],
    ) -> Result<Delivery> {
        if self.closed.is_set() {
            return Err(Error::AlreadyClosed);
        }
        self.publish(message_type, payload, options, || {
            base64::engine::general_purpose::STANDARD.encode(payload)
        })
        .await
    }

    async fn publish<D>(
        &self,
        message_type: MessageType,
        payload: &[u8],
        options: &[SendOption],
        describe: D,
    ) -> Result<Delivery>
    where
        D: FnOnce() -> String,
    {
        let topic = message_type.topic();
        let key = SendOptions::from_options(options).partition_key;

        let record = OutboundRecord {
            topic: topic.clone(),
            key: key.clone(),
            value: codec::encode(payload),
        };

        let delivery = match self.broker.send(record).await {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(
                    message_type = %message_type,
                    message = %describe(),
                    key = key.as_deref().unwrap_or_default(),
                    topic = %topic,
                    "Failed to send message to Kafka message bus: {e}"
                );
                return Err(Error::Kafka(e));
            }
        };

        if self.log_message {
            info!(
                message_type = %message_type,
                message = %describe(),
                key = key.as_deref().unwrap_or_default(),
                topic = %topic,
                partition = delivery.partition,
                offset = delivery.offset,
                timestamp = ?delivery.timestamp.map(|t| t.format(TIME_LAYOUT).to_string()),
                "Sent message to Kafka message bus"
            );
        }

        Ok(delivery)
    }

    /// Flush and release the broker client.
    ///
    /// Only the first call talks to the broker; later calls fail with
    /// [`Error::AlreadyClosed`].
    pub fn close(&self) -> Result<()> {
        if !self.closed.try_set() {
            return Err(Error::AlreadyClosed);
        }
        self.broker.close().map_err(|e| {
            error!("Failed to close Kafka producer: {e}");
            Error::Kafka(e)
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_set()
    }
}
