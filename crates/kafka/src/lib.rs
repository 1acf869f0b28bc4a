//! Typed message bus on top of Kafka.
//!
//! Applications publish protobuf messages under a numeric [`MessageType`]
//! and consume them through per-type handlers, without dealing with topics,
//! partitions or record framing.
//!
//! Features:
//!
//! - Topic per message type: type `7` lives on topic `topic_7`
//! - Synchronous sends acknowledged by the partition leader, snappy-compressed
//! - Consumer groups with one claim task per assigned partition
//! - Forward progress: a record is committed once processed, whether or not
//!   its handler succeeded
//! - Idempotent, leak-free shutdown of producers and consumers
//!
//! ```no_run
//! use message_bus_kafka::{handler_fn, Consumer, ConsumerConfig, Handlers, MessageType};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ConsumerConfig {
//!     group_id: "g1".to_string(),
//!     ..Default::default()
//! };
//! let consumer = Arc::new(Consumer::new(&config)?);
//!
//! let mut handlers = Handlers::new();
//! handlers.insert(
//!     MessageType(7),
//!     handler_fn(|message| async move {
//!         println!("{} bytes from {}", message.payload.len(), message.topic());
//!         Ok(())
//!     }),
//! );
//!
//! let running = tokio::spawn({
//!     let consumer = Arc::clone(&consumer);
//!     async move { consumer.start_consume(handlers).await }
//! });
//!
//! tokio::signal::ctrl_c().await?;
//! consumer.close().await?;
//! running.await??;
//! # Ok(())
//! # }
//! ```

/// Seam between the engines and the broker client
pub mod broker;

/// librdkafka implementations of the broker seam
pub mod client;
pub mod config;

/// Consumer engine: claim loop, error drain, lifecycle
pub mod consumer;
pub mod error;
pub mod handler;
pub mod lifecycle;

/// Producer engine: send path, lifecycle
pub mod producer;

// used in "mod tests" and the tests/ directory (integration tests)
// so not exported as `#[cfg(test)]`
pub mod testing;
pub mod version;

// Re-export from kafka-types for convenience
pub use kafka_types::{codec, BrokerMetadata, Message, MessageType, TOPIC_PREFIX};

pub use broker::{BrokerError, Delivery};
pub use config::{ConnectionConfig, ConsumerConfig, ProducerConfig};
pub use consumer::Consumer;
pub use error::{Error, Result};
pub use handler::{handler_fn, Handlers, MessageHandler};
pub use producer::{Producer, SendOption, SendOptions};
pub use version::KafkaVersion;
