//! Wire-level types for the message bus.
//!
//! This crate owns everything that has to agree between a producer and a
//! consumer of the bus: how an application message type maps to a Kafka
//! topic, and how a payload is turned into a record value.
//!
//! # Architecture
//!
//! ```text
//! Produce:  protobuf message → serialize → encode (base64) → record value on "topic_<type>"
//! Consume:  record value → decode (base64) → Message { payload, metadata } → deserialize
//! ```
//!
//! # Modules
//!
//! - [`topic`] - `MessageType` ↔ topic name mapping
//! - [`codec`] - protobuf serialization and base64 framing
//! - [`message`] - decoded message and broker metadata
//! - [`error`] - Error types for encoding and decoding
//!
//! # Examples
//!
//! ```
//! use kafka_types::{codec, MessageType};
//!
//! let message_type = MessageType(7);
//! assert_eq!(message_type.topic(), "topic_7");
//! assert_eq!(MessageType::from_topic("topic_7"), Some(message_type));
//!
//! let framed = codec::encode(b"hello");
//! assert_eq!(codec::decode(&framed).unwrap(), b"hello");
//! ```

pub mod codec;
pub mod error;
pub mod message;
pub mod topic;

// Re-export main types for convenient access
pub use error::{KafkaTypesError, Result};
pub use message::{BrokerMetadata, Message};
pub use topic::{MessageType, TOPIC_PREFIX};
