//! Bus message types.
//!
//! High-level wrapper handed to message handlers: the unframed payload plus
//! read-only metadata describing where the broker stored the record.

use crate::codec;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded bus message with broker metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unframed application payload
    pub payload: Vec<u8>,
    /// Where the broker stored the record
    pub metadata: BrokerMetadata,
}

/// Kafka-specific metadata, populated only on the consume path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMetadata {
    /// Kafka topic name
    pub topic: String,
    /// Kafka partition number
    pub partition: i32,
    /// Kafka offset within the partition
    pub offset: i64,
    /// Partition key (if any)
    pub key: Option<Vec<u8>>,
    /// Create time set by the producer (if available)
    pub timestamp: Option<DateTime<Utc>>,
    /// Append time assigned by the broker (if the topic uses log-append time)
    pub log_append_time: Option<DateTime<Utc>>,
}

impl Message {
    /// Deserialize the payload into a protobuf message.
    pub fn decode<M: protobuf::Message>(&self) -> Result<M> {
        codec::deserialize(&self.payload)
    }

    pub fn topic(&self) -> &str {
        &self.metadata.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protobuf::well_known_types::wrappers::StringValue;

    fn metadata() -> BrokerMetadata {
        BrokerMetadata {
            topic: "topic_7".to_string(),
            partition: 2,
            offset: 41,
            key: Some(b"user_001".to_vec()),
            timestamp: DateTime::from_timestamp(1_234_567_890, 0),
            log_append_time: None,
        }
    }

    #[test]
    fn test_decode_payload() {
        let mut value = StringValue::new();
        value.value = "hello".to_string();

        let message = Message {
            payload: codec::serialize(&value).unwrap(),
            metadata: metadata(),
        };
        let decoded: StringValue = message.decode().unwrap();
        assert_eq!(decoded.value, "hello");
        assert_eq!(message.topic(), "topic_7");
    }

    #[test]
    fn test_metadata_json() {
        let json = serde_json::to_value(metadata()).unwrap();
        assert_eq!(json["topic"], "topic_7");
        assert_eq!(json["partition"], 2);
        assert_eq!(json["offset"], 41);
        assert_eq!(json["timestamp"], "2009-02-13T23:31:30Z");
        assert!(json["log_append_time"].is_null());
    }
}
