//! Message type to topic mapping.
//!
//! Every message type owns exactly one topic, named `topic_<decimal type>`.
//! Topics that do not follow this pattern are not owned by the bus.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix shared by every topic the bus produces to or consumes from.
pub const TOPIC_PREFIX: &str = "topic_";

/// Application-level message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(pub i64);

impl MessageType {
    /// Topic name carrying messages of this type.
    pub fn topic(self) -> String {
        format!("{TOPIC_PREFIX}{}", self.0)
    }

    /// Resolve the message type owning `topic`.
    ///
    /// Returns `None` when the topic lacks the prefix or the suffix is not a
    /// signed 64-bit decimal integer.
    pub fn from_topic(topic: &str) -> Option<Self> {
        let suffix = topic.strip_prefix(TOPIC_PREFIX)?;
        suffix.parse::<i64>().ok().map(MessageType)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageType {
    fn from(value: i64) -> Self {
        MessageType(value)
    }
}
