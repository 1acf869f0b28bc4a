//! Error types for kafka-types crate.

use thiserror::Error;

/// Errors that can occur while encoding or decoding bus payloads.
#[derive(Error, Debug)]
pub enum KafkaTypesError {
    #[error("Protobuf encoding error: {0}")]
    ProtobufEncode(String),

    #[error("Protobuf decoding error: {0}")]
    ProtobufDecode(String),

    #[error("Invalid base64 frame: {0}")]
    Frame(#[from] base64::DecodeError),
}

/// Result type alias for kafka-types operations.
pub type Result<T> = std::result::Result<T, KafkaTypesError>;
