use kafka_types::KafkaTypesError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Codec error: {0}")]
    Codec(#[from] KafkaTypesError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid Kafka version: {0}")]
    InvalidVersion(String),

    #[error("Kafka version {version} is not supported, at least {minimum} is required")]
    UnsupportedVersion { version: String, minimum: String },

    #[error("No message handlers registered")]
    EmptyHandlers,

    #[error("The consumer has already been started")]
    AlreadyStarted,

    #[error("Already closed")]
    AlreadyClosed,
}

impl Error {
    /// Configuration errors are returned synchronously and never retried.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_)
                | Error::InvalidVersion(_)
                | Error::UnsupportedVersion { .. }
                | Error::EmptyHandlers
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
