//! Producer and consumer configuration.
//!
//! Both configs can be built from CLI flags / environment variables (clap) or
//! deserialized from a config file (serde). Validation happens when the
//! producer or consumer is constructed.

use crate::error::{Error, Result};
use crate::version::KafkaVersion;
use clap::{Args, Parser};
use rdkafka::config::ClientConfig;
use serde::Deserialize;
use tracing::warn;

/// Client id used when none is configured.
pub const DEFAULT_CLIENT_ID: &str = "message-bus";

/// Per-claim channel capacity used when none is configured.
pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 256;

/// Connection settings shared by producers and consumers.
#[derive(Debug, Clone, Args, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[clap(long, value_delimiter = ',', required = true, env = "MESSAGE_BUS_BROKERS")]
    pub brokers: Vec<String>,
    /// Kafka protocol version of the brokers, e.g. "2.2.0" or "0.10.2.0"
    ///
    /// Defaults to 2.2.0. Versions older than 0.10.2.0 are rejected.
    #[clap(long, env = "MESSAGE_BUS_KAFKA_VERSION")]
    pub kafka_version: Option<String>,
    /// Client identifier reported to the brokers
    #[clap(long, env = "MESSAGE_BUS_CLIENT_ID")]
    pub client_id: Option<String>,
    /// SASL/PLAIN username; enables SASL authentication when set
    #[clap(long, env = "MESSAGE_BUS_USERNAME")]
    pub username: Option<String>,
    /// SASL/PLAIN password
    #[clap(long, env = "MESSAGE_BUS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            kafka_version: None,
            client_id: None,
            username: None,
            password: None,
        }
    }
}

impl ConnectionConfig {
    /// Check the connection settings and resolve the protocol version.
    pub fn validate(&self) -> Result<KafkaVersion> {
        if self.brokers().is_empty() {
            return Err(Error::InvalidConfig("empty brokers".to_string()));
        }
        if self.username().is_none() && self.password.as_deref().is_some_and(|p| !p.is_empty()) {
            warn!("Kafka password configured without username, SASL stays disabled");
        }
        KafkaVersion::resolve(self.kafka_version.as_deref())
    }

    /// Broker addresses with blanks removed.
    pub fn brokers(&self) -> Vec<&str> {
        self.brokers
            .iter()
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .collect()
    }

    pub fn client_id(&self) -> &str {
        match self.client_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => DEFAULT_CLIENT_ID,
        }
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }

    /// librdkafka settings common to producers and consumers.
    pub fn client_config(&self, version: KafkaVersion) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.brokers().join(","))
            .set("client.id", self.client_id())
            .set("api.version.request", "true")
            .set("broker.version.fallback", version.to_string())
            .set("socket.keepalive.enable", "true");

        if let Some(username) = self.username() {
            config
                .set("security.protocol", "SASL_PLAINTEXT")
                .set("sasl.mechanism", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", self.password.as_deref().unwrap_or_default());
        }

        config
    }
}

/// Configuration for the bus producer
#[derive(Debug, Clone, Default, Parser, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    #[clap(flatten)]
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    /// Do not log every successfully sent message
    #[clap(long, env = "MESSAGE_BUS_DISABLE_LOG_MESSAGE")]
    pub disable_log_message: bool,
}

impl ProducerConfig {
    /// Validate the configuration and build the librdkafka producer settings.
    ///
    /// Messages are acknowledged by the partition leader only and compressed
    /// with snappy in flight.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let version = self.connection.validate()?;
        let mut config = self.connection.client_config(version);
        config
            .set("acks", "1")
            .set("compression.type", "snappy");
        Ok(config)
    }
}

/// Configuration for the bus consumer
#[derive(Debug, Clone, Parser, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    #[clap(flatten)]
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    /// Consumer group ID
    #[clap(long, env = "MESSAGE_BUS_GROUP_ID")]
    pub group_id: String,
    /// Start from the oldest available offset when the group has no committed offset
    ///
    /// Without this flag a new group starts from the newest offset.
    #[clap(long, env = "MESSAGE_BUS_FROM_OLDEST")]
    pub from_oldest: bool,
    /// Capacity of the per-partition channel feeding message handlers
    #[clap(long, env = "MESSAGE_BUS_CHANNEL_BUFFER_SIZE")]
    pub channel_buffer_size: Option<usize>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            group_id: String::new(),
            from_oldest: false,
            channel_buffer_size: None,
        }
    }
}

impl ConsumerConfig {
    /// Validate the configuration and build the librdkafka consumer settings.
    ///
    /// Offsets are stored explicitly once a record has been handled and
    /// auto-committed every second.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let version = self.connection.validate()?;
        if self.group_id.trim().is_empty() {
            return Err(Error::InvalidConfig("empty group".to_string()));
        }

        let mut config = self.connection.client_config(version);
        config
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "1000")
            .set("enable.auto.offset.store", "false")
            .set("fetch.wait.max.ms", "500")
            .set(
                "auto.offset.reset",
                if self.from_oldest { "earliest" } else { "latest" },
            )
            .set("enable.partition.eof", "false");
        Ok(config)
    }

    pub fn channel_buffer_size(&self) -> usize {
        match self.channel_buffer_size {
            Some(size) if size > 0 => size,
            _ => DEFAULT_CHANNEL_BUFFER_SIZE,
        }
    }
}
