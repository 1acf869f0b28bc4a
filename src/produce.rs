use anyhow::Context;
use clap::Args;
use message_bus_kafka::{Delivery, MessageType, Producer, ProducerConfig, SendOption};
use protobuf::well_known_types::wrappers::StringValue;
use serde::Serialize;
use tokio::io::AsyncReadExt;

/// Arguments of `message-bus produce`
#[derive(Args, Debug, Clone)]
pub struct ProduceArgs {
    #[command(flatten)]
    pub config: ProducerConfig,

    /// Message type to publish; the message goes to topic `topic_<N>`
    #[arg(long, env = "MESSAGE_BUS_MESSAGE_TYPE", allow_negative_numbers = true)]
    pub message_type: i64,

    /// Partition key; messages sharing a key land on the same partition
    #[arg(long, env = "MESSAGE_BUS_KEY")]
    pub key: Option<String>,

    /// Text of the google.protobuf.StringValue to send
    #[arg(long, conflicts_with = "raw")]
    pub text: Option<String>,

    /// Send the already serialized payload read from stdin
    #[arg(long)]
    pub raw: bool,
}

/// Summary printed once the broker acknowledged the message.
#[derive(Debug, Serialize)]
struct Sent {
    topic: String,
    partition: i32,
    offset: i64,
}

impl ProduceArgs {
    fn options(&self) -> Vec<SendOption> {
        self.key
            .iter()
            .map(|key| SendOption::partition_key(key.as_str()))
            .collect()
    }

    async fn send(&self, producer: &Producer) -> anyhow::Result<Delivery> {
        let message_type = MessageType(self.message_type);
        let options = self.options();

        if self.raw {
            let mut payload = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut payload)
                .await
                .context("Failed to read the payload from stdin")?;
            return Ok(producer
                .send_bytes(message_type, &payload, &options)
                .await?);
        }

        let mut message = StringValue::new();
        message.value = self.text.clone().unwrap_or_default();
        Ok(producer.send(message_type, &message, &options).await?)
    }
}

/// Publish one message and print where it landed.
pub async fn run(args: ProduceArgs) -> anyhow::Result<()> {
    let producer = Producer::new(&args.config).context("Failed to create producer")?;

    let sent = args.send(&producer).await;
    producer.close().context("Failed to close producer")?;
    let delivery = sent.context("Failed to send message")?;

    let sent = Sent {
        topic: MessageType(args.message_type).topic(),
        partition: delivery.partition,
        offset: delivery.offset,
    };
    println!("{}", serde_json::to_string(&sent)?);
    Ok(())
}
