use anyhow::Context;
use base64::Engine;
use clap::Args;
use message_bus_kafka::{
    handler_fn, BrokerMetadata, Consumer, ConsumerConfig, Handlers, Message, MessageType,
};
use protobuf::well_known_types::wrappers::StringValue;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Arguments of `message-bus consume`
#[derive(Args, Debug, Clone)]
pub struct ConsumeArgs {
    #[command(flatten)]
    pub config: ConsumerConfig,

    /// Message types to consume (comma-separated or multiple --message-type)
    #[arg(
        long,
        required = true,
        value_delimiter = ',',
        env = "MESSAGE_BUS_MESSAGE_TYPES",
        allow_negative_numbers = true
    )]
    pub message_type: Vec<i64>,
}

/// One consumed message, printed as a JSON line.
#[derive(Debug, Serialize)]
pub struct ConsumedMessage {
    pub message_type: MessageType,
    #[serde(flatten)]
    pub metadata: BrokerMetadata,
    /// Base64 of the protobuf payload
    pub payload: String,
    /// The payload read as a google.protobuf.StringValue, when it is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ConsumedMessage {
    pub fn new(message_type: MessageType, message: &Message) -> Self {
        let text = message
            .decode::<StringValue>()
            .ok()
            .map(|s| s.value)
            .filter(|s| !s.is_empty());
        Self {
            message_type,
            metadata: message.metadata.clone(),
            payload: base64::engine::general_purpose::STANDARD.encode(&message.payload),
            text,
        }
    }
}

fn handlers(message_types: &[i64]) -> Handlers {
    let mut handlers = Handlers::new();
    for &message_type in message_types {
        let message_type = MessageType(message_type);
        handlers.insert(
            message_type,
            handler_fn(move |message: Message| async move {
                let line = serde_json::to_string(&ConsumedMessage::new(message_type, &message))?;
                println!("{line}");
                Ok(())
            }),
        );
    }
    handlers
}

/// Print messages of the requested types until Ctrl-C.
pub async fn run(args: ConsumeArgs) -> anyhow::Result<()> {
    let consumer = Arc::new(Consumer::new(&args.config).context("Failed to create consumer")?);

    let mut running = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        let handlers = handlers(&args.message_type);
        async move { consumer.start_consume(handlers).await }
    });

    let consumed = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Received Ctrl-C, stopping consumer"),
                Err(e) => warn!("Failed to listen for Ctrl-C, stopping consumer: {e}"),
            }
            None
        }
        finished = &mut running => Some(finished),
    };

    if let Err(e) = consumer.close().await {
        warn!("Failed to close consumer: {e}");
    }

    let finished = match consumed {
        Some(finished) => finished,
        None => running.await,
    };
    finished
        .context("Consumer task panicked")?
        .context("Consumer stopped")?;
    Ok(())
}
