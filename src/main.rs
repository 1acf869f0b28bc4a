//! Command-line interface for message-bus
//!
//! # Usage Examples
//!
//! ```bash
//! # Publish a StringValue of type 7
//! message-bus produce --brokers localhost:9092 --message-type 7 --text hello
//!
//! # Tail types 7 and 8 from the oldest offset
//! message-bus consume --brokers localhost:9092 --group-id debug \
//!   --message-type 7,8 --from-oldest
//! ```
//!
//! Every flag can also be set through its `MESSAGE_BUS_*` environment
//! variable. Logs go to stderr and are filtered with `RUST_LOG`.

use clap::{Parser, Subcommand};
use message_bus::{consume, produce, ConsumeArgs, ProduceArgs};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "message_bus=info,message_bus_kafka=info";

#[derive(Parser)]
#[command(name = "message-bus")]
#[command(about = "Publish and consume typed protobuf messages over Kafka")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one message and print its partition and offset
    Produce(ProduceArgs),

    /// Print consumed messages as JSON lines until Ctrl-C
    Consume(ConsumeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Produce(args) => produce::run(args).await,
        Commands::Consume(args) => consume::run(args).await,
    }
}
