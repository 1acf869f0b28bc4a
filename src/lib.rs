//! Message bus command-line tools
//!
//! Thin commands on top of `message_bus_kafka` for poking at a running bus:
//! publish a message by hand, or tail the messages of some types.
//!
//! # CLI Usage
//!
//! ```bash
//! # Send a StringValue to topic_7, routed by key
//! message-bus produce --brokers localhost:9092 --message-type 7 \
//!   --key user_001 --text "hello"
//!
//! # Send raw protobuf bytes read from stdin
//! message-bus produce --brokers localhost:9092 --message-type 7 --raw < payload.bin
//!
//! # Print every message of types 7 and 8 as JSON lines until Ctrl-C
//! message-bus consume --brokers localhost:9092 --group-id debug \
//!   --message-type 7,8 --from-oldest
//! ```

pub mod consume;
pub mod produce;

pub use consume::{ConsumeArgs, ConsumedMessage};
pub use produce::ProduceArgs;
