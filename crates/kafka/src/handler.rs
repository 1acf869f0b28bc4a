use async_trait::async_trait;
use kafka_types::{Message, MessageType};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Application callback for messages of one [`MessageType`].
///
/// An error is logged and the message is still treated as consumed: Kafka
/// will not deliver it again to the same consumer group.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn serve_message(&self, message: &Message) -> anyhow::Result<()>;
}

/// Handlers of a consumer, keyed by the message type they serve.
pub type Handlers = HashMap<MessageType, Arc<dyn MessageHandler>>;

/// Handler backed by an async closure, see [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Wrap an async closure taking an owned [`Message`] into a handler.
///
/// ```
/// use message_bus_kafka::{handler_fn, Handlers};
/// use kafka_types::MessageType;
///
/// let mut handlers = Handlers::new();
/// handlers.insert(
///     MessageType(7),
///     handler_fn(|message| async move {
///         tracing::info!("got {} bytes", message.payload.len());
///         Ok(())
///     }),
/// );
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn serve_message(&self, message: &Message) -> anyhow::Result<()> {
        (self.0)(message.clone()).await
    }
}
