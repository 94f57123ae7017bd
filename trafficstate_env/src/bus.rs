//! Source and sink abstraction for the publish-subscribe bus.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{MessageEnvelope, TopicName};

/// The ingestion side of the bus.
///
/// # Implementations
///
/// - **Production**: wraps a broker consumer subscribed to the raw topic
/// - **Simulation/tests**: [`ChannelSource`](crate::ChannelSource)
///
/// # Ordering
///
/// Envelopes are ordered per partition only. Event times inside payloads
/// may arrive globally out of order; tolerating that is the engine's job.
#[async_trait]
pub trait MessageSource: Send + Sync + 'static {
    /// Receives the next envelope.
    ///
    /// # Returns
    /// * `Some(envelope)` - A message was received
    /// * `None` - The source is exhausted or was shut down
    ///
    /// # Blocking
    /// This is the only suspension point of the streaming engine.
    async fn recv(&self) -> Option<MessageEnvelope>;
}

/// The publishing side of the bus.
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    /// Publishes a keyed envelope to a topic.
    ///
    /// # Returns
    /// * `Ok(())` - Envelope accepted by the bus
    /// * `Err(EnvError::SinkError)` - Immediate publish failure
    ///
    /// # Note
    /// Retries belong to the sink implementation, never to the caller.
    async fn publish(&self, topic: &TopicName, envelope: MessageEnvelope) -> Result<(), EnvError>;
}
