//! In-process implementation of the bus traits using Tokio channels.

use crate::bus::{MessageSink, MessageSource};
use crate::error::EnvError;
use crate::types::{MessageEnvelope, TopicName};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Creates a connected producer/source pair with the given buffer capacity.
///
/// Dropping every producer closes the source, which the streaming runtime
/// treats as shutdown.
pub fn channel_bus(capacity: usize) -> (ChannelProducer, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        ChannelProducer {
            tx,
            next_offset: Arc::new(AtomicU64::new(0)),
        },
        ChannelSource {
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        },
    )
}

/// Writer half of [`channel_bus`]. Assigns monotonically increasing offsets.
#[derive(Clone)]
pub struct ChannelProducer {
    tx: mpsc::Sender<MessageEnvelope>,
    next_offset: Arc<AtomicU64>,
}

impl ChannelProducer {
    /// Sends a payload, returning the offset it was assigned.
    pub async fn send(&self, payload: Vec<u8>) -> Result<u64, EnvError> {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(MessageEnvelope::new(payload, offset))
            .await
            .map_err(|_| EnvError::SourceClosed("receiver dropped".to_string()))?;
        Ok(offset)
    }
}

/// Reader half of [`channel_bus`].
pub struct ChannelSource {
    /// Receiver behind a tokio mutex so `recv` can take `&self`
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<MessageEnvelope>>>,
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn recv(&self) -> Option<MessageEnvelope> {
        self.rx.lock().await.recv().await
    }
}

/// Sink forwarding every published envelope into an mpsc channel.
pub struct ChannelSink {
    tx: mpsc::Sender<(TopicName, MessageEnvelope)>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that observes its output.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<(TopicName, MessageEnvelope)>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn publish(&self, topic: &TopicName, envelope: MessageEnvelope) -> Result<(), EnvError> {
        self.tx
            .send((topic.clone(), envelope))
            .await
            .map_err(|_| EnvError::sink(format!("topic {} has no subscriber", topic)))
    }
}

/// Sink that keeps everything it receives in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    published: Arc<Mutex<Vec<(TopicName, MessageEnvelope)>>>,
}

impl MemorySink {
    /// Creates an empty memory sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything published so far, in publish order.
    pub fn published(&self) -> Vec<(TopicName, MessageEnvelope)> {
        self.published
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Number of envelopes published so far.
    pub fn len(&self) -> usize {
        self.published.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Returns true if nothing has been published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn publish(&self, topic: &TopicName, envelope: MessageEnvelope) -> Result<(), EnvError> {
        self.published
            .lock()
            .map_err(|_| EnvError::sink("memory sink poisoned"))?
            .push((topic.clone(), envelope));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bus_assigns_offsets_in_order() {
        let (producer, source) = channel_bus(8);
        assert_eq!(producer.send(b"a".to_vec()).await.unwrap(), 0);
        assert_eq!(producer.send(b"b".to_vec()).await.unwrap(), 1);

        let first = source.recv().await.unwrap();
        let second = source.recv().await.unwrap();
        assert_eq!(first.payload, b"a".to_vec());
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
    }

    #[tokio::test]
    async fn test_source_closes_when_producers_dropped() {
        let (producer, source) = channel_bus(4);
        producer.send(b"last".to_vec()).await.unwrap();
        drop(producer);

        assert!(source.recv().await.is_some());
        assert!(source.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_topic() {
        let (sink, mut rx) = ChannelSink::new(4);
        let topic = TopicName::new("us101_agg1");
        sink.publish(&topic, MessageEnvelope::keyed(b"k".to_vec(), b"v".to_vec(), 0))
            .await
            .unwrap();

        let (got_topic, envelope) = rx.recv().await.unwrap();
        assert_eq!(got_topic, topic);
        assert_eq!(envelope.key.as_deref(), Some(&b"k"[..]));
    }

    #[tokio::test]
    async fn test_channel_sink_errors_without_subscriber() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        let result = sink
            .publish(&TopicName::new("t"), MessageEnvelope::new(vec![], 0))
            .await;
        assert!(matches!(result, Err(EnvError::SinkError(_))));
    }

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        let topic = TopicName::new("out");
        for i in 0..3 {
            sink.publish(&topic, MessageEnvelope::new(vec![i], i as u64))
                .await
                .unwrap();
        }
        let published = sink.published();
        assert_eq!(published.len(), 3);
        assert_eq!(published[2].1.payload, vec![2]);
    }
}
