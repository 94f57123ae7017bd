//! Common types for the TrafficState environment abstraction.

use serde::{Deserialize, Serialize};

/// Name of a publish-subscribe topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicName(pub String);

impl TopicName {
    /// Creates a topic name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the topic name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope for messages moving across the bus.
///
/// This is a transport-layer wrapper - the payload is opaque bytes that the
/// engine decodes itself. The bus only guarantees ordering per partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Optional message key (used for partitioning and for the window key
    /// on the output side)
    pub key: Option<Vec<u8>>,

    /// The raw message bytes
    pub payload: Vec<u8>,

    /// Position of this message in its partition
    pub offset: u64,
}

impl MessageEnvelope {
    /// Creates an unkeyed envelope.
    pub fn new(payload: Vec<u8>, offset: u64) -> Self {
        Self {
            key: None,
            payload,
            offset,
        }
    }

    /// Creates a keyed envelope.
    pub fn keyed(key: Vec<u8>, payload: Vec<u8>, offset: u64) -> Self {
        Self {
            key: Some(key),
            payload,
            offset,
        }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
