//! Error types for the TrafficState environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Publish failed (buffer full, channel closed, broker rejected, etc.)
    #[error("Sink error: {0}")]
    SinkError(String),

    /// The source side of the bus is gone
    #[error("Source closed: {0}")]
    SourceClosed(String),
}

impl EnvError {
    /// Creates a sink error.
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::SinkError(msg.into())
    }
}
