//! TrafficState Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" boundary between the aggregation engine
//! and the publish-subscribe bus it runs against. The engine never touches a
//! broker directly; it sees two traits:
//! - [`MessageSource`]: yields opaque envelopes (one JSON payload each)
//! - [`MessageSink`]: accepts keyed envelopes for a topic
//!
//! Subscribe/publish mechanics, offsets and checkpoint storage all live on the
//! far side of these traits. The tokio channel implementation is what the
//! simulator and the tests plug in.
//!
//! # Example
//!
//! ```ignore
//! use trafficstate_env::{channel_bus, MessageSource};
//!
//! let (producer, source) = channel_bus(1024);
//! let offset = producer.send(payload).await?;
//! while let Some(envelope) = source.recv().await {
//!     handle(envelope);
//! }
//! ```

mod bus;
mod error;
mod tokio_impl;
mod types;

pub use bus::{MessageSink, MessageSource};
pub use error::EnvError;
pub use tokio_impl::{channel_bus, ChannelProducer, ChannelSink, ChannelSource, MemorySink};
pub use types::{MessageEnvelope, TopicName};
