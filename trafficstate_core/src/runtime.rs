//! Streaming runtime: wires the engine to the message bus.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      StreamingRuntime                        │
//! │                                                              │
//! │  MessageSource ──► decode ──► WatermarkedWindowAggregator    │
//! │   (raw topic)                          │ closed windows      │
//! │                                        ▼                     │
//! │                    MessageSink ◄── render + encode           │
//! │                   (output topic)                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop stops when the source is exhausted or the shutdown signal
//! flips to `true`. Either way the aggregator's open-window policy is
//! applied and reported; nothing is published for windows still open.
//!
//! # Usage
//!
//! ```ignore
//! use trafficstate_core::runtime::{RuntimeConfig, StreamingRuntime};
//! use trafficstate_env::{channel_bus, MemorySink};
//!
//! let (producer, source) = channel_bus(1024);
//! let runtime = StreamingRuntime::new(source, MemorySink::new(), engine, RuntimeConfig::default());
//! let (_tx, rx) = tokio::sync::watch::channel(false);
//! let report = runtime.run(rx).await?;
//! ```

use crate::codec;
use crate::engine::TrafficStateEngine;
use crate::error::EngineError;
use crate::matrix::{CellScaler, IdentityScaler};
use crate::streaming::{ClosedWindow, IngestOutcome, ShutdownReport, WatermarkedWindowAggregator};
use crate::types::DropCounters;
use trafficstate_env::{MessageEnvelope, MessageSink, MessageSource, TopicName};

use std::sync::Arc;
use tokio::sync::watch;

/// Default output topic for rendered snapshots.
pub const DEFAULT_OUTPUT_TOPIC: &str = "us101_agg1";

/// Configuration for the streaming runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Topic rendered snapshots are published to (default: `us101_agg1`)
    pub output_topic: TopicName,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            output_topic: TopicName::new(DEFAULT_OUTPUT_TOPIC),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    SourceClosed,
    ShutdownSignal,
}

/// Summary of one runtime session.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeReport {
    pub reason: StopReason,
    pub envelopes: u64,
    /// Payloads that were not valid JSON at all
    pub malformed_payloads: u64,
    /// Records decoded from payloads, valid or not
    pub records: u64,
    pub published: u64,
    /// Decode-level and aggregation-level drops combined
    pub drops: DropCounters,
    pub shutdown: ShutdownReport,
}

#[derive(Debug, Default)]
struct SessionCounters {
    envelopes: u64,
    malformed_payloads: u64,
    records: u64,
    published: u64,
    decode_drops: DropCounters,
}

/// Async driver over a [`MessageSource`] and a [`MessageSink`].
///
/// Generic over both so the same loop runs against a broker in production
/// and in-process channels in simulation.
pub struct StreamingRuntime<Src, Snk, S = IdentityScaler>
where
    Src: MessageSource,
    Snk: MessageSink,
{
    source: Arc<Src>,
    sink: Arc<Snk>,
    engine: TrafficStateEngine<S>,
    config: RuntimeConfig,
    aggregator: WatermarkedWindowAggregator,
}

impl<Src, Snk, S> StreamingRuntime<Src, Snk, S>
where
    Src: MessageSource,
    Snk: MessageSink,
    S: CellScaler,
{
    pub fn new(source: Src, sink: Snk, engine: TrafficStateEngine<S>, config: RuntimeConfig) -> Self {
        let aggregator = engine.streaming();
        Self {
            source: Arc::new(source),
            sink: Arc::new(sink),
            engine,
            config,
            aggregator,
        }
    }

    /// Replaces the fresh aggregator with one resumed from a checkpoint.
    pub fn with_aggregator(mut self, aggregator: WatermarkedWindowAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Runs until the source closes or `shutdown` becomes `true`.
    ///
    /// # Errors
    /// Sink failures and snapshot encoding failures abort the session with
    /// [`EngineError::Aborted`], which still carries the shutdown report of
    /// the open-window policy. Undecodable payloads and bad records are
    /// counted and skipped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<RuntimeReport, EngineError> {
        let mut counters = SessionCounters::default();
        let mut signal_alive = true;
        let source = Arc::clone(&self.source);

        let outcome = loop {
            if *shutdown.borrow() {
                break Ok(StopReason::ShutdownSignal);
            }
            tokio::select! {
                biased;
                changed = shutdown.changed(), if signal_alive => {
                    if changed.is_err() {
                        // Sender dropped: keep draining the source.
                        signal_alive = false;
                    }
                }
                envelope = source.recv() => match envelope {
                    Some(envelope) => {
                        if let Err(err) = self.handle_envelope(envelope, &mut counters).await {
                            break Err(err);
                        }
                    }
                    None => break Ok(StopReason::SourceClosed),
                },
            }
        };

        let shutdown_report = self.aggregator.shutdown();
        let reason = match outcome {
            Ok(reason) => reason,
            Err(err) => {
                tracing::error!(
                    %err,
                    envelopes = counters.envelopes,
                    published = counters.published,
                    open_windows = shutdown_report.open_windows,
                    open_points = shutdown_report.open_points,
                    "streaming runtime aborted"
                );
                return Err(EngineError::Aborted {
                    source: Box::new(err),
                    shutdown: Box::new(shutdown_report),
                });
            }
        };
        let mut drops = counters.decode_drops;
        drops.merge(&shutdown_report.drops);

        tracing::info!(
            ?reason,
            envelopes = counters.envelopes,
            published = counters.published,
            dropped = drops.total(),
            "streaming runtime stopped"
        );

        Ok(RuntimeReport {
            reason,
            envelopes: counters.envelopes,
            malformed_payloads: counters.malformed_payloads,
            records: counters.records,
            published: counters.published,
            drops,
            shutdown: shutdown_report,
        })
    }

    async fn handle_envelope(
        &mut self,
        envelope: MessageEnvelope,
        counters: &mut SessionCounters,
    ) -> Result<(), EngineError> {
        counters.envelopes += 1;
        tracing::trace!(offset = envelope.offset, bytes = envelope.size(), "received envelope");
        let records = match codec::decode_points(&envelope.payload) {
            Ok(records) => records,
            Err(err) => {
                counters.malformed_payloads += 1;
                tracing::warn!(offset = envelope.offset, %err, "skipping malformed payload");
                return Ok(());
            }
        };

        for record in records {
            counters.records += 1;
            let point = match record {
                Ok(point) => point,
                Err(issue) => {
                    tracing::trace!(offset = envelope.offset, %issue, "dropping undecodable record");
                    counters.decode_drops.record(&issue);
                    continue;
                }
            };
            let report = self.aggregator.ingest(&point);
            if let IngestOutcome::Late { window_id } = report.outcome {
                tracing::debug!(window_id, vehicle_id = point.vehicle_id, "late point");
            }
            for window in &report.closed {
                self.publish(window, counters).await?;
            }
        }
        Ok(())
    }

    async fn publish(&self, window: &ClosedWindow, counters: &mut SessionCounters) -> Result<(), EngineError> {
        let (key, value) = self.engine.encode_closed(window)?;
        self.sink
            .publish(&self.config.output_topic, MessageEnvelope::keyed(key, value, counters.published))
            .await?;
        counters.published += 1;
        tracing::debug!(
            window_id = window.window_id,
            cells = window.records.len(),
            topic = %self.config.output_topic,
            "published window snapshot"
        );
        Ok(())
    }
}
