//! TrafficState Core - Spatiotemporal aggregation of vehicle trajectories
//!
//! Turns a stream of trajectory points into per-window traffic-state
//! matrices (lane × road section, with velocity, density and acceleration
//! channels). One set of rules drives two paths:
//!
//! ```text
//!                    ┌─► FineAggregator ─► WindowAggregator ──────────┐   batch
//!  TrajectoryPoint ──┤                                                ├─► MatrixRenderer
//!                    └─► WatermarkedWindowAggregator (event time) ────┘   streaming
//! ```
//!
//! 1. **Geometry**: distance from the road origin, section bucketing, ramp
//!    lane merge (lanes 7 and 8 fold into lane 6)
//! 2. **Batch**: fine aggregation by exact event time, then re-aggregation
//!    into windows over a bounded range
//! 3. **Streaming**: incremental windows closed by a max-event-time watermark,
//!    with late-data accounting and exactly-once emission

pub mod accumulator;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod fine;
pub mod geometry;
pub mod matrix;
pub mod runtime;
pub mod streaming;
pub mod types;
pub mod window;

// Re-export key types for convenience
pub use config::{BatchRange, EngineConfig, OpenWindowPolicy, Reaggregation, ValidatedConfig, VelocityUnit};
pub use engine::{BatchOutput, TrafficStateEngine};
pub use error::{ConfigError, DataQualityIssue, EngineError};
pub use matrix::{CellScaler, Channel, IdentityScaler, MatrixRenderer, TrafficStateMatrix};
pub use runtime::{RuntimeConfig, RuntimeReport, StopReason, StreamingRuntime};
pub use streaming::{ClosedWindow, ShutdownReport, WatermarkCheckpoint, WatermarkedWindowAggregator};
pub use types::{DropCounters, SectionKey, StatRecord, TrajectoryPoint, WindowKey};
