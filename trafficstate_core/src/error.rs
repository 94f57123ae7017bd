//! Error types for the TrafficState aggregation engine.
//!
//! Only [`ConfigError`] is fatal. A [`DataQualityIssue`] costs exactly one
//! point, which is counted in [`DropCounters`](crate::types::DropCounters)
//! and skipped.

use crate::streaming::ShutdownReport;
use thiserror::Error;
use trafficstate_env::EnvError;

/// Configuration rejected before any processing starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// `num_sections` must be at least 1
    #[error("num_sections must be positive")]
    ZeroSections,

    /// `num_lanes` must be at least 1
    #[error("num_lanes must be positive")]
    ZeroLanes,

    /// `floor(max_distance / num_sections)` must be a positive finite width
    #[error("bucket width floor({max_distance} / {num_sections}) is not positive")]
    NonPositiveBucketWidth { max_distance: f64, num_sections: u32 },

    /// Window size must be at least one second
    #[error("window_size_secs must be positive")]
    ZeroWindowSize,

    /// The trailing guard cannot extend a batch range
    #[error("trailing_guard_ms must not be negative, got {0}")]
    NegativeTrailingGuard(i64),

    /// Batch range must satisfy `start < end`
    #[error("batch range [{start_secs}, {end_secs}) is empty")]
    EmptyBatchRange { start_secs: i64, end_secs: i64 },

    /// Selected hours must lie in `0..24`
    #[error("hour {0} is outside 0..24")]
    InvalidHour(u32),
}

/// A point that cannot be aggregated. Recovered locally: the point is dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataQualityIssue {
    /// A required field was absent from the incoming record
    #[error("missing required field {0}")]
    MissingField(&'static str),

    /// Distance resolved to NaN or infinity
    #[error("distance is not finite")]
    NonFiniteDistance,

    /// Distance below zero cannot be bucketed
    #[error("negative distance {0}")]
    NegativeDistance(f64),

    /// Lane id outside `[1, num_lanes]` after normalization
    #[error("lane {lane} outside 1..={num_lanes}")]
    LaneOutOfRange { lane: i32, num_lanes: u32 },

    /// Record belongs to another monitored location
    #[error("location {found:?} does not match {expected:?}")]
    LocationMismatch { expected: String, found: String },

    /// Velocity or acceleration is NaN or infinite
    #[error("{0} is not finite")]
    NonFiniteMeasurement(&'static str),

    /// Recorded in a local hour that is not selected
    #[error("local hour {0} is not selected")]
    HourExcluded(u32),

    /// Elapsed time or its window edges do not fit in i64 milliseconds
    #[error("timestamp {0} ms is out of range")]
    TimestampOutOfRange(i64),
}

/// Failures surfaced by the streaming runtime.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    /// A session stopped on `source` after its open-window policy was applied
    #[error("streaming session aborted: {source}")]
    Aborted {
        source: Box<EngineError>,
        shutdown: Box<ShutdownReport>,
    },
}

impl EngineError {
    /// Shutdown outcome carried by an aborted session.
    pub fn shutdown_report(&self) -> Option<&ShutdownReport> {
        match self {
            EngineError::Aborted { shutdown, .. } => Some(&**shutdown),
            _ => None,
        }
    }
}
