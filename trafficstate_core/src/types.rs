//! Records flowing through the engine.

use crate::error::DataQualityIssue;
use serde::{Deserialize, Serialize};

/// A single vehicle reading. Consumed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub vehicle_id: i64,

    /// Event time (Unix milliseconds, or already-elapsed milliseconds when
    /// the configured time origin is 0)
    pub timestamp_ms: i64,

    /// Lateral coordinate in the local planar frame
    pub local_x: f64,

    /// Longitudinal coordinate in the local planar frame
    pub local_y: f64,

    /// Raw lane id (7 and 8 are auxiliary lanes)
    pub lane_id: i32,

    pub velocity: f64,
    pub acceleration: f64,

    /// Monitored location tag, e.g. "us-101"
    pub location: String,
}

/// Access to the cell coordinates shared by every aggregation key.
pub trait CellKey {
    fn section_id(&self) -> u32;
    fn lane_id(&self) -> u32;
}

/// Identity for fine aggregation: (time key, section, lane).
///
/// `time_key` is the elapsed event time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionKey {
    pub time_key: i64,
    pub section_id: u32,
    pub lane_id: u32,
}

/// Identity for window aggregation: (window, section, lane).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowKey {
    pub window_id: i64,
    pub section_id: u32,
    pub lane_id: u32,
}

impl CellKey for SectionKey {
    fn section_id(&self) -> u32 {
        self.section_id
    }

    fn lane_id(&self) -> u32 {
        self.lane_id
    }
}

impl CellKey for WindowKey {
    fn section_id(&self) -> u32 {
        self.section_id
    }

    fn lane_id(&self) -> u32 {
        self.lane_id
    }
}

/// A reduced statistic. Never edited after creation; re-aggregation builds
/// new records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRecord<K> {
    pub key: K,

    /// Mean velocity, rounded to 1 decimal
    pub avg_velocity: f64,

    /// Mean acceleration, rounded to 2 decimals
    pub avg_acceleration: f64,

    /// Number of underlying points (always >= 1)
    pub count: u64,
}

/// Tally of points that were dropped instead of aggregated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropCounters {
    /// Points whose window had already closed
    pub late: u64,
    pub missing_field: u64,
    pub non_finite_distance: u64,
    pub negative_distance: u64,
    pub lane_out_of_range: u64,
    pub location_mismatch: u64,
    pub non_finite_measurement: u64,
    pub hour_excluded: u64,
    /// Elapsed time or window edges outside the i64 range
    pub timestamp_out_of_range: u64,
}

impl DropCounters {
    /// Counts one point dropped for a data-quality reason.
    pub fn record(&mut self, issue: &DataQualityIssue) {
        match issue {
            DataQualityIssue::MissingField(_) => self.missing_field += 1,
            DataQualityIssue::NonFiniteDistance => self.non_finite_distance += 1,
            DataQualityIssue::NegativeDistance(_) => self.negative_distance += 1,
            DataQualityIssue::LaneOutOfRange { .. } => self.lane_out_of_range += 1,
            DataQualityIssue::LocationMismatch { .. } => self.location_mismatch += 1,
            DataQualityIssue::NonFiniteMeasurement(_) => self.non_finite_measurement += 1,
            DataQualityIssue::HourExcluded(_) => self.hour_excluded += 1,
            DataQualityIssue::TimestampOutOfRange(_) => self.timestamp_out_of_range += 1,
        }
    }

    /// Points dropped for data-quality reasons (late points excluded).
    pub fn quality_total(&self) -> u64 {
        self.missing_field
            + self.non_finite_distance
            + self.negative_distance
            + self.lane_out_of_range
            + self.location_mismatch
            + self.non_finite_measurement
            + self.hour_excluded
            + self.timestamp_out_of_range
    }

    /// Every dropped point.
    pub fn total(&self) -> u64 {
        self.quality_total() + self.late
    }

    /// Adds another tally into this one.
    pub fn merge(&mut self, other: &DropCounters) {
        self.late += other.late;
        self.missing_field += other.missing_field;
        self.non_finite_distance += other.non_finite_distance;
        self.negative_distance += other.negative_distance;
        self.lane_out_of_range += other.lane_out_of_range;
        self.location_mismatch += other.location_mismatch;
        self.non_finite_measurement += other.non_finite_measurement;
        self.hour_excluded += other.hour_excluded;
        self.timestamp_out_of_range += other.timestamp_out_of_range;
    }
}
