//! Engine configuration.
//!
//! Configuration is an immutable value: it is validated once into a
//! [`ValidatedConfig`] and then handed to each component at construction.
//! No component keeps mutable configuration of its own.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Velocity assumed for cells without observations (mph, uncongested).
pub const FREE_FLOW_VELOCITY: f64 = 60.0;

/// Lane id that auxiliary/ramp lanes 7 and 8 are merged into.
pub const RAMP_LANE: u32 = 6;

/// First timestamp of the NGSIM dataset (all locations), in Unix ms.
pub const NGSIM_EPOCH_MS: i64 = 1_113_433_135_300;

/// First timestamp of the US-101 recordings, in Unix ms.
pub const US101_EPOCH_MS: i64 = NGSIM_EPOCH_MS + 5_413_844_400;

/// Offset from UTC to the local wall clock of the NGSIM recordings.
///
/// Pacific daylight time minus the extra hour the dataset timestamps carry.
pub const NGSIM_UTC_OFFSET_MS: i64 = -8 * MS_PER_HOUR;

pub const MS_PER_HOUR: i64 = 3_600_000;

/// Default exclusion at the end of a batch range.
pub const DEFAULT_TRAILING_GUARD_MS: i64 = 45;

/// Feet per second in one mile per hour.
pub const FEET_PER_SECOND_PER_MPH: f64 = 1.466_666_67;

// ============================================================================
// POLICIES
// ============================================================================

/// How the batch path re-aggregates fine buckets into windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reaggregation {
    /// Mean of the per-bucket averages, ignoring bucket sizes.
    /// Biased toward sparsely populated buckets; kept for compatibility.
    #[default]
    MeanOfMeans,

    /// Mean weighted by the number of points behind each bucket.
    CountWeighted,
}

/// What happens to windows that are still open when the stream shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenWindowPolicy {
    /// Drop open state. The number of windows and points lost is logged
    /// and reported.
    #[default]
    Discard,

    /// Hand the open state back as a checkpoint that can be restored.
    Checkpoint,
}

/// Unit conversion applied to velocity and acceleration on ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityUnit {
    /// Values are used as delivered.
    #[default]
    Native,

    /// Values arrive in ft/s (and ft/s²) and are converted to mph.
    FeetPerSecondToMph,
}

impl VelocityUnit {
    /// Converts a raw reading into engine units.
    pub fn convert(self, value: f64) -> f64 {
        match self {
            VelocityUnit::Native => value,
            VelocityUnit::FeetPerSecondToMph => value / FEET_PER_SECOND_PER_MPH,
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Configuration consumed by the aggregation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of the monitored road segment (same unit as local coordinates)
    pub max_distance: f64,

    /// Number of longitudinal sections
    pub num_sections: u32,

    /// Number of lanes after ramp merging
    pub num_lanes: u32,

    /// Window size in seconds; also the streaming watermark
    pub window_size_secs: u32,

    /// Whether the merged ramp lane is rendered
    pub with_ramp: bool,

    /// Exclusion at the end of a batch range (ms)
    pub trailing_guard_ms: i64,

    /// Subtracted from event timestamps to obtain elapsed time (ms)
    pub time_origin_ms: i64,

    /// Batch re-aggregation policy
    pub reaggregation: Reaggregation,

    /// Streaming shutdown policy
    pub open_window_policy: OpenWindowPolicy,

    /// Only points tagged with this location are aggregated
    pub location: Option<String>,

    /// Unit conversion for velocity and acceleration
    pub velocity_unit: VelocityUnit,

    /// Only points recorded in these local hours (0-23) are aggregated
    pub hours: Option<Vec<u32>>,

    /// Local wall clock offset from UTC used to derive the hour (ms)
    pub utc_offset_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_distance: 2100.0, // ft, US-101 study area
            num_sections: 21,
            num_lanes: 6,
            window_size_secs: 30,
            with_ramp: true,
            trailing_guard_ms: DEFAULT_TRAILING_GUARD_MS,
            time_origin_ms: 0,
            reaggregation: Reaggregation::MeanOfMeans,
            open_window_policy: OpenWindowPolicy::Discard,
            location: None,
            velocity_unit: VelocityUnit::Native,
            hours: None,
            utc_offset_ms: NGSIM_UTC_OFFSET_MS,
        }
    }
}

impl EngineConfig {
    /// Sets the road geometry.
    pub fn with_road(mut self, max_distance: f64, num_sections: u32) -> Self {
        self.max_distance = max_distance;
        self.num_sections = num_sections;
        self
    }

    /// Sets the number of lanes.
    pub fn with_lanes(mut self, num_lanes: u32) -> Self {
        self.num_lanes = num_lanes;
        self
    }

    /// Sets the window size in seconds.
    pub fn with_window_secs(mut self, secs: u32) -> Self {
        self.window_size_secs = secs;
        self
    }

    /// Includes or excludes the ramp lane from rendering.
    pub fn with_ramp(mut self, with_ramp: bool) -> Self {
        self.with_ramp = with_ramp;
        self
    }

    /// Sets the batch trailing guard.
    pub fn with_trailing_guard_ms(mut self, guard_ms: i64) -> Self {
        self.trailing_guard_ms = guard_ms;
        self
    }

    /// Sets the elapsed-time origin.
    pub fn with_time_origin_ms(mut self, origin_ms: i64) -> Self {
        self.time_origin_ms = origin_ms;
        self
    }

    /// Sets the batch re-aggregation policy.
    pub fn with_reaggregation(mut self, mode: Reaggregation) -> Self {
        self.reaggregation = mode;
        self
    }

    /// Sets the streaming shutdown policy.
    pub fn with_open_window_policy(mut self, policy: OpenWindowPolicy) -> Self {
        self.open_window_policy = policy;
        self
    }

    /// Restricts aggregation to one location tag.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the unit conversion.
    pub fn with_velocity_unit(mut self, unit: VelocityUnit) -> Self {
        self.velocity_unit = unit;
        self
    }

    /// Restricts aggregation to points recorded in the given local hours.
    pub fn with_hours(mut self, hours: impl IntoIterator<Item = u32>) -> Self {
        self.hours = Some(hours.into_iter().collect());
        self
    }

    /// Sets the local wall clock offset used by the hour selection.
    pub fn with_utc_offset_ms(mut self, offset_ms: i64) -> Self {
        self.utc_offset_ms = offset_ms;
        self
    }

    /// Checks every constraint and freezes the configuration.
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        if self.num_sections == 0 {
            return Err(ConfigError::ZeroSections);
        }
        if self.num_lanes == 0 {
            return Err(ConfigError::ZeroLanes);
        }
        if self.window_size_secs == 0 {
            return Err(ConfigError::ZeroWindowSize);
        }
        if self.trailing_guard_ms < 0 {
            return Err(ConfigError::NegativeTrailingGuard(self.trailing_guard_ms));
        }
        if let Some(hour) = self.hours.iter().flatten().find(|hour| **hour >= 24) {
            return Err(ConfigError::InvalidHour(*hour));
        }

        let bucket_width = (self.max_distance / self.num_sections as f64).floor();
        if !bucket_width.is_finite() || bucket_width <= 0.0 {
            return Err(ConfigError::NonPositiveBucketWidth {
                max_distance: self.max_distance,
                num_sections: self.num_sections,
            });
        }

        Ok(ValidatedConfig {
            inner: self,
            bucket_width,
        })
    }
}

/// A configuration that passed [`EngineConfig::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    inner: EngineConfig,
    bucket_width: f64,
}

impl ValidatedConfig {
    /// The underlying configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner
    }

    /// Section width: `floor(max_distance / num_sections)`.
    pub fn bucket_width(&self) -> f64 {
        self.bucket_width
    }

    pub fn num_sections(&self) -> u32 {
        self.inner.num_sections
    }

    pub fn num_lanes(&self) -> u32 {
        self.inner.num_lanes
    }

    pub fn with_ramp(&self) -> bool {
        self.inner.with_ramp
    }

    /// Window size in milliseconds.
    pub fn window_size_ms(&self) -> i64 {
        self.inner.window_size_secs as i64 * 1000
    }

    /// Allowed lateness for streaming; equal to the window size.
    pub fn watermark_ms(&self) -> i64 {
        self.window_size_ms()
    }

    /// Converts an event timestamp into elapsed time, or `None` if the
    /// difference leaves the i64 range.
    pub fn elapsed_ms(&self, timestamp_ms: i64) -> Option<i64> {
        timestamp_ms.checked_sub(self.inner.time_origin_ms)
    }
}

// ============================================================================
// BATCH RANGE
// ============================================================================

/// Half-open batch time range `[start_secs, end_secs)` in elapsed seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRange {
    pub start_secs: i64,
    pub end_secs: i64,
}

impl BatchRange {
    /// Creates a range, rejecting empty ones.
    pub fn new(start_secs: i64, end_secs: i64) -> Result<Self, ConfigError> {
        if end_secs <= start_secs {
            return Err(ConfigError::EmptyBatchRange { start_secs, end_secs });
        }
        Ok(Self { start_secs, end_secs })
    }

    /// Accepted elapsed-time bounds `[lower, upper)` in ms after applying the
    /// trailing guard.
    pub fn bounds_ms(&self, trailing_guard_ms: i64) -> (i64, i64) {
        (
            self.start_secs.saturating_mul(1000),
            self.end_secs.saturating_mul(1000).saturating_sub(trailing_guard_ms),
        )
    }

    /// Returns true if the elapsed time falls inside the guarded range.
    pub fn contains(&self, elapsed_ms: i64, trailing_guard_ms: i64) -> bool {
        let (lower, upper) = self.bounds_ms(trailing_guard_ms);
        elapsed_ms >= lower && elapsed_ms < upper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let validated = EngineConfig::default().validate().unwrap();
        assert_eq!(validated.bucket_width(), 100.0);
        assert_eq!(validated.window_size_ms(), 30_000);
        assert_eq!(validated.watermark_ms(), validated.window_size_ms());
    }

    #[test]
    fn test_zero_sections_rejected() {
        let err = EngineConfig::default().with_road(1000.0, 0).validate().unwrap_err();
        assert_eq!(err, ConfigError::ZeroSections);
    }

    #[test]
    fn test_zero_lanes_rejected() {
        let err = EngineConfig::default().with_lanes(0).validate().unwrap_err();
        assert_eq!(err, ConfigError::ZeroLanes);
    }

    #[test]
    fn test_bucket_width_must_be_positive() {
        // floor(5 / 10) = 0
        let err = EngineConfig::default().with_road(5.0, 10).validate().unwrap_err();
        assert!(matches!(err, ConfigError::NonPositiveBucketWidth { .. }));

        let err = EngineConfig::default().with_road(f64::NAN, 10).validate().unwrap_err();
        assert!(matches!(err, ConfigError::NonPositiveBucketWidth { .. }));
    }

    #[test]
    fn test_bucket_width_is_floored() {
        let validated = EngineConfig::default().with_road(1050.0, 10).validate().unwrap();
        assert_eq!(validated.bucket_width(), 105.0);

        let validated = EngineConfig::default().with_road(1099.0, 10).validate().unwrap();
        assert_eq!(validated.bucket_width(), 109.0);
    }

    #[test]
    fn test_negative_guard_rejected() {
        let err = EngineConfig::default().with_trailing_guard_ms(-1).validate().unwrap_err();
        assert_eq!(err, ConfigError::NegativeTrailingGuard(-1));
    }

    #[test]
    fn test_elapsed_time_uses_origin() {
        let validated = EngineConfig::default()
            .with_time_origin_ms(NGSIM_EPOCH_MS)
            .validate()
            .unwrap();
        assert_eq!(validated.elapsed_ms(NGSIM_EPOCH_MS + 1_500), Some(1_500));
        assert_eq!(validated.elapsed_ms(i64::MIN), None);
    }

    #[test]
    fn test_hour_outside_day_rejected() {
        let err = EngineConfig::default().with_hours([7, 24]).validate().unwrap_err();
        assert_eq!(err, ConfigError::InvalidHour(24));
        assert!(EngineConfig::default().with_hours([7, 8]).validate().is_ok());
    }

    #[test]
    fn test_us101_epoch_follows_dataset_epoch() {
        assert_eq!(US101_EPOCH_MS, 1_118_846_979_700);
    }

    #[test]
    fn test_batch_range_bounds() {
        let range = BatchRange::new(0, 60).unwrap();
        assert_eq!(range.bounds_ms(45), (0, 59_955));
        assert!(range.contains(59_954, 45));
        assert!(!range.contains(59_955, 45));
        assert!(!range.contains(-1, 45));

        let huge = BatchRange::new(0, i64::MAX).unwrap();
        assert_eq!(huge.bounds_ms(45), (0, i64::MAX - 45));
    }

    #[test]
    fn test_empty_batch_range_rejected() {
        assert!(matches!(
            BatchRange::new(10, 10),
            Err(ConfigError::EmptyBatchRange { .. })
        ));
    }

    #[test]
    fn test_config_roundtrips_through_json_with_defaults() {
        let parsed: EngineConfig =
            serde_json::from_str(r#"{"num_sections": 10, "reaggregation": "count_weighted"}"#).unwrap();
        assert_eq!(parsed.num_sections, 10);
        assert_eq!(parsed.reaggregation, Reaggregation::CountWeighted);
        assert_eq!(parsed.num_lanes, 6);
    }

    #[test]
    fn test_feet_per_second_conversion() {
        let mph = VelocityUnit::FeetPerSecondToMph.convert(88.0);
        assert!((mph - 60.0).abs() < 1e-3);
        assert_eq!(VelocityUnit::Native.convert(88.0), 88.0);
    }
}
