//! Road geometry: distance, lane canonicalization and section bucketing.
//!
//! These are the leaf components of the pipeline. [`RoadLocator`] chains them
//! and is the single place a raw [`TrajectoryPoint`] becomes a located cell
//! observation (or a [`DataQualityIssue`]).

use crate::config::{ValidatedConfig, VelocityUnit, MS_PER_HOUR, RAMP_LANE};
use crate::error::DataQualityIssue;
use crate::types::TrajectoryPoint;

/// Longitudinal distance from local planar coordinates.
///
/// NaN inputs propagate as NaN; rejecting them is the caller's decision.
pub fn resolve_distance(local_x: f64, local_y: f64) -> f64 {
    (local_x.powi(2) + local_y.powi(2)).sqrt()
}

/// Merges auxiliary lanes 7 and 8 into the ramp lane. Every other id passes
/// through unchanged.
pub fn normalize_lane(lane_id: i32) -> i32 {
    match lane_id {
        7 | 8 => RAMP_LANE as i32,
        other => other,
    }
}

/// Local wall clock hour (0-23) of a Unix-ms timestamp.
pub fn local_hour(timestamp_ms: i64, utc_offset_ms: i64) -> Option<u32> {
    let local = timestamp_ms.checked_add(utc_offset_ms)?;
    Some(local.div_euclid(MS_PER_HOUR).rem_euclid(24) as u32)
}

/// Maps a distance onto a section index in `[0, num_sections)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionBucketizer {
    bucket_width: f64,
    num_sections: u32,
}

impl SectionBucketizer {
    /// Builds a bucketizer from a validated configuration, so the width is
    /// already known to be positive.
    pub fn new(config: &ValidatedConfig) -> Self {
        Self {
            bucket_width: config.bucket_width(),
            num_sections: config.num_sections(),
        }
    }

    pub fn bucket_width(&self) -> f64 {
        self.bucket_width
    }

    /// Section index for a distance.
    ///
    /// `round(distance / width)`, with anything at or past `num_sections`
    /// folded into the last section so the trailing partial bucket is merged
    /// with its predecessor. Negative and non-finite distances are rejected.
    pub fn bucketize(&self, distance: f64) -> Result<u32, DataQualityIssue> {
        if !distance.is_finite() {
            return Err(DataQualityIssue::NonFiniteDistance);
        }
        if distance < 0.0 {
            return Err(DataQualityIssue::NegativeDistance(distance));
        }

        let raw = (distance / self.bucket_width).round();
        let last = (self.num_sections - 1) as f64;
        Ok(raw.min(last) as u32)
    }
}

/// A point resolved to its road cell, in engine units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocatedPoint {
    /// Event time relative to the configured origin
    pub elapsed_ms: i64,
    pub section_id: u32,
    /// Normalized lane in `[1, num_lanes]`
    pub lane_id: u32,
    pub velocity: f64,
    pub acceleration: f64,
}

/// Distance → lane → section, plus the point-level quality checks.
#[derive(Debug, Clone)]
pub struct RoadLocator {
    bucketizer: SectionBucketizer,
    num_lanes: u32,
    time_origin_ms: i64,
    location: Option<String>,
    hours: Option<Vec<u32>>,
    utc_offset_ms: i64,
    velocity_unit: VelocityUnit,
}

impl RoadLocator {
    pub fn new(config: &ValidatedConfig) -> Self {
        Self {
            bucketizer: SectionBucketizer::new(config),
            num_lanes: config.num_lanes(),
            time_origin_ms: config.config().time_origin_ms,
            location: config.config().location.clone(),
            hours: config.config().hours.clone(),
            utc_offset_ms: config.config().utc_offset_ms,
            velocity_unit: config.config().velocity_unit,
        }
    }

    pub fn bucketizer(&self) -> &SectionBucketizer {
        &self.bucketizer
    }

    /// Resolves a raw point, or reports why it cannot be aggregated.
    pub fn locate(&self, point: &TrajectoryPoint) -> Result<LocatedPoint, DataQualityIssue> {
        if let Some(expected) = &self.location {
            if &point.location != expected {
                return Err(DataQualityIssue::LocationMismatch {
                    expected: expected.clone(),
                    found: point.location.clone(),
                });
            }
        }
        if let Some(hours) = &self.hours {
            let hour = local_hour(point.timestamp_ms, self.utc_offset_ms)
                .ok_or(DataQualityIssue::TimestampOutOfRange(point.timestamp_ms))?;
            if !hours.contains(&hour) {
                return Err(DataQualityIssue::HourExcluded(hour));
            }
        }
        let elapsed_ms = point
            .timestamp_ms
            .checked_sub(self.time_origin_ms)
            .ok_or(DataQualityIssue::TimestampOutOfRange(point.timestamp_ms))?;
        if !point.velocity.is_finite() {
            return Err(DataQualityIssue::NonFiniteMeasurement("velocity"));
        }
        if !point.acceleration.is_finite() {
            return Err(DataQualityIssue::NonFiniteMeasurement("acceleration"));
        }

        let distance = resolve_distance(point.local_x, point.local_y);
        let section_id = self.bucketizer.bucketize(distance)?;

        let lane = normalize_lane(point.lane_id);
        if lane < 1 || lane as u32 > self.num_lanes {
            return Err(DataQualityIssue::LaneOutOfRange {
                lane,
                num_lanes: self.num_lanes,
            });
        }

        Ok(LocatedPoint {
            elapsed_ms,
            section_id,
            lane_id: lane as u32,
            velocity: self.velocity_unit.convert(point.velocity),
            acceleration: self.velocity_unit.convert(point.acceleration),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, NGSIM_EPOCH_MS, NGSIM_UTC_OFFSET_MS};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn bucketizer(max_distance: f64, num_sections: u32) -> SectionBucketizer {
        let config = EngineConfig::default()
            .with_road(max_distance, num_sections)
            .validate()
            .unwrap();
        SectionBucketizer::new(&config)
    }

    fn point(local_x: f64, local_y: f64, lane_id: i32) -> TrajectoryPoint {
        TrajectoryPoint {
            vehicle_id: 1,
            timestamp_ms: 1_000,
            local_x,
            local_y,
            lane_id,
            velocity: 40.0,
            acceleration: 0.5,
            location: "us-101".to_string(),
        }
    }

    #[test]
    fn test_distance_is_euclidean() {
        assert_relative_eq!(resolve_distance(3.0, 4.0), 5.0);
        assert_relative_eq!(resolve_distance(0.0, 0.0), 0.0);
        assert!(resolve_distance(f64::NAN, 1.0).is_nan());
    }

    #[test]
    fn test_lane_normalization() {
        assert_eq!(normalize_lane(7), 6);
        assert_eq!(normalize_lane(8), 6);
        for lane in [-1, 0, 1, 2, 3, 4, 5, 6, 9, 42] {
            assert_eq!(normalize_lane(lane), lane);
        }
    }

    #[test]
    fn test_bucket_at_one_width() {
        // distance 100 with width floor(1000 / 10) = 100
        let b = bucketizer(1000.0, 10);
        assert_eq!(b.bucket_width(), 100.0);
        assert_eq!(b.bucketize(100.0).unwrap(), 1);
    }

    #[test]
    fn test_bucket_at_max_distance_clamps_to_last_section() {
        let b = bucketizer(1000.0, 10);
        assert_eq!(b.bucketize(1000.0).unwrap(), 9);
    }

    #[test]
    fn test_bucket_rounds_to_nearest() {
        let b = bucketizer(1000.0, 10);
        assert_eq!(b.bucketize(149.0).unwrap(), 1);
        assert_eq!(b.bucketize(150.0).unwrap(), 2);
        assert_eq!(b.bucketize(49.9).unwrap(), 0);
    }

    #[test]
    fn test_bucket_beyond_road_folds_into_last_section() {
        let b = bucketizer(1000.0, 10);
        assert_eq!(b.bucketize(5000.0).unwrap(), 9);
    }

    #[test]
    fn test_negative_distance_is_rejected() {
        let b = bucketizer(1000.0, 10);
        assert_eq!(
            b.bucketize(-0.5),
            Err(DataQualityIssue::NegativeDistance(-0.5))
        );
    }

    #[test]
    fn test_non_finite_distance_is_rejected() {
        let b = bucketizer(1000.0, 10);
        assert_eq!(b.bucketize(f64::NAN), Err(DataQualityIssue::NonFiniteDistance));
        assert_eq!(b.bucketize(f64::INFINITY), Err(DataQualityIssue::NonFiniteDistance));
    }

    #[test]
    fn test_locator_merges_ramp_lanes() {
        let config = EngineConfig::default().with_road(1000.0, 10).validate().unwrap();
        let locator = RoadLocator::new(&config);
        let located = locator.locate(&point(0.0, 230.0, 8)).unwrap();
        assert_eq!(located.lane_id, 6);
        assert_eq!(located.section_id, 2);
    }

    #[test]
    fn test_locator_rejects_lane_outside_domain() {
        let config = EngineConfig::default().validate().unwrap();
        let locator = RoadLocator::new(&config);
        assert!(matches!(
            locator.locate(&point(0.0, 10.0, 0)),
            Err(DataQualityIssue::LaneOutOfRange { lane: 0, .. })
        ));
        assert!(matches!(
            locator.locate(&point(0.0, 10.0, 9)),
            Err(DataQualityIssue::LaneOutOfRange { lane: 9, .. })
        ));
    }

    #[test]
    fn test_locator_filters_location() {
        let config = EngineConfig::default().with_location("us-101").validate().unwrap();
        let locator = RoadLocator::new(&config);
        let mut other = point(0.0, 10.0, 1);
        other.location = "i-80".to_string();
        assert!(matches!(
            locator.locate(&other),
            Err(DataQualityIssue::LocationMismatch { .. })
        ));
        assert!(locator.locate(&point(0.0, 10.0, 1)).is_ok());
    }

    #[test]
    fn test_locator_rejects_non_finite_velocity() {
        let config = EngineConfig::default().validate().unwrap();
        let locator = RoadLocator::new(&config);
        let mut bad = point(0.0, 10.0, 1);
        bad.velocity = f64::NAN;
        assert_eq!(
            locator.locate(&bad),
            Err(DataQualityIssue::NonFiniteMeasurement("velocity"))
        );
    }

    #[test]
    fn test_locator_applies_origin_and_units() {
        let config = EngineConfig::default()
            .with_time_origin_ms(400)
            .with_velocity_unit(VelocityUnit::FeetPerSecondToMph)
            .validate()
            .unwrap();
        let locator = RoadLocator::new(&config);
        let mut p = point(0.0, 10.0, 1);
        p.velocity = 88.0;
        let located = locator.locate(&p).unwrap();
        assert_eq!(located.elapsed_ms, 600);
        assert_relative_eq!(located.velocity, 60.0, epsilon = 1e-3);
    }

    #[test]
    fn test_locator_rejects_unrepresentable_elapsed_time() {
        let config = EngineConfig::default()
            .with_time_origin_ms(NGSIM_EPOCH_MS)
            .validate()
            .unwrap();
        let locator = RoadLocator::new(&config);
        let mut p = point(0.0, 10.0, 1);
        p.timestamp_ms = i64::MIN;
        assert_eq!(locator.locate(&p), Err(DataQualityIssue::TimestampOutOfRange(i64::MIN)));
    }

    #[test]
    fn test_local_hour_uses_offset() {
        // 2005-06-15 07:50:00 PDT, stamped one hour ahead in the dataset
        let timestamp_ms = 1_118_847_000_000 + MS_PER_HOUR;
        assert_eq!(local_hour(timestamp_ms, NGSIM_UTC_OFFSET_MS), Some(7));
        assert_eq!(local_hour(0, 0), Some(0));
        assert_eq!(local_hour(-1, 0), Some(23));
        assert_eq!(local_hour(i64::MAX, 1), None);
    }

    #[test]
    fn test_locator_selects_hours() {
        let config = EngineConfig::default()
            .with_hours([7])
            .with_utc_offset_ms(0)
            .validate()
            .unwrap();
        let locator = RoadLocator::new(&config);
        let mut morning = point(0.0, 10.0, 1);
        morning.timestamp_ms = 7 * MS_PER_HOUR + 5_000;
        assert!(locator.locate(&morning).is_ok());

        let mut noon = point(0.0, 10.0, 1);
        noon.timestamp_ms = 12 * MS_PER_HOUR;
        assert_eq!(locator.locate(&noon), Err(DataQualityIssue::HourExcluded(12)));
    }

    proptest! {
        #[test]
        fn prop_section_always_in_range(
            distance in 0.0f64..1.0e7,
            max_distance in 1.0f64..1.0e5,
            num_sections in 1u32..200,
        ) {
            prop_assume!((max_distance / num_sections as f64).floor() > 0.0);
            let b = bucketizer(max_distance, num_sections);
            let section = b.bucketize(distance).unwrap();
            prop_assert!(section < num_sections);
        }

        #[test]
        fn prop_lane_normalization_is_identity_outside_ramp(lane in any::<i32>()) {
            prop_assume!(lane != 7 && lane != 8);
            prop_assert_eq!(normalize_lane(lane), lane);
        }
    }
}
