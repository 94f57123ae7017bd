//! Dense rendering of one window's statistics into lane × section grids.

use crate::config::{ValidatedConfig, FREE_FLOW_VELOCITY, RAMP_LANE};
use crate::types::{CellKey, StatRecord, WindowKey};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The three quantities rendered per cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Velocity,
    Density,
    Acceleration,
}

/// Per-cell value transform applied while rendering.
///
/// Extension point only: the shipped [`IdentityScaler`] returns its input.
pub trait CellScaler: Send + Sync {
    fn scale(&self, value: f64, channel: Channel) -> f64;
}

/// Leaves every value unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityScaler;

impl CellScaler for IdentityScaler {
    fn scale(&self, value: f64, _channel: Channel) -> f64 {
        value
    }
}

/// Traffic state of one window: three `[num_lanes x num_sections]` grids.
///
/// Row `i` is lane `i + 1`, column `j` is section `j`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficStateMatrix {
    pub window_id: i64,
    pub velocity: DMatrix<f64>,
    pub density: DMatrix<f64>,
    pub acceleration: DMatrix<f64>,
}

impl TrafficStateMatrix {
    /// `(num_lanes, num_sections)`
    pub fn shape(&self) -> (usize, usize) {
        self.velocity.shape()
    }

    pub fn channel(&self, channel: Channel) -> &DMatrix<f64> {
        match channel {
            Channel::Velocity => &self.velocity,
            Channel::Density => &self.density,
            Channel::Acceleration => &self.acceleration,
        }
    }

    /// Stacked view `[lane][section][velocity, density, acceleration]`.
    pub fn channels(&self) -> Vec<Vec<[f64; 3]>> {
        let (lanes, sections) = self.shape();
        (0..lanes)
            .map(|lane| {
                (0..sections)
                    .map(|section| {
                        [
                            self.velocity[(lane, section)],
                            self.density[(lane, section)],
                            self.acceleration[(lane, section)],
                        ]
                    })
                    .collect()
            })
            .collect()
    }
}

/// Fills dense grids from a window's statistic records.
#[derive(Debug, Clone)]
pub struct MatrixRenderer<S = IdentityScaler> {
    num_lanes: u32,
    num_sections: u32,
    with_ramp: bool,
    scaler: S,
}

impl MatrixRenderer<IdentityScaler> {
    pub fn new(config: &ValidatedConfig) -> Self {
        Self::with_scaler(config, IdentityScaler)
    }
}

impl<S: CellScaler> MatrixRenderer<S> {
    pub fn with_scaler(config: &ValidatedConfig, scaler: S) -> Self {
        Self {
            num_lanes: config.num_lanes(),
            num_sections: config.num_sections(),
            with_ramp: config.with_ramp(),
            scaler,
        }
    }

    /// Overrides ramp inclusion, e.g. to render both variants of one window.
    pub fn ramp(mut self, with_ramp: bool) -> Self {
        self.with_ramp = with_ramp;
        self
    }

    /// Renders one window.
    ///
    /// Velocity cells start at the free-flow default, density and
    /// acceleration at zero. Records for the ramp lane are skipped when the
    /// ramp is excluded; a section id equal to `num_sections` is folded into
    /// the last column. Records that still fall outside the grid are skipped.
    pub fn render<K: CellKey>(&self, window_id: i64, records: &[StatRecord<K>]) -> TrafficStateMatrix {
        let lanes = self.num_lanes as usize;
        let sections = self.num_sections as usize;
        let free_flow = self.scaler.scale(FREE_FLOW_VELOCITY, Channel::Velocity);

        let mut velocity = DMatrix::from_element(lanes, sections, free_flow);
        let mut density = DMatrix::zeros(lanes, sections);
        let mut acceleration = DMatrix::zeros(lanes, sections);

        for record in records {
            let lane_id = record.key.lane_id();
            if !self.with_ramp && lane_id == RAMP_LANE {
                continue;
            }

            let mut section_id = record.key.section_id();
            if section_id == self.num_sections {
                section_id = self.num_sections - 1;
            }
            if lane_id < 1 || lane_id > self.num_lanes || section_id >= self.num_sections {
                tracing::warn!(window_id, lane_id, section_id, "record outside grid skipped");
                continue;
            }

            let cell = ((lane_id - 1) as usize, section_id as usize);
            velocity[cell] = self.scaler.scale(record.avg_velocity, Channel::Velocity);
            density[cell] = self.scaler.scale(record.count as f64, Channel::Density);
            acceleration[cell] = self.scaler.scale(record.avg_acceleration, Channel::Acceleration);
        }

        TrafficStateMatrix {
            window_id,
            velocity,
            density,
            acceleration,
        }
    }
}

/// Batch output pivoted with lanes as columns:
/// `section → lane → value` for one window and channel.
pub fn pivot_lanes(
    records: &[StatRecord<WindowKey>],
    window_id: i64,
    channel: Channel,
) -> BTreeMap<u32, BTreeMap<u32, f64>> {
    let mut pivot: BTreeMap<u32, BTreeMap<u32, f64>> = BTreeMap::new();
    for record in records.iter().filter(|r| r.key.window_id == window_id) {
        let value = match channel {
            Channel::Velocity => record.avg_velocity,
            Channel::Density => record.count as f64,
            Channel::Acceleration => record.avg_acceleration,
        };
        pivot
            .entry(record.key.section_id)
            .or_default()
            .insert(record.key.lane_id, value);
    }
    pivot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn record(section_id: u32, lane_id: u32, avg_velocity: f64, count: u64) -> StatRecord<WindowKey> {
        StatRecord {
            key: WindowKey { window_id: 4, section_id, lane_id },
            avg_velocity,
            avg_acceleration: -0.25,
            count,
        }
    }

    fn renderer(with_ramp: bool) -> MatrixRenderer {
        let config = EngineConfig::default()
            .with_road(1000.0, 10)
            .with_lanes(6)
            .with_ramp(with_ramp)
            .validate()
            .unwrap();
        MatrixRenderer::new(&config)
    }

    #[test]
    fn test_empty_window_uses_defaults() {
        let matrix = renderer(true).render::<WindowKey>(0, &[]);
        assert_eq!(matrix.shape(), (6, 10));
        assert!(matrix.velocity.iter().all(|v| *v == FREE_FLOW_VELOCITY));
        assert!(matrix.density.iter().all(|v| *v == 0.0));
        assert!(matrix.acceleration.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_record_lands_in_lane_row_section_column() {
        let matrix = renderer(true).render(4, &[record(3, 2, 42.5, 7)]);
        assert_eq!(matrix.window_id, 4);
        assert_eq!(matrix.velocity[(1, 3)], 42.5);
        assert_eq!(matrix.density[(1, 3)], 7.0);
        assert_eq!(matrix.acceleration[(1, 3)], -0.25);
        assert_eq!(matrix.velocity[(0, 3)], FREE_FLOW_VELOCITY);
    }

    #[test]
    fn test_ramp_lane_excluded_without_ramp() {
        let matrix = renderer(false).render(4, &[record(2, 6, 25.0, 5)]);
        assert_eq!(matrix.density[(5, 2)], 0.0);
        assert_eq!(matrix.velocity[(5, 2)], FREE_FLOW_VELOCITY);

        let matrix = renderer(true).render(4, &[record(2, 6, 25.0, 5)]);
        assert_eq!(matrix.density[(5, 2)], 5.0);
    }

    #[test]
    fn test_overflow_section_folds_into_last_column() {
        let matrix = renderer(true).render(4, &[record(10, 1, 33.0, 2)]);
        assert_eq!(matrix.velocity[(0, 9)], 33.0);
        assert_eq!(matrix.density[(0, 9)], 2.0);
    }

    #[test]
    fn test_out_of_grid_records_skipped() {
        let matrix = renderer(true).render(4, &[record(11, 1, 33.0, 2), record(0, 7, 33.0, 2)]);
        assert!(matrix.density.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_rendering_is_idempotent() {
        let records = vec![record(0, 1, 10.0, 1), record(9, 6, 20.0, 3), record(10, 3, 30.0, 2)];
        let r = renderer(false);
        assert_eq!(r.render(4, &records), r.render(4, &records));
    }

    #[test]
    fn test_ramp_override() {
        let matrix = renderer(true).ramp(false).render(4, &[record(2, 6, 25.0, 5)]);
        assert_eq!(matrix.density[(5, 2)], 0.0);
    }

    #[test]
    fn test_channels_view() {
        let matrix = renderer(true).render(4, &[record(1, 1, 50.0, 4)]);
        let channels = matrix.channels();
        assert_eq!(channels.len(), 6);
        assert_eq!(channels[0].len(), 10);
        assert_eq!(channels[0][1], [50.0, 4.0, -0.25]);
        assert_eq!(channels[5][9], [FREE_FLOW_VELOCITY, 0.0, 0.0]);
    }

    struct Doubling;

    impl CellScaler for Doubling {
        fn scale(&self, value: f64, channel: Channel) -> f64 {
            match channel {
                Channel::Density => value,
                _ => value * 2.0,
            }
        }
    }

    #[test]
    fn test_custom_scaler_applies_to_defaults_and_cells() {
        let config = EngineConfig::default().with_road(1000.0, 10).validate().unwrap();
        let matrix = MatrixRenderer::with_scaler(&config, Doubling).render(0, &[record(0, 1, 10.0, 3)]);
        assert_eq!(matrix.velocity[(0, 0)], 20.0);
        assert_eq!(matrix.density[(0, 0)], 3.0);
        assert_eq!(matrix.velocity[(1, 1)], 2.0 * FREE_FLOW_VELOCITY);
    }

    #[test]
    fn test_pivot_lanes() {
        let mut records = vec![record(0, 1, 10.0, 1), record(0, 2, 20.0, 2), record(1, 1, 30.0, 3)];
        records.push(StatRecord {
            key: WindowKey { window_id: 5, section_id: 0, lane_id: 1 },
            avg_velocity: 99.0,
            avg_acceleration: 0.0,
            count: 1,
        });

        let pivot = pivot_lanes(&records, 4, Channel::Velocity);
        assert_eq!(pivot.len(), 2);
        assert_eq!(pivot[&0][&1], 10.0);
        assert_eq!(pivot[&0][&2], 20.0);
        let density = pivot_lanes(&records, 4, Channel::Density);
        assert_eq!(density[&1][&1], 3.0);
    }
}
