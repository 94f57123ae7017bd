//! Batch window aggregation: fine buckets → coarse time windows.
//!
//! Window statistics are the **mean of the per-bucket averages** by default,
//! not a count-weighted mean of the underlying points. Density is the sum of
//! the fine counts. [`Reaggregation::CountWeighted`] is the opt-in
//! alternative.

use crate::accumulator::{round_to, StatAccumulator, ACCELERATION_DECIMALS, VELOCITY_DECIMALS};
use crate::config::{BatchRange, Reaggregation, ValidatedConfig};
use crate::types::{SectionKey, StatRecord, WindowKey};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};

/// Associative accumulator over fine records of one window cell.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowAccumulator {
    /// Sum of per-bucket velocity averages
    velocity_mean_sum: f64,
    /// Sum of per-bucket acceleration averages
    acceleration_mean_sum: f64,
    /// Number of fine buckets folded
    buckets: u64,
    /// Count-weighted sums; `count` is the number of underlying points
    weighted: StatAccumulator,
}

impl WindowAccumulator {
    /// Folds one fine record.
    pub fn fold(&mut self, record: &StatRecord<SectionKey>) {
        let weight = record.count as f64;
        self.velocity_mean_sum += record.avg_velocity;
        self.acceleration_mean_sum += record.avg_acceleration;
        self.buckets += 1;
        self.weighted.velocity_sum += record.avg_velocity * weight;
        self.weighted.acceleration_sum += record.avg_acceleration * weight;
        self.weighted.count += record.count;
    }

    pub fn merge(&mut self, other: &WindowAccumulator) {
        self.velocity_mean_sum += other.velocity_mean_sum;
        self.acceleration_mean_sum += other.acceleration_mean_sum;
        self.buckets += other.buckets;
        self.weighted.merge(&other.weighted);
    }

    /// Number of fine buckets folded so far.
    pub fn buckets(&self) -> u64 {
        self.buckets
    }

    pub fn finish(&self, key: WindowKey, mode: Reaggregation) -> Option<StatRecord<WindowKey>> {
        if self.buckets == 0 || self.weighted.count == 0 {
            return None;
        }
        let (velocity, acceleration) = match mode {
            Reaggregation::MeanOfMeans => (
                self.velocity_mean_sum / self.buckets as f64,
                self.acceleration_mean_sum / self.buckets as f64,
            ),
            Reaggregation::CountWeighted => (
                self.weighted.mean_velocity()?,
                self.weighted.mean_acceleration()?,
            ),
        };
        Some(StatRecord {
            key,
            avg_velocity: round_to(velocity, VELOCITY_DECIMALS),
            avg_acceleration: round_to(acceleration, ACCELERATION_DECIMALS),
            count: self.weighted.count,
        })
    }
}

/// Result of a batch window pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowOutput {
    /// Window records sorted by key
    pub records: Vec<StatRecord<WindowKey>>,
    /// Fine records outside the range or inside the trailing guard. These
    /// are filtered buckets, not dropped points, so they stay out of
    /// [`DropCounters`](crate::types::DropCounters).
    pub out_of_range: u64,
}

impl WindowOutput {
    /// Groups the records by window id.
    pub fn by_window(&self) -> BTreeMap<i64, Vec<StatRecord<WindowKey>>> {
        let mut grouped: BTreeMap<i64, Vec<StatRecord<WindowKey>>> = BTreeMap::new();
        for record in &self.records {
            grouped.entry(record.key.window_id).or_default().push(record.clone());
        }
        grouped
    }
}

/// Re-aggregates fine records over a batch range.
#[derive(Debug, Clone)]
pub struct WindowAggregator {
    range: BatchRange,
    window_size_ms: i64,
    trailing_guard_ms: i64,
    mode: Reaggregation,
    windows: HashMap<WindowKey, WindowAccumulator>,
    out_of_range: u64,
}

impl WindowAggregator {
    pub fn new(config: &ValidatedConfig, range: BatchRange) -> Self {
        Self {
            range,
            window_size_ms: config.window_size_ms(),
            trailing_guard_ms: config.config().trailing_guard_ms,
            mode: config.config().reaggregation,
            windows: HashMap::new(),
            out_of_range: 0,
        }
    }

    /// Batch window id: `floor(elapsed_ms / window_ms)`, the same window
    /// `[w * W, (w + 1) * W)` the streaming path uses.
    pub fn window_id(&self, elapsed_ms: i64) -> i64 {
        elapsed_ms.div_euclid(self.window_size_ms)
    }

    /// Folds one fine record. Returns the window cell it landed in, or `None`
    /// if the record falls outside the guarded range.
    pub fn ingest(&mut self, record: &StatRecord<SectionKey>) -> Option<WindowKey> {
        if !self.range.contains(record.key.time_key, self.trailing_guard_ms) {
            self.out_of_range += 1;
            return None;
        }
        let key = WindowKey {
            window_id: self.window_id(record.key.time_key),
            section_id: record.key.section_id,
            lane_id: record.key.lane_id,
        };
        self.windows.entry(key).or_default().fold(record);
        Some(key)
    }

    pub fn ingest_all<'a>(&mut self, records: impl IntoIterator<Item = &'a StatRecord<SectionKey>>) {
        for record in records {
            self.ingest(record);
        }
    }

    /// Absorbs another partition's partial state.
    pub fn merge(&mut self, other: WindowAggregator) {
        for (key, partial) in other.windows {
            self.windows.entry(key).or_default().merge(&partial);
        }
        self.out_of_range += other.out_of_range;
    }

    pub fn finish(self) -> WindowOutput {
        let mode = self.mode;
        let mut records: Vec<StatRecord<WindowKey>> = self
            .windows
            .into_iter()
            .filter_map(|(key, acc)| acc.finish(key, mode))
            .collect();
        records.sort_by_key(|record| record.key);
        WindowOutput {
            records,
            out_of_range: self.out_of_range,
        }
    }
}

/// Re-aggregates fine records in parallel chunks and merges the partials.
pub fn aggregate_windows(
    config: &ValidatedConfig,
    range: BatchRange,
    records: &[StatRecord<SectionKey>],
    chunk_size: usize,
) -> WindowOutput {
    let template = WindowAggregator::new(config, range);
    records
        .par_chunks(chunk_size.max(1))
        .map(|chunk| {
            let mut aggregator = template.clone();
            aggregator.ingest_all(chunk);
            aggregator
        })
        .reduce(
            || template.clone(),
            |mut left, right| {
                left.merge(right);
                left
            },
        )
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use approx::assert_relative_eq;

    fn fine(time_key: i64, section_id: u32, lane_id: u32, avg_velocity: f64, count: u64) -> StatRecord<SectionKey> {
        StatRecord {
            key: SectionKey { time_key, section_id, lane_id },
            avg_velocity,
            avg_acceleration: avg_velocity / 10.0,
            count,
        }
    }

    fn config(mode: Reaggregation) -> ValidatedConfig {
        EngineConfig::default()
            .with_window_secs(30)
            .with_reaggregation(mode)
            .validate()
            .unwrap()
    }

    #[test]
    fn test_mean_of_means_ignores_bucket_sizes() {
        let range = BatchRange::new(0, 120).unwrap();
        let mut aggregator = WindowAggregator::new(&config(Reaggregation::MeanOfMeans), range);
        aggregator.ingest(&fine(1_000, 3, 2, 20.0, 1));
        aggregator.ingest(&fine(1_100, 3, 2, 60.0, 9));

        let output = aggregator.finish();
        assert_eq!(output.records.len(), 1);
        let record = &output.records[0];
        assert_eq!(record.key, WindowKey { window_id: 0, section_id: 3, lane_id: 2 });
        assert_eq!(record.avg_velocity, 40.0);
        assert_relative_eq!(record.avg_acceleration, 4.0);
        assert_eq!(record.count, 10);
    }

    #[test]
    fn test_count_weighted_mode() {
        let range = BatchRange::new(0, 120).unwrap();
        let mut aggregator = WindowAggregator::new(&config(Reaggregation::CountWeighted), range);
        aggregator.ingest(&fine(1_000, 3, 2, 20.0, 1));
        aggregator.ingest(&fine(1_100, 3, 2, 60.0, 9));

        let record = &aggregator.finish().records[0];
        assert_eq!(record.avg_velocity, 56.0);
        assert_relative_eq!(record.avg_acceleration, 5.6);
        assert_eq!(record.count, 10);
    }

    #[test]
    fn test_window_id_truncates() {
        let aggregator = WindowAggregator::new(&config(Reaggregation::MeanOfMeans), BatchRange::new(0, 600).unwrap());
        assert_eq!(aggregator.window_id(0), 0);
        assert_eq!(aggregator.window_id(15_000), 0);
        assert_eq!(aggregator.window_id(29_999), 0);
        assert_eq!(aggregator.window_id(30_000), 1);
        assert_eq!(aggregator.window_id(59_999), 1);
        assert_eq!(aggregator.window_id(60_000), 2);
        assert_eq!(aggregator.window_id(-1), -1);
    }

    #[test]
    fn test_window_id_matches_streaming_windows() {
        let cfg = config(Reaggregation::MeanOfMeans);
        let batch = WindowAggregator::new(&cfg, BatchRange::new(0, 600).unwrap());
        let streaming = crate::streaming::WatermarkedWindowAggregator::new(&cfg);
        for elapsed_ms in [0, 1, 14_999, 15_000, 29_999, 30_000, 44_999, 45_000, 599_999] {
            assert_eq!(batch.window_id(elapsed_ms), streaming.window_id(elapsed_ms));
        }
    }

    #[test]
    fn test_range_and_trailing_guard_filter() {
        let range = BatchRange::new(10, 70).unwrap();
        let mut aggregator = WindowAggregator::new(&config(Reaggregation::MeanOfMeans), range);
        assert!(aggregator.ingest(&fine(9_999, 0, 1, 30.0, 1)).is_none());
        assert!(aggregator.ingest(&fine(10_000, 0, 1, 30.0, 1)).is_some());
        assert!(aggregator.ingest(&fine(69_954, 0, 1, 30.0, 1)).is_some());
        // inside the 45 ms guard
        assert!(aggregator.ingest(&fine(69_955, 0, 1, 30.0, 1)).is_none());
        assert!(aggregator.ingest(&fine(70_000, 0, 1, 30.0, 1)).is_none());

        let output = aggregator.finish();
        assert_eq!(output.out_of_range, 3);
        assert_eq!(output.records.iter().map(|r| r.count).sum::<u64>(), 2);
    }

    #[test]
    fn test_parallel_chunks_match_sequential() {
        let records: Vec<StatRecord<SectionKey>> = (0..200)
            .map(|i| fine(i * 500, (i % 5) as u32, 1 + (i % 3) as u32, 10.0 + (i % 11) as f64, 1 + (i % 4) as u64))
            .collect();
        let range = BatchRange::new(0, 100).unwrap();
        let cfg = config(Reaggregation::MeanOfMeans);

        let mut sequential = WindowAggregator::new(&cfg, range);
        sequential.ingest_all(&records);
        let sequential = sequential.finish();
        let parallel = aggregate_windows(&cfg, range, &records, 17);

        assert_eq!(sequential.records.len(), parallel.records.len());
        assert_eq!(sequential.out_of_range, parallel.out_of_range);
        for (a, b) in sequential.records.iter().zip(&parallel.records) {
            assert_eq!(a.key, b.key);
            assert_eq!(a.count, b.count);
            assert!((a.avg_velocity - b.avg_velocity).abs() <= 0.1);
        }
    }

    #[test]
    fn test_by_window_groups() {
        let range = BatchRange::new(0, 120).unwrap();
        let mut aggregator = WindowAggregator::new(&config(Reaggregation::MeanOfMeans), range);
        aggregator.ingest(&fine(0, 0, 1, 30.0, 1));
        aggregator.ingest(&fine(0, 1, 1, 30.0, 1));
        aggregator.ingest(&fine(60_000, 0, 1, 30.0, 1));

        let grouped = aggregator.finish().by_window();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&0].len(), 2);
        assert_eq!(grouped[&2].len(), 1);
    }
}
