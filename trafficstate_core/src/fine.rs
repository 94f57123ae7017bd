//! Fine aggregation: raw points sharing (time, section, lane) → one statistic.
//!
//! The reduction is sum + count, so aggregators built on disjoint partitions
//! can be merged in any order before the final division.

use crate::accumulator::StatAccumulator;
use crate::config::ValidatedConfig;
use crate::error::DataQualityIssue;
use crate::geometry::RoadLocator;
use crate::types::{DropCounters, SectionKey, StatRecord, TrajectoryPoint};
use rayon::prelude::*;
use std::collections::HashMap;

/// Result of a fine aggregation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FineOutput {
    /// One record per (elapsed time, section, lane), sorted by key
    pub records: Vec<StatRecord<SectionKey>>,
    pub drops: DropCounters,
}

/// Partition-local fine aggregator.
#[derive(Debug, Clone)]
pub struct FineAggregator {
    locator: RoadLocator,
    buckets: HashMap<SectionKey, StatAccumulator>,
    drops: DropCounters,
}

impl FineAggregator {
    pub fn new(config: &ValidatedConfig) -> Self {
        Self::from_locator(RoadLocator::new(config))
    }

    pub fn from_locator(locator: RoadLocator) -> Self {
        Self {
            locator,
            buckets: HashMap::new(),
            drops: DropCounters::default(),
        }
    }

    /// Folds one point into its bucket.
    ///
    /// A point failing a quality check is counted and skipped; the issue is
    /// returned so callers can inspect it.
    pub fn ingest(&mut self, point: &TrajectoryPoint) -> Result<SectionKey, DataQualityIssue> {
        let located = match self.locator.locate(point) {
            Ok(located) => located,
            Err(issue) => {
                tracing::trace!(vehicle_id = point.vehicle_id, %issue, "dropping point");
                self.drops.record(&issue);
                return Err(issue);
            }
        };

        let key = SectionKey {
            time_key: located.elapsed_ms,
            section_id: located.section_id,
            lane_id: located.lane_id,
        };
        self.buckets
            .entry(key)
            .or_default()
            .fold(located.velocity, located.acceleration);
        Ok(key)
    }

    /// Folds every point, skipping the ones that fail quality checks.
    pub fn ingest_all<'a>(&mut self, points: impl IntoIterator<Item = &'a TrajectoryPoint>) {
        for point in points {
            let _ = self.ingest(point);
        }
    }

    /// Absorbs another partition's partial state.
    pub fn merge(&mut self, other: FineAggregator) {
        for (key, partial) in other.buckets {
            self.buckets.entry(key).or_default().merge(&partial);
        }
        self.drops.merge(&other.drops);
    }

    /// Number of distinct buckets seen so far.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn drops(&self) -> &DropCounters {
        &self.drops
    }

    /// Divides every bucket and returns the records sorted by key.
    pub fn finish(self) -> FineOutput {
        let mut records: Vec<StatRecord<SectionKey>> = self
            .buckets
            .into_iter()
            .filter_map(|(key, acc)| acc.finish(key))
            .collect();
        records.sort_by_key(|record| record.key);
        FineOutput {
            records,
            drops: self.drops,
        }
    }
}

/// Fine-aggregates independent partitions in parallel and merges the partials.
pub fn aggregate_partitions(config: &ValidatedConfig, partitions: &[Vec<TrajectoryPoint>]) -> FineOutput {
    let locator = RoadLocator::new(config);
    partitions
        .par_iter()
        .map(|partition| {
            let mut aggregator = FineAggregator::from_locator(locator.clone());
            aggregator.ingest_all(partition);
            aggregator
        })
        .reduce(
            || FineAggregator::from_locator(locator.clone()),
            |mut left, right| {
                left.merge(right);
                left
            },
        )
        .finish()
}
