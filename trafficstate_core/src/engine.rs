//! Single entry point over both aggregation paths.
//!
//! ```text
//!                       ┌──────────────── batch ────────────────┐
//!   points ──► RoadLocator ──► FineAggregator ──► WindowAggregator ──► MatrixRenderer
//!                 │
//!                 └──────────── streaming ──► WatermarkedWindowAggregator ──► MatrixRenderer
//! ```
//!
//! Both paths share one validated configuration, so bucketing, lane
//! normalization and rendering rules cannot drift apart.

use crate::codec::{self, WindowBounds};
use crate::config::{BatchRange, EngineConfig, ValidatedConfig};
use crate::error::ConfigError;
use crate::fine::{aggregate_partitions, FineAggregator, FineOutput};
use crate::matrix::{CellScaler, IdentityScaler, MatrixRenderer, TrafficStateMatrix};
use crate::streaming::{ClosedWindow, WatermarkCheckpoint, WatermarkedWindowAggregator};
use crate::types::TrajectoryPoint;
use crate::window::{aggregate_windows, WindowOutput};
use std::collections::BTreeMap;

/// Fine records per parallel chunk during batch re-aggregation.
pub const WINDOW_CHUNK_SIZE: usize = 4096;

/// Everything a batch run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    pub fine: FineOutput,
    pub windows: WindowOutput,
    /// One rendered matrix per window that received data
    pub snapshots: BTreeMap<i64, TrafficStateMatrix>,
}

/// The aggregation engine.
#[derive(Debug, Clone)]
pub struct TrafficStateEngine<S = IdentityScaler> {
    config: ValidatedConfig,
    renderer: MatrixRenderer<S>,
}

impl TrafficStateEngine<IdentityScaler> {
    /// Validates `config` and builds an engine with the identity scaler.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        let renderer = MatrixRenderer::new(&config);
        Ok(Self { config, renderer })
    }
}

impl<S: CellScaler> TrafficStateEngine<S> {
    /// Builds an engine that passes every rendered cell through `scaler`.
    pub fn with_scaler(config: EngineConfig, scaler: S) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        let renderer = MatrixRenderer::with_scaler(&config, scaler);
        Ok(Self { config, renderer })
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn renderer(&self) -> &MatrixRenderer<S> {
        &self.renderer
    }

    /// Runs fine aggregation, window re-aggregation and rendering over one
    /// in-memory batch.
    pub fn run_batch(&self, points: &[TrajectoryPoint], range: BatchRange) -> BatchOutput {
        let mut fine = FineAggregator::new(&self.config);
        fine.ingest_all(points);
        self.finish_batch(fine.finish(), range)
    }

    /// Same as [`run_batch`](Self::run_batch) but fine-aggregates each
    /// partition in parallel before merging.
    pub fn run_batch_partitioned(&self, partitions: &[Vec<TrajectoryPoint>], range: BatchRange) -> BatchOutput {
        self.finish_batch(aggregate_partitions(&self.config, partitions), range)
    }

    fn finish_batch(&self, fine: FineOutput, range: BatchRange) -> BatchOutput {
        let windows = aggregate_windows(&self.config, range, &fine.records, WINDOW_CHUNK_SIZE);
        let snapshots: BTreeMap<i64, TrafficStateMatrix> = windows
            .by_window()
            .into_iter()
            .map(|(window_id, records)| (window_id, self.renderer.render(window_id, &records)))
            .collect();

        tracing::debug!(
            fine_records = fine.records.len(),
            window_records = windows.records.len(),
            snapshots = snapshots.len(),
            dropped = fine.drops.total(),
            out_of_range = windows.out_of_range,
            "batch run complete"
        );

        BatchOutput {
            fine,
            windows,
            snapshots,
        }
    }

    /// A fresh streaming aggregator bound to this engine's configuration.
    pub fn streaming(&self) -> WatermarkedWindowAggregator {
        WatermarkedWindowAggregator::new(&self.config)
    }

    /// A streaming aggregator resumed from a shutdown checkpoint.
    pub fn resume_streaming(&self, checkpoint: WatermarkCheckpoint) -> WatermarkedWindowAggregator {
        WatermarkedWindowAggregator::restore(&self.config, checkpoint)
    }

    /// Renders a window emitted by the streaming path.
    pub fn render_closed(&self, window: &ClosedWindow) -> TrafficStateMatrix {
        self.renderer.render(window.window_id, &window.records)
    }

    /// Renders and encodes a closed window as a `(key, value)` message.
    pub fn encode_closed(&self, window: &ClosedWindow) -> Result<(Vec<u8>, Vec<u8>), serde_json::Error> {
        let bounds = WindowBounds {
            id: window.window_id,
            start_ms: window.start_ms,
            end_ms: window.end_ms,
        };
        codec::encode_snapshot(bounds, &self.render_closed(window))
    }
}
