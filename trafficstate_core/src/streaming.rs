//! The streaming path: watermarked incremental windowing.
//!
//! State is an explicit map from window id to per-cell accumulators plus a
//! maximum-observed-event-time cursor. Window `w` covers elapsed time
//! `[w * W, (w + 1) * W)` and moves through
//!
//! ```text
//!   OPEN ──(max_event_time >= end(w) + watermark)──► CLOSED ──► emitted + evicted
//! ```
//!
//! The watermark equals the window size. Advancing the cursor is the only
//! thing that closes windows, and the cursor never moves backward, so a
//! window is emitted at most once and never receives updates afterwards.

use crate::accumulator::StatAccumulator;
use crate::config::{OpenWindowPolicy, ValidatedConfig};
use crate::error::DataQualityIssue;
use crate::geometry::RoadLocator;
use crate::types::{DropCounters, StatRecord, TrajectoryPoint, WindowKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Lifecycle of a window as seen by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// Still accepting points (whether or not any arrived yet)
    Open,
    /// Past the watermark; emitted if it held state, and gone
    Closed,
}

/// A window emitted on closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedWindow {
    pub window_id: i64,
    /// Inclusive elapsed-time start (ms)
    pub start_ms: i64,
    /// Exclusive elapsed-time end (ms)
    pub end_ms: i64,
    /// One record per (section, lane) cell, sorted by key
    pub records: Vec<StatRecord<WindowKey>>,
}

/// What happened to a single ingested point.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Folded into an open window cell
    Folded(WindowKey),
    /// Its window had already closed; counted, not aggregated
    Late { window_id: i64 },
    /// Failed a quality check; counted, not aggregated
    Rejected(DataQualityIssue),
}

/// Outcome of one ingest plus every window the point caused to close.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub outcome: IngestOutcome,
    pub closed: Vec<ClosedWindow>,
}

/// Serializable open state, taken on shutdown under
/// [`OpenWindowPolicy::Checkpoint`] and fed back through
/// [`WatermarkedWindowAggregator::restore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatermarkCheckpoint {
    pub max_event_time_ms: Option<i64>,
    pub open: Vec<(WindowKey, StatAccumulator)>,
}

/// Summary returned by [`WatermarkedWindowAggregator::shutdown`].
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownReport {
    pub policy: OpenWindowPolicy,
    /// Open windows dropped (Discard) or handed back (Checkpoint)
    pub open_windows: usize,
    /// Points behind those open windows
    pub open_points: u64,
    pub checkpoint: Option<WatermarkCheckpoint>,
    pub drops: DropCounters,
    pub emitted_windows: u64,
}

type CellMap = HashMap<(u32, u32), StatAccumulator>;

/// Incremental window aggregator for out-of-order event streams.
#[derive(Debug, Clone)]
pub struct WatermarkedWindowAggregator {
    locator: RoadLocator,
    window_size_ms: i64,
    watermark_ms: i64,
    policy: OpenWindowPolicy,
    /// window id → (section, lane) → running statistic
    open: BTreeMap<i64, CellMap>,
    max_event_time_ms: Option<i64>,
    drops: DropCounters,
    emitted_windows: u64,
}

impl WatermarkedWindowAggregator {
    pub fn new(config: &ValidatedConfig) -> Self {
        Self {
            locator: RoadLocator::new(config),
            window_size_ms: config.window_size_ms(),
            watermark_ms: config.watermark_ms(),
            policy: config.config().open_window_policy,
            open: BTreeMap::new(),
            max_event_time_ms: None,
            drops: DropCounters::default(),
            emitted_windows: 0,
        }
    }

    /// Rebuilds an aggregator from a checkpoint taken on an earlier shutdown.
    pub fn restore(config: &ValidatedConfig, checkpoint: WatermarkCheckpoint) -> Self {
        let mut aggregator = Self::new(config);
        aggregator.max_event_time_ms = checkpoint.max_event_time_ms;
        for (key, acc) in checkpoint.open {
            if acc.is_empty()
                || aggregator.closing_edge_ms(key.window_id).is_none()
                || aggregator.window_state(key.window_id) == WindowState::Closed
            {
                continue;
            }
            aggregator
                .open
                .entry(key.window_id)
                .or_default()
                .entry((key.section_id, key.lane_id))
                .or_default()
                .merge(&acc);
        }
        aggregator
    }

    /// Streaming window id: `floor(elapsed_ms / window_ms)`.
    pub fn window_id(&self, elapsed_ms: i64) -> i64 {
        elapsed_ms.div_euclid(self.window_size_ms)
    }

    /// Inclusive start of a window in elapsed ms, saturating at the i64 range.
    pub fn window_start_ms(&self, window_id: i64) -> i64 {
        window_id.saturating_mul(self.window_size_ms)
    }

    /// Exclusive end of a window in elapsed ms, saturating at the i64 range.
    pub fn window_end_ms(&self, window_id: i64) -> i64 {
        window_id.saturating_add(1).saturating_mul(self.window_size_ms)
    }

    /// Event time at which a window closes: `end + watermark`. `None` when
    /// the start or the closing edge is not representable; such a window can
    /// never hold state.
    fn closing_edge_ms(&self, window_id: i64) -> Option<i64> {
        window_id.checked_mul(self.window_size_ms)?;
        window_id
            .checked_add(1)?
            .checked_mul(self.window_size_ms)?
            .checked_add(self.watermark_ms)
    }

    pub fn window_state(&self, window_id: i64) -> WindowState {
        match (self.max_event_time_ms, self.closing_edge_ms(window_id)) {
            (Some(max), Some(edge)) if max >= edge => WindowState::Closed,
            _ => WindowState::Open,
        }
    }

    /// Processes one point to completion: locate, late check, fold, advance
    /// the cursor, close and emit whatever the cursor passed.
    ///
    /// Rejected points do not move the cursor.
    pub fn ingest(&mut self, point: &TrajectoryPoint) -> IngestReport {
        let located = match self.locator.locate(point) {
            Ok(located) => located,
            Err(issue) => {
                tracing::trace!(vehicle_id = point.vehicle_id, %issue, "dropping point");
                self.drops.record(&issue);
                return IngestReport {
                    outcome: IngestOutcome::Rejected(issue),
                    closed: Vec::new(),
                };
            }
        };

        let window_id = self.window_id(located.elapsed_ms);
        if self.closing_edge_ms(window_id).is_none() {
            let issue = DataQualityIssue::TimestampOutOfRange(point.timestamp_ms);
            tracing::trace!(vehicle_id = point.vehicle_id, %issue, "dropping point");
            self.drops.record(&issue);
            return IngestReport {
                outcome: IngestOutcome::Rejected(issue),
                closed: Vec::new(),
            };
        }
        if self.window_state(window_id) == WindowState::Closed {
            self.drops.late += 1;
            tracing::trace!(window_id, elapsed_ms = located.elapsed_ms, "late point dropped");
            return IngestReport {
                outcome: IngestOutcome::Late { window_id },
                closed: Vec::new(),
            };
        }

        self.open
            .entry(window_id)
            .or_default()
            .entry((located.section_id, located.lane_id))
            .or_default()
            .fold(located.velocity, located.acceleration);

        let key = WindowKey {
            window_id,
            section_id: located.section_id,
            lane_id: located.lane_id,
        };
        IngestReport {
            outcome: IngestOutcome::Folded(key),
            closed: self.advance_event_time(located.elapsed_ms),
        }
    }

    /// Moves the cursor forward to `elapsed_ms` (never backward) and emits
    /// every window that became closed, in window order.
    pub fn advance_event_time(&mut self, elapsed_ms: i64) -> Vec<ClosedWindow> {
        let max = match self.max_event_time_ms {
            Some(current) if current >= elapsed_ms => return Vec::new(),
            _ => elapsed_ms,
        };
        self.max_event_time_ms = Some(max);

        // window w is closed iff (w + 1) * W <= max - watermark
        let first_open = max.saturating_sub(self.watermark_ms).div_euclid(self.window_size_ms);
        let still_open = self.open.split_off(&first_open);
        let closing = std::mem::replace(&mut self.open, still_open);

        closing
            .into_iter()
            .filter_map(|(window_id, cells)| self.emit(window_id, cells))
            .collect()
    }

    fn emit(&mut self, window_id: i64, cells: CellMap) -> Option<ClosedWindow> {
        let mut records: Vec<StatRecord<WindowKey>> = cells
            .into_iter()
            .filter_map(|((section_id, lane_id), acc)| {
                acc.finish(WindowKey {
                    window_id,
                    section_id,
                    lane_id,
                })
            })
            .collect();
        if records.is_empty() {
            return None;
        }
        records.sort_by_key(|record| record.key);
        self.emitted_windows += 1;

        tracing::debug!(window_id, cells = records.len(), "window closed");
        Some(ClosedWindow {
            window_id,
            start_ms: self.window_start_ms(window_id),
            end_ms: self.window_end_ms(window_id),
            records,
        })
    }

    /// Copies the open state without consuming it.
    pub fn checkpoint(&self) -> WatermarkCheckpoint {
        let mut open: Vec<(WindowKey, StatAccumulator)> = self
            .open
            .iter()
            .flat_map(|(window_id, cells)| {
                cells.iter().map(move |((section_id, lane_id), acc)| {
                    (
                        WindowKey {
                            window_id: *window_id,
                            section_id: *section_id,
                            lane_id: *lane_id,
                        },
                        *acc,
                    )
                })
            })
            .collect();
        open.sort_by_key(|(key, _)| *key);
        WatermarkCheckpoint {
            max_event_time_ms: self.max_event_time_ms,
            open,
        }
    }

    /// Stops the aggregator. Nothing past the last closed window is emitted;
    /// open windows are discarded or checkpointed per the configured policy.
    pub fn shutdown(self) -> ShutdownReport {
        let open_windows = self.open.len();
        let open_points: u64 = self
            .open
            .values()
            .flat_map(|cells| cells.values())
            .map(|acc| acc.count)
            .sum();

        let checkpoint = match self.policy {
            OpenWindowPolicy::Discard => {
                if open_windows > 0 {
                    tracing::warn!(open_windows, open_points, "discarding open windows on shutdown");
                }
                None
            }
            OpenWindowPolicy::Checkpoint => {
                tracing::info!(open_windows, open_points, "checkpointing open windows on shutdown");
                Some(self.checkpoint())
            }
        };

        ShutdownReport {
            policy: self.policy,
            open_windows,
            open_points,
            checkpoint,
            drops: self.drops,
            emitted_windows: self.emitted_windows,
        }
    }

    pub fn max_event_time_ms(&self) -> Option<i64> {
        self.max_event_time_ms
    }

    /// Number of windows holding state.
    pub fn open_windows(&self) -> usize {
        self.open.len()
    }

    /// Number of (window, section, lane) accumulators alive.
    pub fn open_cells(&self) -> usize {
        self.open.values().map(|cells| cells.len()).sum()
    }

    pub fn drops(&self) -> &DropCounters {
        &self.drops
    }

    pub fn emitted_windows(&self) -> u64 {
        self.emitted_windows
    }
}
