//! Scenario runner - drives the engine through simulated traffic.
//!
//! Every scenario runs the same pipeline and checks the same invariants;
//! scenarios only differ in road setup and delivery profile.
//!
//! ```text
//!   TrafficOracle ──► points ──┬──► run_batch ───────────────► batch checks
//!                              │
//!                              └──► JitterDelivery ──┬──► streaming aggregator ──► stream checks
//!                                                    └──► StreamingRuntime (bus) ─► equivalence
//! ```

use crate::delivery::{DeliveryProfile, JitterDelivery};
use crate::error::SimError;
use crate::oracle::{SlowZone, TrafficOracle};
use crate::scenarios::ScenarioId;

use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use trafficstate_core::codec::{decode_snapshot_key, encode_points};
use trafficstate_core::config::{FREE_FLOW_VELOCITY, NGSIM_EPOCH_MS, RAMP_LANE};
use trafficstate_core::engine::BatchOutput;
use trafficstate_core::{
    BatchRange, ClosedWindow, EngineConfig, RuntimeConfig, RuntimeReport, ShutdownReport, StreamingRuntime,
    TrafficStateEngine, TrafficStateMatrix, TrajectoryPoint,
};
use trafficstate_env::{channel_bus, MemorySink};

/// NGSIM sampling period (10 Hz).
pub const SAMPLE_INTERVAL_MS: i64 = 100;

/// Points per bus payload.
pub const PAYLOAD_BATCH: usize = 50;

const BUS_CAPACITY: usize = 64;
const PHYSICS_SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;
const DELIVERY_SEED_MIX: u64 = 0x2545_f491_4f6c_dd1d;

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub points_generated: u64,
    pub fine_records: u64,
    pub batch_windows: u64,
    pub streamed_windows: u64,
    pub published_over_bus: u64,
    pub late_drops: u64,
    pub quality_drops: u64,
    pub open_windows_at_shutdown: u64,
    pub open_points_at_shutdown: u64,

    /// Count-weighted velocity inside the slow zone (congestion scenario)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub congested_velocity: Option<f64>,

    /// Count-weighted velocity upstream of the slow zone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_velocity: Option<f64>,
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub scenario: ScenarioId,
    pub seed: u64,
    pub passed: bool,
    pub failure_reason: Option<String>,
    pub metrics: ScenarioMetrics,
    pub batch_snapshots: BTreeMap<i64, TrafficStateMatrix>,
    pub streamed: Vec<(ClosedWindow, TrafficStateMatrix)>,
}

/// Road setup and delivery profile of one scenario.
#[derive(Debug, Clone)]
struct ScenarioPlan {
    config: EngineConfig,
    delivery: DeliveryProfile,
    slow_zone: Option<SlowZone>,
    main_vehicles: usize,
    ramp_vehicles: usize,
}

impl ScenarioPlan {
    fn for_scenario(scenario: ScenarioId, base: &EngineConfig) -> Self {
        let road = base.max_distance;
        let window_ms = base.window_size_secs as i64 * 1000;
        let mut plan = Self {
            config: base.clone(),
            delivery: DeliveryProfile::default(),
            slow_zone: None,
            main_vehicles: 40,
            ramp_vehicles: 0,
        };

        match scenario {
            ScenarioId::SteadyFlow => {}
            ScenarioId::CongestionWave => {
                plan.slow_zone = Some(SlowZone {
                    start_ft: 0.3 * road,
                    end_ft: 0.65 * road,
                    speed_cap: 15.0,
                });
            }
            ScenarioId::LateBurst => {
                plan.delivery = DeliveryProfile {
                    max_jitter_ms: 2_000,
                    straggler_rate: 0.05,
                    straggler_delay_ms: 2 * window_ms + window_ms / 2,
                };
            }
            ScenarioId::RampMerge => {
                plan.main_vehicles = 30;
                plan.ramp_vehicles = 16;
                plan.config.with_ramp = false;
            }
        }
        plan
    }
}

/// Runs traffic scenarios.
pub struct ScenarioRunner {
    /// Master seed
    seed: u64,

    /// Simulated span in seconds
    duration_secs: i64,

    /// Base engine configuration; scenarios may adjust it
    engine_config: EngineConfig,
}

impl ScenarioRunner {
    /// Creates a runner with the US-101 defaults and NGSIM timestamps.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            duration_secs: 180,
            engine_config: EngineConfig::default().with_time_origin_ms(NGSIM_EPOCH_MS),
        }
    }

    /// Sets the simulated duration.
    pub fn with_duration(mut self, secs: i64) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Replaces the base engine configuration.
    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine_config
    }

    /// Runs a scenario and returns the result.
    ///
    /// # Errors
    /// Only setup and transport failures are errors; broken invariants make
    /// the result fail instead.
    pub async fn run(&self, scenario: ScenarioId) -> Result<ScenarioResult, SimError> {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let plan = ScenarioPlan::for_scenario(scenario, &self.engine_config);
        let engine = TrafficStateEngine::new(plan.config.clone())?;
        let range = BatchRange::new(0, self.duration_secs)?;
        let points = self.generate(&plan);
        let mut failures: Vec<String> = Vec::new();
        let mut metrics = ScenarioMetrics {
            points_generated: points.len() as u64,
            ..ScenarioMetrics::default()
        };

        // Batch path
        let batch = engine.run_batch(&points, range);
        metrics.fine_records = batch.fine.records.len() as u64;
        metrics.batch_windows = batch.snapshots.len() as u64;
        check_batch(&engine, &points, &batch, &mut failures);
        check_partitioned(&engine, &points, range, &batch, &mut failures);

        // Streaming path, in-process
        let mut delivery = JitterDelivery::new(self.seed ^ DELIVERY_SEED_MIX, plan.delivery);
        let delivered = delivery.deliver(points.clone());
        let (closed, shutdown) = stream_direct(&engine, &delivered);
        metrics.streamed_windows = closed.len() as u64;
        metrics.late_drops = shutdown.drops.late;
        metrics.quality_drops = shutdown.drops.quality_total();
        metrics.open_windows_at_shutdown = shutdown.open_windows as u64;
        metrics.open_points_at_shutdown = shutdown.open_points;
        check_streaming(&engine, scenario, &plan, &delivered, &closed, &shutdown, &mut failures);

        // Streaming path, over the bus
        let (bus_report, bus_ids) = self.run_over_bus(&engine, &delivered).await?;
        metrics.published_over_bus = bus_report.published;
        let direct_ids: Vec<i64> = closed.iter().map(|w| w.window_id).collect();
        if bus_ids != direct_ids {
            failures.push(format!(
                "bus emitted windows {:?}, in-process aggregator emitted {:?}",
                bus_ids, direct_ids
            ));
        }

        // Scenario-specific expectations
        match scenario {
            ScenarioId::CongestionWave => check_congestion(&engine, &plan, &batch, &mut metrics, &mut failures),
            ScenarioId::RampMerge => check_ramp_merge(&engine, &points, &batch, &closed, &mut failures),
            ScenarioId::SteadyFlow | ScenarioId::LateBurst => {}
        }

        let streamed: Vec<(ClosedWindow, TrafficStateMatrix)> = closed
            .into_iter()
            .map(|window| {
                let matrix = engine.render_closed(&window);
                (window, matrix)
            })
            .collect();

        let passed = failures.is_empty();
        if !passed {
            warn!("{} failed {} check(s)", scenario.name(), failures.len());
        }

        Ok(ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            failure_reason: (!passed).then(|| failures.join("; ")),
            metrics,
            batch_snapshots: batch.snapshots,
            streamed,
        })
    }

    /// Samples the oracle every [`SAMPLE_INTERVAL_MS`] over the duration.
    fn generate(&self, plan: &ScenarioPlan) -> Vec<TrajectoryPoint> {
        let road = plan.config.max_distance;
        let mut oracle = TrafficOracle::new(self.seed.wrapping_mul(PHYSICS_SEED_MIX), road);
        if let Some(location) = &plan.config.location {
            oracle.set_location(location.clone());
        }
        if let Some(zone) = plan.slow_zone {
            oracle.add_slow_zone(zone);
        }

        for i in 0..plan.main_vehicles {
            let lane = (i % 5) as i32 + 1;
            let position = road * i as f64 / plan.main_vehicles as f64;
            let speed = 50.0 + (i % 5) as f64 * 5.0;
            oracle.spawn_vehicle(lane, position, speed);
        }
        for i in 0..plan.ramp_vehicles {
            // Lane 6 plus both ramp lanes that fold into it
            let lane = RAMP_LANE as i32 + (i % 3) as i32;
            let position = road * i as f64 / plan.ramp_vehicles.max(1) as f64;
            oracle.spawn_vehicle(lane, position, 40.0);
        }

        let end_ms = self.duration_secs * 1000;
        let mut points = Vec::new();
        while oracle.elapsed_ms() < end_ms {
            points.extend(oracle.sample(plan.config.time_origin_ms));
            oracle.step(SAMPLE_INTERVAL_MS);
        }
        debug!("Generated {} points from {} vehicles", points.len(), oracle.vehicle_count());
        points
    }

    /// Feeds delivered points through a [`StreamingRuntime`] and returns its
    /// report plus the ids of every published window, in publish order.
    async fn run_over_bus(
        &self,
        engine: &TrafficStateEngine,
        delivered: &[TrajectoryPoint],
    ) -> Result<(RuntimeReport, Vec<i64>), SimError> {
        let (producer, source) = channel_bus(BUS_CAPACITY);
        let sink = MemorySink::new();
        let runtime = StreamingRuntime::new(source, sink.clone(), engine.clone(), RuntimeConfig::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(runtime.run(shutdown_rx));

        for chunk in delivered.chunks(PAYLOAD_BATCH) {
            producer.send(encode_points(chunk)?).await?;
        }
        drop(producer);

        let report = handle.await??;
        drop(shutdown_tx);

        let ids = sink
            .published()
            .iter()
            .filter_map(|(_, envelope)| envelope.key.as_deref())
            .map(|key| decode_snapshot_key(key).map(|key| key.window.id))
            .collect::<Result<Vec<i64>, _>>()?;
        Ok((report, ids))
    }
}

/// Feeds points one by one; returns everything emitted plus the shutdown report.
fn stream_direct(engine: &TrafficStateEngine, delivered: &[TrajectoryPoint]) -> (Vec<ClosedWindow>, ShutdownReport) {
    let mut aggregator = engine.streaming();
    let mut closed = Vec::new();
    for point in delivered {
        closed.extend(aggregator.ingest(point).closed);
    }
    (closed, aggregator.shutdown())
}

// ============================================================================
// INVARIANT CHECKS
// ============================================================================

fn check_batch(engine: &TrafficStateEngine, points: &[TrajectoryPoint], batch: &BatchOutput, failures: &mut Vec<String>) {
    let aggregated: u64 = batch.fine.records.iter().map(|r| r.count).sum();
    let accounted = aggregated + batch.fine.drops.total();
    if accounted != points.len() as u64 {
        failures.push(format!(
            "batch lost points: {} aggregated + {} dropped != {} generated",
            aggregated,
            batch.fine.drops.total(),
            points.len()
        ));
    }

    let config = engine.config();
    let expected = (config.num_lanes() as usize, config.num_sections() as usize);
    if let Some((window_id, matrix)) = batch.snapshots.iter().find(|(_, m)| m.shape() != expected) {
        failures.push(format!(
            "batch window {} has shape {:?}, expected {:?}",
            window_id,
            matrix.shape(),
            expected
        ));
    }

    let out_of_grid = batch
        .windows
        .records
        .iter()
        .filter(|r| r.key.lane_id < 1 || r.key.lane_id > config.num_lanes() || r.key.section_id >= config.num_sections())
        .count();
    if out_of_grid > 0 {
        failures.push(format!("{} window records fall outside the grid", out_of_grid));
    }
}

/// Parallel partitions must reproduce the single-pass cells and counts.
fn check_partitioned(
    engine: &TrafficStateEngine,
    points: &[TrajectoryPoint],
    range: BatchRange,
    batch: &BatchOutput,
    failures: &mut Vec<String>,
) {
    let mut partitions: Vec<Vec<TrajectoryPoint>> = vec![Vec::new(); 4];
    for point in points {
        partitions[point.vehicle_id.rem_euclid(4) as usize].push(point.clone());
    }
    let split = engine.run_batch_partitioned(&partitions, range);

    let cells = |output: &BatchOutput| -> Vec<_> { output.fine.records.iter().map(|r| (r.key, r.count)).collect() };
    if cells(&split) != cells(batch) || split.fine.drops != batch.fine.drops {
        failures.push("partitioned batch diverged from single pass".to_string());
    }
}

fn check_streaming(
    engine: &TrafficStateEngine,
    scenario: ScenarioId,
    plan: &ScenarioPlan,
    delivered: &[TrajectoryPoint],
    closed: &[ClosedWindow],
    shutdown: &ShutdownReport,
    failures: &mut Vec<String>,
) {
    if closed.windows(2).any(|pair| pair[0].window_id >= pair[1].window_id) {
        failures.push("streaming emitted windows out of order or twice".to_string());
    }

    let emitted: u64 = closed.iter().flat_map(|w| &w.records).map(|r| r.count).sum();
    let accounted = emitted + shutdown.open_points + shutdown.drops.total();
    if accounted != delivered.len() as u64 {
        failures.push(format!(
            "streaming lost points: {} emitted + {} open + {} dropped != {} delivered",
            emitted,
            shutdown.open_points,
            shutdown.drops.total(),
            delivered.len()
        ));
    }

    let watermark = engine.config().watermark_ms();
    if plan.delivery.max_delay_ms() <= watermark && shutdown.drops.late > 0 {
        failures.push(format!(
            "{} late drops although delay {} ms is within the watermark",
            shutdown.drops.late,
            plan.delivery.max_delay_ms()
        ));
    }
    if scenario.expects_late_data() && shutdown.drops.late == 0 {
        failures.push("stragglers past the watermark were not counted as late".to_string());
    }
}

fn check_congestion(
    engine: &TrafficStateEngine,
    plan: &ScenarioPlan,
    batch: &BatchOutput,
    metrics: &mut ScenarioMetrics,
    failures: &mut Vec<String>,
) {
    let road = plan.config.max_distance;
    let width = engine.config().bucket_width();
    let band_mean = |low: f64, high: f64| -> Option<f64> {
        let (sum, count) = batch
            .fine
            .records
            .iter()
            .filter(|r| {
                let center = r.key.section_id as f64 * width;
                center >= low && center <= high
            })
            .fold((0.0, 0u64), |(sum, count), r| (sum + r.avg_velocity * r.count as f64, count + r.count));
        (count > 0).then(|| sum / count as f64)
    };

    metrics.congested_velocity = band_mean(0.45 * road, 0.62 * road);
    metrics.free_velocity = band_mean(0.05 * road, 0.25 * road);
    match (metrics.congested_velocity, metrics.free_velocity) {
        (Some(congested), Some(free)) if congested < 0.5 * free => {}
        (congested, free) => failures.push(format!(
            "slow zone not visible: congested {:?} vs free {:?}",
            congested, free
        )),
    }
}

fn check_ramp_merge(
    engine: &TrafficStateEngine,
    points: &[TrajectoryPoint],
    batch: &BatchOutput,
    closed: &[ClosedWindow],
    failures: &mut Vec<String>,
) {
    let config = engine.config();
    if config.num_lanes() < RAMP_LANE {
        return;
    }

    let ramp_samples = points.iter().filter(|p| p.lane_id >= RAMP_LANE as i32).count() as u64;
    let merged: u64 = batch
        .fine
        .records
        .iter()
        .filter(|r| r.key.lane_id == RAMP_LANE)
        .map(|r| r.count)
        .sum();
    if merged != ramp_samples {
        failures.push(format!(
            "lane {} holds {} points, {} ramp samples were generated",
            RAMP_LANE, merged, ramp_samples
        ));
    }

    if config.with_ramp() {
        return;
    }
    let row = RAMP_LANE as usize - 1;
    let ramp_row_is_default = |matrix: &TrafficStateMatrix| {
        matrix.velocity.row(row).iter().all(|v| *v == FREE_FLOW_VELOCITY)
            && matrix.density.row(row).iter().all(|d| *d == 0.0)
    };
    let batch_ok = batch.snapshots.values().all(ramp_row_is_default);
    let stream_ok = closed.iter().map(|w| engine.render_closed(w)).all(|m| ramp_row_is_default(&m));
    if !(batch_ok && stream_ok) {
        failures.push("ramp row rendered although the ramp is disabled".to_string());
    }
}
