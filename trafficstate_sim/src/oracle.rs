//! Ground truth oracle for simulation.
//!
//! The oracle owns the true state of every vehicle on the simulated road:
//! - Longitudinal position, speed and acceleration per vehicle
//! - Simple car-following-free kinematics with optional slow zones
//! - Sensor sample generation (trajectory points with seeded noise)

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trafficstate_core::TrajectoryPoint;

/// Lateral width of one lane (ft).
pub const LANE_WIDTH_FT: f64 = 12.0;

/// Acceleration used to recover towards the desired speed (ft/s²).
const RECOVERY_ACCEL: f64 = 2.0;

/// Deceleration applied inside a slow zone (ft/s²).
const BRAKING_DECEL: f64 = -6.0;

/// A vehicle as the oracle sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimVehicle {
    /// Current vehicle id (renewed on every re-entry)
    pub id: i64,

    /// Raw lane id, ramps included (1..=8)
    pub lane: i32,

    /// Distance travelled along the road (ft)
    pub position_ft: f64,

    /// Speed (ft/s)
    pub speed: f64,

    /// Last applied acceleration (ft/s²)
    pub acceleration: f64,

    /// Cruise speed the vehicle recovers to (ft/s)
    pub desired_speed: f64,
}

/// A stretch of road where vehicles brake down to a capped speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlowZone {
    pub start_ft: f64,
    pub end_ft: f64,
    pub speed_cap: f64,
}

impl SlowZone {
    fn contains(&self, position_ft: f64) -> bool {
        position_ft >= self.start_ft && position_ft < self.end_ft
    }
}

/// The oracle: ground truth plus noisy sampling.
pub struct TrafficOracle {
    rng: ChaCha8Rng,
    vehicles: BTreeMap<i64, SimVehicle>,
    next_id: i64,
    road_length_ft: f64,
    slow_zones: Vec<SlowZone>,
    velocity_noise: Option<Normal<f64>>,
    position_noise: Option<Normal<f64>>,
    location: String,
    /// Elapsed simulation time (ms)
    elapsed_ms: i64,
}

impl TrafficOracle {
    /// Creates an oracle for a road of `road_length_ft` with the given seed.
    pub fn new(seed: u64, road_length_ft: f64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            vehicles: BTreeMap::new(),
            next_id: 1,
            road_length_ft,
            slow_zones: Vec::new(),
            velocity_noise: Normal::new(0.0, 0.5).ok(),
            position_noise: Normal::new(0.0, 0.3).ok(),
            location: "us-101".to_string(),
            elapsed_ms: 0,
        }
    }

    /// Sets the noise standard deviations. Zero disables that noise.
    pub fn set_noise(&mut self, velocity_std: f64, position_std: f64) {
        self.velocity_noise = (velocity_std > 0.0).then(|| Normal::new(0.0, velocity_std).ok()).flatten();
        self.position_noise = (position_std > 0.0).then(|| Normal::new(0.0, position_std).ok()).flatten();
    }

    /// Sets the location tag stamped on every sample.
    pub fn set_location(&mut self, location: impl Into<String>) {
        self.location = location.into();
    }

    pub fn add_slow_zone(&mut self, zone: SlowZone) {
        self.slow_zones.push(zone);
    }

    /// Spawns a vehicle and returns its id.
    pub fn spawn_vehicle(&mut self, lane: i32, position_ft: f64, speed: f64) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.vehicles.insert(
            id,
            SimVehicle {
                id,
                lane,
                position_ft,
                speed,
                acceleration: 0.0,
                desired_speed: speed,
            },
        );
        id
    }

    pub fn vehicle(&self, id: i64) -> Option<&SimVehicle> {
        self.vehicles.get(&id)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed_ms
    }

    /// Advances the world by `dt_ms`.
    ///
    /// Vehicles leaving the road re-enter at its start under a fresh id.
    pub fn step(&mut self, dt_ms: i64) {
        let dt = dt_ms as f64 / 1000.0;
        let mut exited = Vec::new();

        for vehicle in self.vehicles.values_mut() {
            let cap = self
                .slow_zones
                .iter()
                .filter(|zone| zone.contains(vehicle.position_ft))
                .map(|zone| zone.speed_cap)
                .fold(vehicle.desired_speed, f64::min);

            vehicle.acceleration = if vehicle.speed > cap {
                BRAKING_DECEL
            } else if vehicle.speed < cap {
                RECOVERY_ACCEL
            } else {
                0.0
            };
            let next_speed = match vehicle.acceleration {
                a if a > 0.0 => (vehicle.speed + a * dt).min(cap),
                a if a < 0.0 => (vehicle.speed + a * dt).max(cap),
                _ => vehicle.speed,
            };
            vehicle.position_ft += 0.5 * (vehicle.speed + next_speed) * dt;
            vehicle.speed = next_speed;

            if vehicle.position_ft >= self.road_length_ft {
                exited.push(vehicle.id);
            }
        }

        for id in exited {
            if let Some(mut vehicle) = self.vehicles.remove(&id) {
                vehicle.id = self.next_id;
                self.next_id += 1;
                vehicle.position_ft -= self.road_length_ft;
                self.vehicles.insert(vehicle.id, vehicle);
            }
        }

        self.elapsed_ms += dt_ms;
    }

    /// Samples every vehicle at the current time.
    ///
    /// # Arguments
    /// * `time_origin_ms` - Absolute timestamp of elapsed time zero
    pub fn sample(&mut self, time_origin_ms: i64) -> Vec<TrajectoryPoint> {
        let timestamp_ms = time_origin_ms + self.elapsed_ms;
        let mut points = Vec::with_capacity(self.vehicles.len());
        for vehicle in self.vehicles.values() {
            let velocity_noise = self.velocity_noise.map_or(0.0, |n| n.sample(&mut self.rng));
            let position_noise = self.position_noise.map_or(0.0, |n| n.sample(&mut self.rng));
            points.push(TrajectoryPoint {
                vehicle_id: vehicle.id,
                timestamp_ms,
                local_x: (vehicle.lane as f64 - 0.5) * LANE_WIDTH_FT,
                local_y: (vehicle.position_ft + position_noise).max(0.0),
                lane_id: vehicle.lane,
                velocity: vehicle.speed + velocity_noise,
                acceleration: vehicle.acceleration,
                location: self.location.clone(),
            });
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_spawn_vehicle() {
        let mut oracle = TrafficOracle::new(42, 2100.0);
        let id = oracle.spawn_vehicle(3, 100.0, 60.0);
        let vehicle = oracle.vehicle(id).unwrap();
        assert_eq!(vehicle.lane, 3);
        assert_eq!(vehicle.position_ft, 100.0);
    }

    #[test]
    fn test_oracle_constant_speed_step() {
        let mut oracle = TrafficOracle::new(42, 2100.0);
        let id = oracle.spawn_vehicle(1, 0.0, 60.0);
        oracle.step(1000);
        let vehicle = oracle.vehicle(id).unwrap();
        assert!((vehicle.position_ft - 60.0).abs() < 1e-9);
        assert_eq!(oracle.elapsed_ms(), 1000);
    }

    #[test]
    fn test_vehicle_reenters_with_new_id() {
        let mut oracle = TrafficOracle::new(42, 100.0);
        let id = oracle.spawn_vehicle(1, 90.0, 60.0);
        oracle.step(1000);
        assert!(oracle.vehicle(id).is_none());
        assert_eq!(oracle.vehicle_count(), 1);
    }

    #[test]
    fn test_slow_zone_brakes_vehicle() {
        let mut oracle = TrafficOracle::new(42, 2100.0);
        oracle.add_slow_zone(SlowZone { start_ft: 0.0, end_ft: 2000.0, speed_cap: 20.0 });
        let id = oracle.spawn_vehicle(2, 0.0, 60.0);
        for _ in 0..100 {
            oracle.step(100);
        }
        let vehicle = oracle.vehicle(id).unwrap();
        assert!((vehicle.speed - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_oracle_deterministic_noise() {
        let mut first = TrafficOracle::new(7, 2100.0);
        let mut second = TrafficOracle::new(7, 2100.0);
        for oracle in [&mut first, &mut second] {
            oracle.spawn_vehicle(1, 10.0, 50.0);
            oracle.spawn_vehicle(7, 20.0, 40.0);
            oracle.step(100);
        }
        assert_eq!(first.sample(0), second.sample(0));
    }

    #[test]
    fn test_samples_without_noise_match_truth() {
        let mut oracle = TrafficOracle::new(1, 2100.0);
        oracle.set_noise(0.0, 0.0);
        oracle.spawn_vehicle(2, 500.0, 44.0);
        let points = oracle.sample(1_000);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].timestamp_ms, 1_000);
        assert_eq!(points[0].local_x, 18.0);
        assert_eq!(points[0].local_y, 500.0);
        assert_eq!(points[0].velocity, 44.0);
    }
}
