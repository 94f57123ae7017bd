//! Simulated ingestion transport with delay injection.
//!
//! Reorders event-time-sorted samples into arrival order. Every sample gets
//! a uniform delay in `[0, max_jitter_ms]`; a configurable fraction of
//! stragglers gets an extra fixed delay on top, which is how late data is
//! produced on purpose.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use trafficstate_core::TrajectoryPoint;

/// Delay profile of the simulated bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeliveryProfile {
    /// Upper bound of the uniform delay (ms)
    pub max_jitter_ms: i64,

    /// Fraction of samples (0.0 - 1.0) delayed further
    pub straggler_rate: f64,

    /// Extra delay applied to stragglers (ms)
    pub straggler_delay_ms: i64,
}

impl Default for DeliveryProfile {
    fn default() -> Self {
        Self {
            max_jitter_ms: 2_000,
            straggler_rate: 0.0,
            straggler_delay_ms: 0,
        }
    }
}

impl DeliveryProfile {
    /// Largest delay any sample can see.
    pub fn max_delay_ms(&self) -> i64 {
        let straggler = if self.straggler_rate > 0.0 { self.straggler_delay_ms } else { 0 };
        self.max_jitter_ms.max(0) + straggler.max(0)
    }
}

/// Applies a [`DeliveryProfile`] deterministically from a seed.
pub struct JitterDelivery {
    rng: ChaCha8Rng,
    profile: DeliveryProfile,
}

impl JitterDelivery {
    pub fn new(seed: u64, profile: DeliveryProfile) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            profile,
        }
    }

    pub fn profile(&self) -> &DeliveryProfile {
        &self.profile
    }

    /// Returns `points` in arrival order.
    ///
    /// Ties keep their generation order.
    pub fn deliver(&mut self, points: Vec<TrajectoryPoint>) -> Vec<TrajectoryPoint> {
        let straggler_rate = self.profile.straggler_rate.clamp(0.0, 1.0);
        let max_jitter = self.profile.max_jitter_ms.max(0);

        let mut arrivals: Vec<(i64, TrajectoryPoint)> = points
            .into_iter()
            .map(|point| {
                let mut delay = self.rng.gen_range(0..=max_jitter);
                if straggler_rate > 0.0 && self.rng.gen_bool(straggler_rate) {
                    delay += self.profile.straggler_delay_ms.max(0);
                }
                (point.timestamp_ms + delay, point)
            })
            .collect();
        arrivals.sort_by_key(|(arrival_ms, _)| *arrival_ms);
        arrivals.into_iter().map(|(_, point)| point).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn points(count: i64) -> Vec<TrajectoryPoint> {
        (0..count)
            .map(|i| TrajectoryPoint {
                vehicle_id: i,
                timestamp_ms: i * 100,
                local_x: 6.0,
                local_y: 10.0,
                lane_id: 1,
                velocity: 50.0,
                acceleration: 0.0,
                location: "us-101".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_zero_jitter_preserves_order() {
        let mut delivery = JitterDelivery::new(
            1,
            DeliveryProfile {
                max_jitter_ms: 0,
                ..DeliveryProfile::default()
            },
        );
        assert_eq!(delivery.deliver(points(50)), points(50));
    }

    #[test]
    fn test_delivery_is_deterministic() {
        let profile = DeliveryProfile::default();
        let first = JitterDelivery::new(9, profile).deliver(points(200));
        let second = JitterDelivery::new(9, profile).deliver(points(200));
        assert_eq!(first, second);
    }

    #[test]
    fn test_jitter_reorders_samples() {
        let delivered = JitterDelivery::new(3, DeliveryProfile::default()).deliver(points(200));
        assert_eq!(delivered.len(), 200);
        assert!(delivered.windows(2).any(|w| w[0].timestamp_ms > w[1].timestamp_ms));
    }

    #[test]
    fn test_max_delay_includes_stragglers() {
        let profile = DeliveryProfile {
            max_jitter_ms: 500,
            straggler_rate: 0.1,
            straggler_delay_ms: 90_000,
        };
        assert_eq!(profile.max_delay_ms(), 90_500);
        assert_eq!(DeliveryProfile::default().max_delay_ms(), 2_000);
    }

    proptest! {
        #[test]
        fn test_displacement_is_bounded(seed in any::<u64>(), jitter in 0i64..5_000) {
            let profile = DeliveryProfile { max_jitter_ms: jitter, ..DeliveryProfile::default() };
            let delivered = JitterDelivery::new(seed, profile).deliver(points(300));
            let mut max_seen = i64::MIN;
            for point in &delivered {
                max_seen = max_seen.max(point.timestamp_ms);
                prop_assert!(max_seen - point.timestamp_ms <= jitter);
            }
        }
    }
}
