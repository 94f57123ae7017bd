//! Associative running statistic.
//!
//! Every reduction in the engine is a sum + count that is only divided at the
//! end. Partials from different partitions combine with [`StatAccumulator::merge`]
//! in any order.

use crate::types::StatRecord;
use serde::{Deserialize, Serialize};

/// Decimal places kept for velocity averages.
pub const VELOCITY_DECIMALS: i32 = 1;

/// Decimal places kept for acceleration averages.
pub const ACCELERATION_DECIMALS: i32 = 2;

/// Rounds half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Running (sum, count) for velocity and acceleration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatAccumulator {
    pub velocity_sum: f64,
    pub acceleration_sum: f64,
    pub count: u64,
}

impl StatAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one observation in.
    pub fn fold(&mut self, velocity: f64, acceleration: f64) {
        self.velocity_sum += velocity;
        self.acceleration_sum += acceleration;
        self.count += 1;
    }

    /// Combines a partial accumulated elsewhere.
    pub fn merge(&mut self, other: &StatAccumulator) {
        self.velocity_sum += other.velocity_sum;
        self.acceleration_sum += other.acceleration_sum;
        self.count += other.count;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Unrounded mean velocity, `None` when empty.
    pub fn mean_velocity(&self) -> Option<f64> {
        (self.count > 0).then(|| self.velocity_sum / self.count as f64)
    }

    /// Unrounded mean acceleration, `None` when empty.
    pub fn mean_acceleration(&self) -> Option<f64> {
        (self.count > 0).then(|| self.acceleration_sum / self.count as f64)
    }

    /// Produces the rounded record for `key`. Empty accumulators produce
    /// nothing, so every record carries `count >= 1`.
    pub fn finish<K>(&self, key: K) -> Option<StatRecord<K>> {
        let velocity = self.mean_velocity()?;
        let acceleration = self.mean_acceleration()?;
        Some(StatRecord {
            key,
            avg_velocity: round_to(velocity, VELOCITY_DECIMALS),
            avg_acceleration: round_to(acceleration, ACCELERATION_DECIMALS),
            count: self.count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(55.04, 1), 55.0);
        assert_eq!(round_to(55.05, 1), 55.1);
        assert_eq!(round_to(-0.125, 2), -0.13);
        assert_eq!(round_to(1.0 / 3.0, 2), 0.33);
    }

    #[test]
    fn test_fold_and_finish() {
        let mut acc = StatAccumulator::new();
        acc.fold(50.0, 0.1);
        acc.fold(55.0, 0.2);
        acc.fold(60.0, 0.3);

        let record = acc.finish(7u32).unwrap();
        assert_eq!(record.key, 7);
        assert_eq!(record.avg_velocity, 55.0);
        assert_relative_eq!(record.avg_acceleration, 0.2);
        assert_eq!(record.count, 3);
    }

    #[test]
    fn test_empty_accumulator_produces_no_record() {
        assert!(StatAccumulator::new().finish(()).is_none());
        assert!(StatAccumulator::new().mean_velocity().is_none());
    }

    #[test]
    fn test_merge_equals_single_pass() {
        let mut left = StatAccumulator::new();
        left.fold(10.0, 1.0);
        let mut right = StatAccumulator::new();
        right.fold(20.0, -1.0);
        right.fold(30.0, 0.0);
        left.merge(&right);

        let mut single = StatAccumulator::new();
        for (v, a) in [(10.0, 1.0), (20.0, -1.0), (30.0, 0.0)] {
            single.fold(v, a);
        }
        assert_eq!(left.finish(()), single.finish(()));
    }

    proptest! {
        #[test]
        fn prop_merge_order_does_not_change_average(
            values in prop::collection::vec((0.0f64..120.0, -10.0f64..10.0), 1..64),
            split in 0usize..64,
        ) {
            let split = split % values.len();
            let (head, tail) = values.split_at(split);

            let mut a = StatAccumulator::new();
            head.iter().for_each(|(v, acc)| a.fold(*v, *acc));
            let mut b = StatAccumulator::new();
            tail.iter().for_each(|(v, acc)| b.fold(*v, *acc));

            let mut ab = a;
            ab.merge(&b);
            let mut ba = b;
            ba.merge(&a);

            let ab = ab.finish(()).unwrap();
            let ba = ba.finish(()).unwrap();
            prop_assert_eq!(ab.count, values.len() as u64);
            prop_assert!((ab.avg_velocity - ba.avg_velocity).abs() <= 0.1 + 1e-9);
            prop_assert!((ab.avg_acceleration - ba.avg_acceleration).abs() <= 0.01 + 1e-9);
        }
    }
}
