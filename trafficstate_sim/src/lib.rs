//! TrafficState Deterministic Simulation Harness
//!
//! Generates NGSIM-like trajectories from a seeded ground-truth oracle,
//! delivers them out of order, and runs both aggregation paths against
//! them while checking the engine's invariants.
//!
//! # Core Principle
//!
//! All sources of non-determinism are derived from a single 64-bit seed:
//! - **Physics**: vehicle kinematics and sensor noise (`ChaCha8Rng`)
//! - **Delivery**: per-sample jitter and stragglers (`ChaCha8Rng`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌───────────────┐    ┌────────────────┐                    │
//! │  │ TrafficOracle │───►│ JitterDelivery │──► streaming path  │
//! │  │ (ground truth)│    └────────────────┘    (direct + bus)  │
//! │  └───────┬───────┘                                          │
//! │          └────────────────────────────────► batch path      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use trafficstate_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let runner = ScenarioRunner::new(42).with_duration(180);
//! let result = runner.run(ScenarioId::LateBurst).await?;
//! assert!(result.passed);
//! ```

mod delivery;
mod error;
mod exporter;
mod oracle;
mod runner;
pub mod scenarios;

pub use delivery::{DeliveryProfile, JitterDelivery};
pub use error::SimError;
pub use exporter::{FrameSource, SimExport, WindowFrame};
pub use oracle::{SimVehicle, SlowZone, TrafficOracle};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
