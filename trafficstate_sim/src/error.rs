//! Error types for the simulation harness.

use thiserror::Error;
use trafficstate_core::{ConfigError, EngineError};
use trafficstate_env::EnvError;

/// Failures that stop a scenario from running at all.
///
/// Invariant violations are not errors: they are reported through
/// [`ScenarioResult`](crate::ScenarioResult).
#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("runtime task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("export failed: {0}")]
    Io(#[from] std::io::Error),
}
