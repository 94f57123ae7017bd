//! JSON exporter for offline inspection of a scenario run.
//!
//! Exports every rendered window (batch and streaming) as stacked
//! `[lane][section][velocity, density, acceleration]` grids.

use crate::runner::{ScenarioMetrics, ScenarioResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use trafficstate_core::codec::WindowBounds;
use trafficstate_core::EngineConfig;

/// Which path produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSource {
    Batch,
    Streaming,
}

/// One rendered window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowFrame {
    pub source: FrameSource,

    pub window_id: i64,

    /// Present for streaming frames only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<WindowBounds>,

    pub grid: Vec<Vec<[f64; 3]>>,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_secs: i64,

    /// Engine configuration the scenario ran with
    pub config: EngineConfig,

    /// All frames, batch first
    pub frames: Vec<WindowFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub metrics: ScenarioMetrics,
}

impl SimExport {
    /// Builds an export from a finished run.
    pub fn from_result(result: &ScenarioResult, config: &EngineConfig, duration_secs: i64) -> Self {
        let batch = result.batch_snapshots.iter().map(|(window_id, matrix)| WindowFrame {
            source: FrameSource::Batch,
            window_id: *window_id,
            bounds: None,
            grid: matrix.channels(),
        });
        let streaming = result.streamed.iter().map(|(window, matrix)| WindowFrame {
            source: FrameSource::Streaming,
            window_id: window.window_id,
            bounds: Some(WindowBounds {
                id: window.window_id,
                start_ms: window.start_ms,
                end_ms: window.end_ms,
            }),
            grid: matrix.channels(),
        });

        Self {
            scenario: result.scenario.name().to_string(),
            seed: result.seed,
            duration_secs,
            config: config.clone(),
            frames: batch.chain(streaming).collect(),
            passed: result.passed,
            failure_reason: result.failure_reason.clone(),
            metrics: result.metrics.clone(),
        }
    }

    /// Number of frames from the given path.
    pub fn frame_count(&self, source: FrameSource) -> usize {
        self.frames.iter().filter(|f| f.source == source).count()
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioRunner;
    use crate::scenarios::ScenarioId;

    #[tokio::test]
    async fn test_export_contains_both_paths() {
        let runner = ScenarioRunner::new(5).with_duration(90);
        let result = runner.run(ScenarioId::SteadyFlow).await.unwrap();
        let export = SimExport::from_result(&result, runner.engine_config(), 90);

        assert_eq!(export.frame_count(FrameSource::Batch), result.batch_snapshots.len());
        assert_eq!(export.frame_count(FrameSource::Streaming), result.streamed.len());

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["scenario"], "steady_flow");
        assert_eq!(json["frames"][0]["source"], "batch");
        assert_eq!(json["frames"][0]["grid"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_write_to_file() {
        let export = SimExport {
            scenario: "steady_flow".to_string(),
            seed: 1,
            duration_secs: 0,
            config: EngineConfig::default(),
            frames: Vec::new(),
            passed: true,
            failure_reason: None,
            metrics: ScenarioMetrics::default(),
        };
        let path = std::env::temp_dir().join("trafficstate_sim_export_test.json");
        let path = path.to_string_lossy().to_string();
        export.write_to_file(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"passed\": true"));
        let _ = std::fs::remove_file(&path);
    }
}
