//! TrafficState Simulator CLI
//!
//! Run deterministic traffic scenarios through both aggregation paths.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use trafficstate_core::EngineConfig;
use trafficstate_sim::scenarios::ScenarioId;
use trafficstate_sim::{ScenarioResult, ScenarioRunner, SimExport};

/// TrafficState deterministic simulation CLI
#[derive(Parser, Debug)]
#[command(name = "trafficstate-sim")]
#[command(about = "Run deterministic traffic scenarios against the TrafficState engine", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (steady_flow, congestion_wave, late_burst, ramp_merge, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulated duration in seconds
    #[arg(short, long, default_value = "180")]
    duration: i64,

    /// Window size in seconds (overrides the config file)
    #[arg(short, long)]
    window: Option<u32>,

    /// Engine configuration as JSON; missing fields take their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export rendered windows of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str::<EngineConfig>(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => ScenarioRunner::new(0).engine_config().clone(),
    };
    if let Some(window) = args.window {
        config.window_size_secs = window;
    }
    config.clone().validate().context("invalid engine configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("setting tracing subscriber")?;

    if !args.json {
        info!("TrafficState Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let config = load_config(&args)?;

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => bail!("{} (available: steady_flow, congestion_wave, late_burst, ramp_merge, all)", e),
        }
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            bail!("--export only supports a single scenario, not 'all'");
        }
        let runner = ScenarioRunner::new(base_seed)
            .with_duration(args.duration)
            .with_engine_config(config.clone());
        let result = runner.run(scenarios[0]).await?;
        SimExport::from_result(&result, &config, args.duration)
            .write_to_file(export_path)
            .with_context(|| format!("writing export {}", export_path))?;
        info!(
            "Exported {} batch and {} streaming windows to {}",
            result.batch_snapshots.len(),
            result.streamed.len(),
            export_path
        );
        report(&result);
        if !result.passed {
            std::process::exit(1);
        }
        return Ok(());
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed)
            .with_duration(args.duration)
            .with_engine_config(config.clone());

        for scenario in &scenarios {
            let result = runner.run(*scenario).await?;
            if !args.json {
                report(&result);
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "metrics": r.metrics,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn report(result: &ScenarioResult) {
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED | windows batch={} stream={} | late={}",
            result.scenario.name(),
            result.seed,
            result.metrics.batch_windows,
            result.metrics.streamed_windows,
            result.metrics.late_drops
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}
