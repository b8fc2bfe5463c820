use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use resonance::kernel::lifecycle::EventSpec;
use resonance::kernel::record::{EventId, ParticipantId};
use resonance::services::catalog::CatalogStore;
use resonance::simulate::{self, SimulationConfig, Simulator};
use resonance::{PipelineConfig, SessionController, Sinks};

/// Runs one simulated event end to end through the real intake.
#[derive(Parser, Debug)]
#[command(name = "live_resonance")]
struct Args {
    #[arg(short, long, env = "RESONANCE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 10)]
    dancers: usize,

    #[arg(long, default_value_t = 10)]
    wearers: usize,

    /// Simulated seconds of telemetry
    #[arg(long, default_value_t = 30)]
    seconds: u64,

    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Feed in real time instead of as fast as possible
    #[arg(long)]
    realtime: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Setup Logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("resonance=info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if config.catalog.templates.is_empty() {
        config.catalog.templates = simulate::demo_templates();
    }

    tracing::info!("Starting Live Resonance simulation...");

    // 2. Catalog + Controller
    let catalog = CatalogStore::with_templates(config.catalog.templates.clone()).await;
    let controller = Arc::new(SessionController::new(config, catalog, Sinks::logging()));

    let event = EventId(1);
    controller
        .schedule(EventSpec::new(event, "Simulated floor").with_capacity(args.dancers.max(1) as u32))
        .await?;
    controller.activate(event).await?;
    for i in 0..args.dancers {
        controller.check_in(event, ParticipantId(i as u64)).await?;
    }

    // 3. Feed
    let sim_config = SimulationConfig {
        event,
        dancers: args.dancers,
        wearers: args.wearers,
        seed: args.seed,
        ..SimulationConfig::default()
    };
    let tick = Duration::from_millis(sim_config.tick_ms);
    let ticks = (args.seconds * 1_000 / sim_config.tick_ms) as usize;
    let mut simulator = Simulator::new(sim_config);
    let pace = args.realtime.then_some(tick);

    let report = simulate::feed(&controller, &mut simulator, ticks, pace).await;
    tracing::info!(
        "Fed {} records ({} overflowed, {} rejected)",
        report.accepted + report.rejected,
        report.overflowed,
        report.rejected
    );

    // Let the pipeline drain before closing.
    tokio::time::sleep(Duration::from_millis(500)).await;

    // 4. Close
    let summary = controller.close(event).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
