use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use resonance::kernel::lifecycle::EventSpec;
use resonance::kernel::record::{EventId, ParticipantId, TelemetryRecord};
use resonance::outputs::audit::LogAudit;
use resonance::outputs::sink::{HttpTriggerSink, LogTriggerSink, TriggerSink};
use resonance::services::catalog::{CatalogStore, HttpPatternSource, PatternSource, StaticPatternSource};
use resonance::{PipelineConfig, SessionController, Sinks};

/// JSON-lines intake: one telemetry record or control message per line on stdin.
#[derive(Parser, Debug)]
#[command(name = "resonance")]
#[command(about = "Live-event movement/biometric correlation pipeline")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "RESONANCE_CONFIG")]
    config: Option<PathBuf>,

    /// Schedule and activate this event at startup
    #[arg(short, long)]
    event: Option<u64>,

    /// POST triggers here instead of logging them
    #[arg(long, env = "RESONANCE_TRIGGER_URL")]
    trigger_url: Option<String>,

    /// Use the built-in raise-arms/spin/jump templates when none are configured
    #[arg(long)]
    demo_templates: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Control {
    Schedule,
    Activate,
    Close,
    CheckIn,
    CheckOut,
}

#[derive(Debug, Deserialize)]
struct ControlLine {
    control: Control,
    event: EventId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    capacity: Option<u32>,
    #[serde(default)]
    participant: Option<ParticipantId>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Line {
    Control(ControlLine),
    Record(TelemetryRecord),
}

#[derive(Debug, Serialize)]
struct Reply {
    line: u64,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Reply {
    fn ok(line: u64, detail: impl Serialize) -> Self {
        Self {
            line,
            ok: true,
            detail: serde_json::to_value(detail).ok(),
            error: None,
        }
    }

    fn err(line: u64, error: impl std::fmt::Display) -> Self {
        Self {
            line,
            ok: false,
            detail: None,
            error: Some(error.to_string()),
        }
    }
}

async fn apply(controller: &SessionController, line_no: u64, line: Line) -> Reply {
    match line {
        Line::Record(record) => match controller.ingest(record).await {
            Ok(ack) => Reply::ok(line_no, ack),
            Err(e) => Reply::err(line_no, format!("invalid record: {}", e)),
        },
        Line::Control(ctl) => {
            let event = ctl.event;
            match ctl.control {
                Control::Schedule => {
                    let mut spec = EventSpec::new(event, ctl.name.unwrap_or_else(|| event.to_string()));
                    spec.capacity = ctl.capacity;
                    match controller.schedule(spec).await {
                        Ok(()) => Reply::ok(line_no, "scheduled"),
                        Err(e) => Reply::err(line_no, e),
                    }
                }
                Control::Activate => match controller.activate(event).await {
                    Ok(()) => Reply::ok(line_no, "active"),
                    Err(e) => Reply::err(line_no, e),
                },
                Control::Close => match controller.close(event).await {
                    Ok(summary) => Reply::ok(line_no, summary),
                    Err(e) => Reply::err(line_no, e),
                },
                Control::CheckIn => {
                    let Some(participant) = ctl.participant else {
                        return Reply::err(line_no, "check_in needs `participant`");
                    };
                    match controller.check_in(event, participant).await {
                        Ok(session) => Reply::ok(line_no, session),
                        Err(e) => Reply::err(line_no, e),
                    }
                }
                Control::CheckOut => {
                    let Some(participant) = ctl.participant else {
                        return Reply::err(line_no, "check_out needs `participant`");
                    };
                    match controller.check_out(event, participant).await {
                        Ok(session) => Reply::ok(line_no, session),
                        Err(e) => Reply::err(line_no, e),
                    }
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("resonance=info")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if args.demo_templates && config.catalog.templates.is_empty() {
        config.catalog.templates = resonance::simulate::demo_templates();
    }

    tracing::info!("Resonance booting...");

    // 1. Catalog
    let fetch_timeout = Duration::from_millis(config.catalog.fetch_timeout_ms);
    let source: Arc<dyn PatternSource> = match &config.catalog.url {
        Some(url) => Arc::new(HttpPatternSource::new(url.clone(), fetch_timeout)),
        None => Arc::new(StaticPatternSource::new(config.catalog.templates.clone())),
    };
    let catalog = Arc::new(CatalogStore::new(source, fetch_timeout));
    if let Err(e) = catalog.refresh().await {
        tracing::warn!("Starting with an empty catalog: {}", e);
    }
    let shutdown = CancellationToken::new();
    let poller = catalog
        .clone()
        .spawn_refresh(Duration::from_millis(config.catalog.poll_interval_ms), shutdown.clone());

    // 2. Sinks
    let trigger: Arc<dyn TriggerSink> = match &args.trigger_url {
        Some(url) => Arc::new(HttpTriggerSink::new(
            url.clone(),
            Duration::from_millis(config.dispatch.ack_timeout_ms),
        )),
        None => Arc::new(LogTriggerSink),
    };
    let controller = SessionController::new(config, catalog, Sinks::new(trigger, Arc::new(LogAudit)));

    if let Some(id) = args.event {
        let event = EventId(id);
        controller.schedule(EventSpec::new(event, format!("cli-{}", id))).await?;
        controller.activate(event).await?;
    }

    // 3. Intake loop
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;
    loop {
        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            next = lines.next_line() => next.context("reading stdin")?,
        };
        let Some(raw) = next else { break };
        line_no += 1;
        if raw.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Line>(&raw) {
            Ok(line) => apply(&controller, line_no, line).await,
            Err(e) => Reply::err(line_no, format!("unparseable line: {}", e)),
        };
        println!("{}", serde_json::to_string(&reply)?);
    }

    // 4. Teardown
    for summary in controller.shutdown().await {
        println!("{}", serde_json::to_string(&summary)?);
    }
    shutdown.cancel();
    let _ = poller.await;
    tracing::info!("Resonance stopped");
    Ok(())
}
