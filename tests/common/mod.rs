#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use async_trait::async_trait;

use resonance::kernel::biometrics::BiometricSnapshot;
use resonance::kernel::correlator::{BiometricGate, CorrelationRule};
use resonance::kernel::lifecycle::EventSpec;
use resonance::kernel::matcher::{Feature, MatchCandidate, PatternTemplate, Similarity};
use resonance::kernel::record::{BiometricSample, EventId, MovementSample, StreamId, TelemetryRecord, TemplateId, Vec3};
use resonance::kernel::telemetry::metrics::MetricsSnapshot;
use resonance::kernel::time::Timestamp;
use resonance::kernel::trigger::{DeliveryStatus, SoundVoice, TriggerParameters, TriggerRequest};
use resonance::outputs::audit::MemoryAuditLog;
use resonance::outputs::sink::{RecordingTriggerSink, SinkError, TriggerSink};
use resonance::services::catalog::{CatalogError, CatalogStore, PatternSource};
use resonance::{PipelineConfig, SessionController, Sinks};

pub const SPIKE_HEIGHT: f32 = 2.2;
pub const REST_HEIGHT: f32 = 1.0;

pub fn ts(ms: u64) -> Timestamp {
    Timestamp::from_millis(ms)
}

pub fn movement(event: EventId, stream: &str, ms: u64, height: f32) -> MovementSample {
    MovementSample {
        event,
        stream: StreamId::new(stream),
        at: ts(ms),
        position: Vec3::new(0.0, height, 0.0),
        velocity: Vec3::ZERO,
        acceleration: Vec3::ZERO,
        intensity: None,
    }
}

pub fn movement_record(event: EventId, stream: &str, ms: u64, height: f32) -> TelemetryRecord {
    TelemetryRecord::Movement(movement(event, stream, ms, height))
}

pub fn biometric(event: EventId, stream: &str, ms: u64, heart_rate: f32) -> BiometricSample {
    BiometricSample {
        event,
        stream: StreamId::new(stream),
        at: ts(ms),
        heart_rate: Some(heart_rate),
        gsr: None,
        temperature: None,
        energy_level: None,
        emotional_state: None,
    }
}

/// hr 150, gsr 4.0, energy 0.8: intensity 0.775 with default scaling.
pub fn excited_record(event: EventId, stream: &str, ms: u64) -> TelemetryRecord {
    TelemetryRecord::Biometric(BiometricSample {
        gsr: Some(4.0),
        energy_level: Some(0.8),
        ..biometric(event, stream, ms, 150.0)
    })
}

/// hr 70, gsr 0.5, energy 0.1: intensity well under 0.3.
pub fn calm_record(event: EventId, stream: &str, ms: u64) -> TelemetryRecord {
    TelemetryRecord::Biometric(BiometricSample {
        gsr: Some(0.5),
        energy_level: Some(0.1),
        ..biometric(event, stream, ms, 70.0)
    })
}

pub fn raise_arms() -> PatternTemplate {
    PatternTemplate::new(
        "raise-arms",
        vec![Feature::Height],
        vec![vec![1.0], vec![1.3], vec![1.6], vec![1.9], vec![2.2]],
    )
    .with_threshold(0.7)
    .with_cooldown_ms(2_000)
    .with_window(2_000, 5)
}

pub fn candidate(event: EventId, template: &str, stream: &str, confidence: f32, end_ms: u64) -> MatchCandidate {
    MatchCandidate {
        event,
        template: TemplateId::new(template),
        stream: StreamId::new(stream),
        confidence,
        window_start: ts(end_ms.saturating_sub(1_000)),
        window_end: ts(end_ms),
        threshold: 0.7,
        cooldown_ms: 2_000,
    }
}

pub fn fresh_snapshot(event: EventId, intensity: f32, at_ms: u64) -> BiometricSnapshot {
    BiometricSnapshot {
        mean_heart_rate: Some(120.0),
        intensity,
        samples: 3,
        contributors: 1,
        last_sample_at: Some(ts(at_ms)),
        ..BiometricSnapshot::empty(event)
    }
}

pub fn gated_sound_rule(template: &str, min_intensity: f32) -> CorrelationRule {
    CorrelationRule {
        template: TemplateId::new(template),
        biometric: Some(BiometricGate::min_intensity(min_intensity)),
        triggers: vec![TriggerParameters::sound(SoundVoice::Percussion)],
    }
}

/// Confidence 0.9 when the newest frame is a spike, 0.2 otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpikeSimilarity;

impl Similarity for SpikeSimilarity {
    fn score(&self, observed: &[Vec<f32>], _template: &PatternTemplate) -> f32 {
        match observed.last().and_then(|row| row.first()) {
            Some(height) if *height >= 2.0 => 0.9,
            _ => 0.2,
        }
    }
}

/// No crossings, fast retries.
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.correlation.crossing = None;
    config.dispatch.ack_timeout_ms = 100;
    config.dispatch.max_attempts = 3;
    config.dispatch.initial_backoff_ms = 10;
    config.dispatch.max_backoff_ms = 40;
    config.shutdown_grace_ms = 500;
    config
}

pub struct Harness {
    pub controller: Arc<SessionController>,
    pub sink: Arc<RecordingTriggerSink>,
    pub audit: Arc<MemoryAuditLog>,
}

pub async fn harness(config: PipelineConfig, templates: Vec<PatternTemplate>) -> Harness {
    let sink = Arc::new(RecordingTriggerSink::new());
    harness_with_sink(config, templates, sink.clone(), sink).await
}

pub async fn harness_with_sink(
    config: PipelineConfig,
    templates: Vec<PatternTemplate>,
    trigger: Arc<dyn TriggerSink>,
    sink: Arc<RecordingTriggerSink>,
) -> Harness {
    let audit = Arc::new(MemoryAuditLog::new());
    let catalog = CatalogStore::with_templates(templates).await;
    let controller = SessionController::new(config, catalog, Sinks::new(trigger, audit.clone()))
        .with_similarity(Arc::new(SpikeSimilarity));
    Harness {
        controller: Arc::new(controller),
        sink,
        audit,
    }
}

pub async fn start_event(controller: &SessionController, id: u64) -> EventId {
    let event = EventId(id);
    controller
        .schedule(EventSpec::new(event, format!("test-{}", id)))
        .await
        .expect("schedule");
    controller.activate(event).await.expect("activate");
    event
}

/// Samples every 100 ms on `stream` from `from_ms` to `to_ms` inclusive,
/// spiking at each timestamp in `spikes`.
pub async fn feed_stream(
    controller: &SessionController,
    event: EventId,
    stream: &str,
    from_ms: u64,
    to_ms: u64,
    spikes: &[u64],
) {
    let mut t = from_ms;
    while t <= to_ms {
        let height = if spikes.contains(&t) { SPIKE_HEIGHT } else { REST_HEIGHT };
        controller
            .ingest(movement_record(event, stream, t, height))
            .await
            .expect("movement accepted");
        t += 100;
    }
}

const POLL: Duration = Duration::from_millis(10);
const PATIENCE: usize = 300;

pub async fn wait_for_triggers(controller: &SessionController, event: EventId, at_least: usize) -> Vec<TriggerRequest> {
    for _ in 0..PATIENCE {
        let triggers = controller.triggers(event).await;
        if triggers.len() >= at_least {
            return triggers;
        }
        tokio::time::sleep(POLL).await;
    }
    controller.triggers(event).await
}

/// Waits until every dispatched trigger has a final delivery status.
pub async fn wait_for_settled(controller: &SessionController, event: EventId) -> Vec<TriggerRequest> {
    for _ in 0..PATIENCE {
        let triggers = controller.triggers(event).await;
        if triggers.iter().all(|t| t.status != DeliveryStatus::Pending) {
            return triggers;
        }
        tokio::time::sleep(POLL).await;
    }
    controller.triggers(event).await
}

pub async fn wait_for_metrics<F>(controller: &SessionController, event: EventId, ready: F) -> MetricsSnapshot
where
    F: Fn(&MetricsSnapshot) -> bool,
{
    for _ in 0..PATIENCE {
        if let Some(metrics) = controller.metrics(event).await {
            if ready(&metrics) {
                return metrics;
            }
        }
        tokio::time::sleep(POLL).await;
    }
    controller.metrics(event).await.unwrap_or_default()
}

/// Gives in-flight tasks a chance to produce anything unexpected.
pub async fn quiesce() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

// --- Scripted collaborators ---

/// Fails with `Unavailable` for the first `failures` calls.
#[derive(Debug)]
pub struct FlakySink {
    failures: u32,
    pub calls: AtomicU32,
}

impl FlakySink {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TriggerSink for FlakySink {
    async fn deliver(&self, _request: &TriggerRequest) -> Result<(), SinkError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(SinkError::Unavailable(format!("flaky call {}", n + 1)))
        } else {
            Ok(())
        }
    }
}

/// Never answers within any sensible timeout.
#[derive(Debug, Default)]
pub struct SilentSink {
    pub calls: AtomicU32,
}

#[async_trait]
impl TriggerSink for SilentSink {
    async fn deliver(&self, _request: &TriggerRequest) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RejectingSink {
    pub calls: AtomicU32,
}

#[async_trait]
impl TriggerSink for RejectingSink {
    async fn deliver(&self, _request: &TriggerRequest) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Rejected("unsupported voice".to_string()))
    }
}

/// Pattern source whose availability and latency tests can flip.
pub struct ScriptedSource {
    pub templates: Vec<PatternTemplate>,
    pub failing: AtomicBool,
    pub slow: AtomicBool,
}

impl ScriptedSource {
    pub fn new(templates: Vec<PatternTemplate>) -> Self {
        Self {
            templates,
            failing: AtomicBool::new(false),
            slow: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PatternSource for ScriptedSource {
    async fn fetch(&self) -> Result<Vec<PatternTemplate>, CatalogError> {
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("store offline".to_string()));
        }
        Ok(self.templates.clone())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
