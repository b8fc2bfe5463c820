use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::pipeline::{self, DispatchContext, MatchJob, Sinks};
use crate::config::PipelineConfig;
use crate::kernel::biometrics::{BiometricAggregator, BiometricSnapshot};
use crate::kernel::correlator::{CausalRecord, RuleBook};
use crate::kernel::dispatcher::{DispatchPlan, TriggerLedger};
use crate::kernel::lifecycle::{EventSpec, EventStatus, LifecycleError, LifecycleGraph, LifecycleRequest};
use crate::kernel::matcher::{PatternMatcher, Similarity};
use crate::kernel::normalizer::{IngestAck, Normalizer, RecordRejection};
use crate::kernel::record::{EventId, ParticipantId, TelemetryRecord};
use crate::kernel::session::{ParticipantSession, SessionError, SessionRoster};
use crate::kernel::telemetry::event::{AttendanceEvent, PipelineEvent};
use crate::kernel::telemetry::metrics::MetricsSnapshot;
use crate::kernel::telemetry::recorder::TelemetryRecorder;
use crate::kernel::trigger::TriggerRequest;
use crate::services::catalog::CatalogStore;
use crate::services::delivery::RetryPolicy;

/// What is left of an event once it closes.
#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub event: EventId,
    pub name: String,
    pub detected_patterns: u64,
    pub triggers: usize,
    pub undelivered: usize,
    pub discarded_records: usize,
    pub checked_out_on_close: usize,
    pub sessions: Vec<ParticipantSession>,
    pub metrics: MetricsSnapshot,
}

/// Mutable per-event state. Intake, check-in and lifecycle changes all go
/// through this lock, so a close is observed by the very next record.
struct EventState {
    status: EventStatus,
    roster: SessionRoster,
    normalizer: Normalizer,
    aggregator: BiometricAggregator,
    match_tx: Option<mpsc::Sender<MatchJob>>,
    summary: Option<EventSummary>,
}

struct EventHandle {
    spec: EventSpec,
    state: Mutex<EventState>,
    snapshot_tx: watch::Sender<BiometricSnapshot>,
    dispatch: DispatchContext,
}

impl EventHandle {
    async fn record(&self, event: PipelineEvent) {
        self.dispatch.recorder.lock().await.record(event);
    }
}

/// Process-wide registry of events and their pipelines.
///
/// Each event gets its own lock and its own tasks; the registry lock is only
/// held long enough to look a handle up.
pub struct SessionController {
    config: Arc<PipelineConfig>,
    rules: Arc<RuleBook>,
    catalog: Arc<CatalogStore>,
    similarity: Arc<dyn Similarity>,
    sinks: Sinks,
    events: RwLock<HashMap<EventId, Arc<EventHandle>>>,
}

impl SessionController {
    pub fn new(config: PipelineConfig, catalog: Arc<CatalogStore>, sinks: Sinks) -> Self {
        let similarity = config.matcher.similarity.build();
        let rules = Arc::new(config.correlation.clone());
        Self {
            config: Arc::new(config),
            rules,
            catalog,
            similarity,
            sinks,
            events: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the configured similarity function for events activated afterwards.
    pub fn with_similarity(mut self, similarity: Arc<dyn Similarity>) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn catalog(&self) -> &Arc<CatalogStore> {
        &self.catalog
    }

    async fn handle(&self, event: EventId) -> Option<Arc<EventHandle>> {
        self.events.read().await.get(&event).cloned()
    }

    // --- Lifecycle ---

    pub async fn schedule(&self, spec: EventSpec) -> Result<(), LifecycleError> {
        let mut events = self.events.write().await;
        if events.contains_key(&spec.id) {
            return Err(LifecycleError::DuplicateEvent(spec.id));
        }

        let event = spec.id;
        let (snapshot_tx, _rx) = watch::channel(BiometricSnapshot::empty(event));
        let handle = EventHandle {
            state: Mutex::new(EventState {
                status: EventStatus::Scheduled,
                roster: SessionRoster::new(spec.capacity),
                normalizer: Normalizer::new(event, self.config.buffer.clone()),
                aggregator: BiometricAggregator::new(event, self.config.biometrics.clone()),
                match_tx: None,
                summary: None,
            }),
            snapshot_tx,
            dispatch: DispatchContext {
                event,
                rules: self.rules.clone(),
                ledger: Arc::new(Mutex::new(TriggerLedger::new(event))),
                recorder: Arc::new(Mutex::new(TelemetryRecorder::new())),
                sinks: self.sinks.clone(),
                policy: RetryPolicy::from_config(&self.config.dispatch),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            },
            spec,
        };

        tracing::info!("Controller: {} scheduled ({})", event, handle.spec.name);
        events.insert(event, Arc::new(handle));
        Ok(())
    }

    /// Starts accepting telemetry and spawns the event's pipeline.
    pub async fn activate(&self, event: EventId) -> Result<(), LifecycleError> {
        let handle = self.handle(event).await.ok_or(LifecycleError::UnknownEvent(event))?;
        let mut state = handle.state.lock().await;
        let from = state.status;
        let to = LifecycleGraph::apply(event, from, LifecycleRequest::Activate)?;

        let depth = self.config.matcher.queue_depth;
        let (match_tx, match_rx) = mpsc::channel(depth);
        let (candidate_tx, candidate_rx) = mpsc::channel(depth);
        let (cause_tx, cause_rx) = mpsc::channel(self.config.dispatch.queue_depth);

        let ctx = &handle.dispatch;
        ctx.tracker.spawn(pipeline::run_matcher(
            event,
            PatternMatcher::new(self.similarity.clone()),
            self.catalog.clone(),
            match_rx,
            candidate_tx,
            ctx.recorder.clone(),
            ctx.cancel.clone(),
        ));
        ctx.tracker.spawn(pipeline::run_correlator(
            event,
            self.rules.clone(),
            self.config.biometrics.freshness_ms,
            candidate_rx,
            handle.snapshot_tx.subscribe(),
            cause_tx,
            ctx.recorder.clone(),
            self.sinks.audit.clone(),
            ctx.cancel.clone(),
        ));
        ctx.tracker.spawn(pipeline::run_dispatcher(ctx.clone(), cause_rx));

        state.match_tx = Some(match_tx);
        state.status = to;
        drop(state);

        handle.record(PipelineEvent::Lifecycle { from, to }).await;
        tracing::info!("Controller: {} {} -> {}", event, from, to);
        Ok(())
    }

    /// Halts intake at once, cancels the event's tasks, discards buffered
    /// telemetry and checks out whoever is still inside.
    pub async fn close(&self, event: EventId) -> Result<EventSummary, LifecycleError> {
        let handle = self.handle(event).await.ok_or(LifecycleError::UnknownEvent(event))?;

        let mut state = handle.state.lock().await;
        let from = state.status;
        let to = LifecycleGraph::apply(event, from, LifecycleRequest::Close)?;
        state.status = to;
        state.match_tx = None;
        handle.dispatch.cancel.cancel();

        let discarded = state.normalizer.discard();
        let checked_out = state.roster.check_out_all(Utc::now());
        state.aggregator = BiometricAggregator::new(event, self.config.biometrics.clone());
        handle.snapshot_tx.send_replace(BiometricSnapshot::empty(event));
        let sessions = state.roster.all();
        drop(state);

        handle.record(PipelineEvent::Lifecycle { from, to }).await;

        let tracker = &handle.dispatch.tracker;
        tracker.close();
        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            tracing::warn!("Controller: {} tasks still running after {:?}", event, grace);
        }

        let metrics = handle.dispatch.recorder.lock().await.snapshot();
        let (triggers, undelivered) = {
            let ledger = handle.dispatch.ledger.lock().await;
            (ledger.len(), ledger.pending())
        };
        let summary = EventSummary {
            event,
            name: handle.spec.name.clone(),
            detected_patterns: metrics.matching.promoted,
            triggers,
            undelivered,
            discarded_records: discarded,
            checked_out_on_close: checked_out,
            sessions,
            metrics,
        };

        handle.state.lock().await.summary = Some(summary.clone());
        tracing::info!(
            "Controller: {} {} -> {} ({} patterns, {} triggers, {} records discarded)",
            event,
            from,
            to,
            summary.detected_patterns,
            summary.triggers,
            discarded
        );
        Ok(summary)
    }

    /// Closes every event that is not already closed.
    pub async fn shutdown(&self) -> Vec<EventSummary> {
        let ids: Vec<EventId> = self.events.read().await.keys().copied().collect();
        let mut summaries = Vec::new();
        for id in ids {
            if let Ok(summary) = self.close(id).await {
                summaries.push(summary);
            }
        }
        summaries
    }

    // --- Intake ---

    /// Entry point for every telemetry record, real or simulated.
    pub async fn ingest(&self, record: TelemetryRecord) -> Result<IngestAck, RecordRejection> {
        let event = record.event();
        let Some(handle) = self.handle(event).await else {
            tracing::debug!("Intake: record for unknown {}", event);
            return Err(RecordRejection::UnknownEvent(event));
        };

        let mut state = handle.state.lock().await;
        let status = state.status;
        let ack = match state.normalizer.accept(&record, status) {
            Ok(ack) => ack,
            Err(rejection) => {
                drop(state);
                tracing::debug!("Intake: {} rejected: {}", event, rejection);
                handle.record(PipelineEvent::RecordRejected { kind: rejection.kind() }).await;
                return Err(rejection);
            }
        };

        let mut backpressure = false;
        match &record {
            TelemetryRecord::Movement(sample) => {
                let catalog = self.catalog.current();
                if !catalog.is_empty() {
                    let window = state.normalizer.movement_window(&sample.stream, catalog.max_window_ms());
                    if let Some(tx) = &state.match_tx {
                        backpressure = tx.try_send(MatchJob { window }).is_err();
                    }
                }
            }
            TelemetryRecord::Biometric(sample) => {
                let snapshot = state.aggregator.update(sample).clone();
                handle.snapshot_tx.send_replace(snapshot);
            }
        }
        drop(state);

        let mut recorder = handle.dispatch.recorder.lock().await;
        recorder.record(PipelineEvent::RecordAccepted);
        if let IngestAck::BufferOverflow { evicted } = ack {
            tracing::warn!("Intake: {} stream {} overflowed, evicted {}", event, record.stream(), evicted);
            recorder.record(PipelineEvent::BufferOverflow { evicted });
        }
        if backpressure {
            tracing::debug!("Intake: {} matcher busy, skipped evaluation", event);
            recorder.record(PipelineEvent::MatchBackpressure);
        }
        Ok(ack)
    }

    // --- Attendance ---

    pub async fn check_in(&self, event: EventId, participant: ParticipantId) -> Result<ParticipantSession, SessionError> {
        let handle = self.handle(event).await.ok_or(SessionError::UnknownEvent(event))?;
        let mut state = handle.state.lock().await;
        let status = state.status;
        let result = state.roster.check_in(event, status, participant, Utc::now());
        drop(state);

        match &result {
            Ok(_) => handle.record(PipelineEvent::Attendance(AttendanceEvent::CheckedIn)).await,
            Err(SessionError::CapacityReached { .. }) => {
                handle.record(PipelineEvent::Attendance(AttendanceEvent::CapacityRefused)).await
            }
            Err(_) => {}
        }
        result
    }

    /// Always allowed, including after close. `None` if the participant never
    /// checked in.
    pub async fn check_out(
        &self,
        event: EventId,
        participant: ParticipantId,
    ) -> Result<Option<ParticipantSession>, SessionError> {
        let handle = self.handle(event).await.ok_or(SessionError::UnknownEvent(event))?;
        let session = handle.state.lock().await.roster.check_out(participant, Utc::now());
        if session.is_some() {
            handle.record(PipelineEvent::Attendance(AttendanceEvent::CheckedOut)).await;
        }
        Ok(session)
    }

    // --- Dispatch ---

    /// Re-submits a cause. Already dispatched causes come back as `replayed`
    /// without touching the sinks; closed events only replay.
    pub async fn dispatch(&self, cause: &CausalRecord) -> Result<DispatchPlan, LifecycleError> {
        let event = cause.event();
        let handle = self.handle(event).await.ok_or(LifecycleError::UnknownEvent(event))?;
        let status = handle.state.lock().await.status;
        if status == EventStatus::Active {
            Ok(pipeline::dispatch(&handle.dispatch, cause).await)
        } else {
            let specs = self.rules.triggers_for(cause);
            Ok(handle.dispatch.ledger.lock().await.replay(cause, specs))
        }
    }

    // --- Queries ---

    pub async fn status(&self, event: EventId) -> Option<EventStatus> {
        let handle = self.handle(event).await?;
        let status = handle.state.lock().await.status;
        Some(status)
    }

    pub async fn spec(&self, event: EventId) -> Option<EventSpec> {
        self.handle(event).await.map(|h| h.spec.clone())
    }

    pub async fn events(&self) -> Vec<EventId> {
        let mut ids: Vec<EventId> = self.events.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Dispatched triggers in dispatch order.
    pub async fn triggers(&self, event: EventId) -> Vec<TriggerRequest> {
        match self.handle(event).await {
            Some(handle) => handle.dispatch.ledger.lock().await.requests().to_vec(),
            None => Vec::new(),
        }
    }

    pub async fn metrics(&self, event: EventId) -> Option<MetricsSnapshot> {
        let handle = self.handle(event).await?;
        let snapshot = handle.dispatch.recorder.lock().await.snapshot();
        Some(snapshot)
    }

    pub async fn biometrics(&self, event: EventId) -> Option<BiometricSnapshot> {
        let handle = self.handle(event).await?;
        let snapshot = handle.snapshot_tx.borrow().clone();
        Some(snapshot)
    }

    pub async fn sessions(&self, event: EventId) -> Vec<ParticipantSession> {
        match self.handle(event).await {
            Some(handle) => handle.state.lock().await.roster.all(),
            None => Vec::new(),
        }
    }

    pub async fn summary(&self, event: EventId) -> Option<EventSummary> {
        let handle = self.handle(event).await?;
        let summary = handle.state.lock().await.summary.clone();
        summary
    }
}
