//! Per-event stages. Each active event runs its own matcher, correlator and
//! dispatcher task; nothing here is shared across events except the catalog
//! snapshot and the sinks.

use std::sync::Arc;
use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::kernel::biometrics::BiometricSnapshot;
use crate::kernel::correlator::{CausalRecord, Correlator, Decision, RuleBook, Suppression};
use crate::kernel::dispatcher::{DispatchPlan, TriggerLedger};
use crate::kernel::matcher::{MatchCandidate, PatternMatcher};
use crate::kernel::record::{EventId, MovementSample};
use crate::kernel::telemetry::event::{DeliveryOutcome, PipelineEvent};
use crate::kernel::telemetry::recorder::TelemetryRecorder;
use crate::kernel::trigger::DeliveryStatus;
use crate::outputs::audit::{AuditRecord, AuditSink};
use crate::outputs::sink::TriggerSink;
use crate::services::catalog::CatalogStore;
use crate::services::delivery::{deliver_with_retry, DeliveryError, RetryPolicy};

/// Copy of one stream's recent movement, taken at intake.
#[derive(Debug)]
pub(crate) struct MatchJob {
    pub window: Vec<MovementSample>,
}

/// Outbound collaborators shared by every event.
#[derive(Clone)]
pub struct Sinks {
    pub trigger: Arc<dyn TriggerSink>,
    pub audit: Arc<dyn AuditSink>,
}

impl Sinks {
    pub fn new(trigger: Arc<dyn TriggerSink>, audit: Arc<dyn AuditSink>) -> Self {
        Self { trigger, audit }
    }

    pub fn logging() -> Self {
        Self {
            trigger: Arc::new(crate::outputs::sink::LogTriggerSink),
            audit: Arc::new(crate::outputs::audit::LogAudit),
        }
    }
}

/// Everything needed to turn a causal record into delivered triggers.
#[derive(Clone)]
pub(crate) struct DispatchContext {
    pub event: EventId,
    pub rules: Arc<RuleBook>,
    pub ledger: Arc<Mutex<TriggerLedger>>,
    pub recorder: Arc<Mutex<TelemetryRecorder>>,
    pub sinks: Sinks,
    pub policy: RetryPolicy,
    pub cancel: CancellationToken,
    pub tracker: TaskTracker,
}

fn offer_audit(audit: &Arc<dyn AuditSink>, record: AuditRecord) {
    let audit = audit.clone();
    tokio::spawn(async move {
        if let Err(e) = audit.persist(record).await {
            tracing::warn!("Audit: persist failed: {:#}", e);
        }
    });
}

pub(crate) async fn run_matcher(
    event: EventId,
    matcher: PatternMatcher,
    catalog: Arc<CatalogStore>,
    mut jobs: mpsc::Receiver<MatchJob>,
    candidates: mpsc::Sender<MatchCandidate>,
    recorder: Arc<Mutex<TelemetryRecorder>>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let snapshot = catalog.current();
        let found = matcher.evaluate(&job.window, &snapshot);
        for candidate in found {
            tracing::debug!(
                "Matcher: {} {} on {} confidence={:.2}",
                event,
                candidate.template,
                candidate.stream,
                candidate.confidence
            );
            recorder.lock().await.record(PipelineEvent::Candidate {
                template: candidate.template.clone(),
            });
            if cancel.is_cancelled() || candidates.send(candidate).await.is_err() {
                return;
            }
        }
    }
    tracing::debug!("Matcher: {} stopped", event);
}

/// Single writer for promotion decisions of one event.
pub(crate) async fn run_correlator(
    event: EventId,
    rules: Arc<RuleBook>,
    freshness_ms: u64,
    mut candidates: mpsc::Receiver<MatchCandidate>,
    mut snapshots: watch::Receiver<BiometricSnapshot>,
    causes: mpsc::Sender<CausalRecord>,
    recorder: Arc<Mutex<TelemetryRecorder>>,
    audit: Arc<dyn AuditSink>,
    cancel: CancellationToken,
) {
    let mut correlator = Correlator::new(event, freshness_ms);

    loop {
        let cause = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            candidate = candidates.recv() => {
                let Some(candidate) = candidate else { break };
                if cancel.is_cancelled() {
                    break;
                }
                let snapshot = snapshots.borrow().clone();
                let gate = rules.gate_for(&candidate.template);

                match correlator.consider(&candidate, gate, &snapshot) {
                    Decision::Promoted(pattern) => {
                        tracing::info!(
                            "Correlator: {} #{} {} on {} ({:.2})",
                            event,
                            pattern.sequence,
                            pattern.template,
                            pattern.stream,
                            pattern.confidence
                        );
                        recorder.lock().await.record(PipelineEvent::Promoted {
                            sequence: pattern.sequence,
                            template: pattern.template.clone(),
                        });
                        CausalRecord::Pattern(pattern)
                    }
                    Decision::Suppressed(reason) => {
                        match &reason {
                            Suppression::StaleSnapshot { age_ms } => tracing::warn!(
                                "Correlator: {} {} skipped, stale biometrics (age {:?} ms)",
                                event,
                                candidate.template,
                                age_ms
                            ),
                            other => tracing::debug!("Correlator: {} {} suppressed: {:?}", event, candidate.template, other),
                        }
                        recorder.lock().await.record(PipelineEvent::Suppressed { kind: reason.kind() });
                        continue;
                    }
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() || cancel.is_cancelled() {
                    break;
                }
                let Some(rule) = rules.crossing.as_ref() else { continue };
                let snapshot = snapshots.borrow_and_update().clone();
                let Some(crossing) = correlator.observe_aggregate(&snapshot, rule) else { continue };
                tracing::info!(
                    "Correlator: {} crowd intensity {:.2} crossed {:.2} (crossing #{})",
                    event,
                    crossing.intensity,
                    crossing.threshold,
                    crossing.sequence
                );
                recorder.lock().await.record(PipelineEvent::Crossing { sequence: crossing.sequence });
                CausalRecord::Crossing(crossing)
            }
        };

        if cancel.is_cancelled() {
            break;
        }
        offer_audit(&audit, AuditRecord::Cause(cause.clone()));
        if causes.send(cause).await.is_err() {
            break;
        }
    }
    tracing::debug!("Correlator: {} stopped after {} promotions", event, correlator.promoted());
}

pub(crate) async fn run_dispatcher(ctx: DispatchContext, mut causes: mpsc::Receiver<CausalRecord>) {
    loop {
        let cause = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            cause = causes.recv() => match cause {
                Some(cause) => cause,
                None => break,
            },
        };
        if ctx.cancel.is_cancelled() {
            break;
        }
        dispatch(&ctx, &cause).await;
    }
    tracing::debug!("Dispatcher: {} stopped", ctx.event);
}

/// Plans triggers for `cause` and starts delivery of any new ones.
/// Calling it again for the same cause only replays the ledger entries.
pub(crate) async fn dispatch(ctx: &DispatchContext, cause: &CausalRecord) -> DispatchPlan {
    let specs = ctx.rules.triggers_for(cause);
    let plan = ctx.ledger.lock().await.plan(cause, specs, Utc::now());

    {
        let mut recorder = ctx.recorder.lock().await;
        for request in &plan.replayed {
            tracing::debug!("Dispatcher: {} already dispatched as #{}", request.key, request.dispatch_seq);
            recorder.record(PipelineEvent::TriggerReplayed {
                cause: request.cause(),
                kind: request.kind(),
            });
        }
        for request in &plan.fresh {
            recorder.record(PipelineEvent::TriggerDispatched {
                cause: request.cause(),
                kind: request.kind(),
            });
        }
    }

    for request in plan.fresh.iter().cloned() {
        tracing::info!("Dispatcher: {} #{}", request.key, request.dispatch_seq);
        offer_audit(&ctx.sinks.audit, AuditRecord::Trigger(request.clone()));

        let ctx = ctx.clone();
        ctx.tracker.clone().spawn(async move {
            let result = deliver_with_retry(ctx.sinks.trigger.as_ref(), &request, &ctx.policy, &ctx.cancel).await;
            let (status, outcome, attempts, latency_ms) = match &result {
                Ok(receipt) => (
                    DeliveryStatus::Delivered { attempts: receipt.attempts },
                    DeliveryOutcome::Acknowledged,
                    receipt.attempts,
                    receipt.latency.as_millis() as u64,
                ),
                Err(e) => {
                    let outcome = match e {
                        DeliveryError::Rejected { .. } => DeliveryOutcome::Rejected,
                        DeliveryError::Cancelled { .. } => DeliveryOutcome::Abandoned,
                        DeliveryError::DispatchTimeout { .. } => DeliveryOutcome::TimedOut,
                    };
                    if outcome == DeliveryOutcome::Abandoned {
                        tracing::warn!("Dispatcher: {}", e);
                    } else {
                        tracing::error!("Dispatcher: {}", e);
                    }
                    (
                        DeliveryStatus::Failed {
                            attempts: e.attempts(),
                            reason: e.to_string(),
                        },
                        outcome,
                        e.attempts(),
                        0,
                    )
                }
            };

            ctx.ledger.lock().await.set_status(&request.key, status);
            ctx.recorder.lock().await.record(PipelineEvent::Delivery {
                kind: request.kind(),
                outcome,
                attempts,
                latency_ms,
            });
        });
    }

    plan
}
