use serde::Serialize;
use super::event::{AttendanceEvent, DeliveryOutcome, PipelineEvent};
use crate::kernel::correlator::SuppressionKind;
use crate::kernel::normalizer::RejectionKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub intake: IntakeStats,
    pub matching: MatchStats,
    pub dispatch: DispatchStats,
    pub attendance: AttendanceStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntakeStats {
    pub accepted: u64,
    pub rejected_unknown_event: u64,
    pub rejected_inactive: u64,
    pub rejected_malformed: u64,
    pub rejected_non_monotonic: u64,
    pub overflows: u64,
    pub evicted: u64,
    pub backpressure_skips: u64,
}

impl IntakeStats {
    pub fn rejected(&self) -> u64 {
        self.rejected_unknown_event + self.rejected_inactive + self.rejected_malformed + self.rejected_non_monotonic
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchStats {
    pub candidates: u64,
    pub promoted: u64,
    pub below_threshold: u64,
    pub stale_snapshot: u64,
    pub out_of_range: u64,
    pub cooling_down: u64,
    pub crossings: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub replayed: u64,
    pub acknowledged: u64,
    pub timed_out: u64,
    pub rejected: u64,
    /// Cut short by the event closing.
    pub abandoned: u64,
    pub total_attempts: u64,
    pub ack_latency_total_ms: u64,
    pub avg_ack_latency_ms: f64,
    pub max_ack_latency_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttendanceStats {
    pub check_ins: u64,
    pub check_outs: u64,
    pub capacity_refusals: u64,
}

impl MetricsSnapshot {
    /// Folds one event into the running totals.
    pub fn apply(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RecordAccepted => self.intake.accepted += 1,
            PipelineEvent::RecordRejected { kind } => match kind {
                RejectionKind::UnknownEvent => self.intake.rejected_unknown_event += 1,
                RejectionKind::EventNotActive => self.intake.rejected_inactive += 1,
                RejectionKind::Malformed => self.intake.rejected_malformed += 1,
                RejectionKind::NonMonotonic => self.intake.rejected_non_monotonic += 1,
            },
            PipelineEvent::BufferOverflow { evicted } => {
                self.intake.overflows += 1;
                self.intake.evicted += *evicted as u64;
            }
            PipelineEvent::MatchBackpressure => self.intake.backpressure_skips += 1,
            PipelineEvent::Candidate { .. } => self.matching.candidates += 1,
            PipelineEvent::Promoted { .. } => self.matching.promoted += 1,
            PipelineEvent::Suppressed { kind } => match kind {
                SuppressionKind::BelowThreshold => self.matching.below_threshold += 1,
                SuppressionKind::StaleSnapshot => self.matching.stale_snapshot += 1,
                SuppressionKind::BiometricOutOfRange => self.matching.out_of_range += 1,
                SuppressionKind::CoolingDown => self.matching.cooling_down += 1,
            },
            PipelineEvent::Crossing { .. } => self.matching.crossings += 1,
            PipelineEvent::TriggerDispatched { .. } => self.dispatch.dispatched += 1,
            PipelineEvent::TriggerReplayed { .. } => self.dispatch.replayed += 1,
            PipelineEvent::Delivery { outcome, attempts, latency_ms, .. } => {
                let stats = &mut self.dispatch;
                stats.total_attempts += *attempts as u64;
                match outcome {
                    DeliveryOutcome::Acknowledged => {
                        stats.acknowledged += 1;
                        stats.ack_latency_total_ms += latency_ms;
                        stats.max_ack_latency_ms = stats.max_ack_latency_ms.max(*latency_ms);
                        stats.avg_ack_latency_ms = stats.ack_latency_total_ms as f64 / stats.acknowledged as f64;
                    }
                    DeliveryOutcome::TimedOut => stats.timed_out += 1,
                    DeliveryOutcome::Rejected => stats.rejected += 1,
                    DeliveryOutcome::Abandoned => stats.abandoned += 1,
                }
            }
            PipelineEvent::Attendance(kind) => match kind {
                AttendanceEvent::CheckedIn => self.attendance.check_ins += 1,
                AttendanceEvent::CheckedOut => self.attendance.check_outs += 1,
                AttendanceEvent::CapacityRefused => self.attendance.capacity_refusals += 1,
            },
            PipelineEvent::Lifecycle { .. } => {}
        }
    }
}
