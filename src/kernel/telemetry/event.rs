use serde::{Deserialize, Serialize};
use crate::kernel::correlator::SuppressionKind;
use crate::kernel::lifecycle::EventStatus;
use crate::kernel::normalizer::RejectionKind;
use crate::kernel::record::TemplateId;
use crate::kernel::trigger::{CauseId, TriggerKind};

// Allowed: IDs, Sequence numbers, Durations, Counts, Enums
// Forbidden: Positions, Heart rate, GSR, Emotional state

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    Lifecycle {
        from: EventStatus,
        to: EventStatus,
    },

    RecordAccepted,

    RecordRejected {
        kind: RejectionKind,
    },

    BufferOverflow {
        evicted: usize,
    },

    /// Matcher queue full; the evaluation for this record was skipped.
    MatchBackpressure,

    Candidate {
        template: TemplateId,
    },

    Promoted {
        sequence: u64,
        template: TemplateId,
    },

    Suppressed {
        kind: SuppressionKind,
    },

    Crossing {
        sequence: u64,
    },

    TriggerDispatched {
        cause: CauseId,
        kind: TriggerKind,
    },

    TriggerReplayed {
        cause: CauseId,
        kind: TriggerKind,
    },

    Delivery {
        kind: TriggerKind,
        outcome: DeliveryOutcome,
        attempts: u32,
        latency_ms: u64,
    },

    Attendance(AttendanceEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    Acknowledged,
    TimedOut,
    Rejected,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceEvent {
    CheckedIn,
    CheckedOut,
    CapacityRefused,
}
