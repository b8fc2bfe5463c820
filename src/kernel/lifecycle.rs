use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::record::EventId;

/// Lifecycle of a live event. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Known to the controller, not accepting telemetry yet.
    Scheduled,
    /// Telemetry accepted, pipeline running, check-ins allowed.
    Active,
    /// Ingestion halted, ephemeral state discarded.
    Closed,
}

impl Default for EventStatus {
    fn default() -> Self {
        Self::Scheduled
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventStatus::Scheduled => "scheduled",
            EventStatus::Active => "active",
            EventStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Signals from the external event-management collaborator.
/// These are requests; `LifecycleGraph` decides whether they apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleRequest {
    Activate,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid transition for {event}: {request:?} while {from}")]
    InvalidTransition {
        event: EventId,
        from: EventStatus,
        request: LifecycleRequest,
    },
    #[error("unknown event {0}")]
    UnknownEvent(EventId),
    #[error("event {0} is already scheduled")]
    DuplicateEvent(EventId),
}

pub struct LifecycleGraph;

impl LifecycleGraph {
    /// Pure function: (Current State, Request) -> New State.
    /// Returns None if the transition is not allowed.
    pub fn transition(current: EventStatus, request: LifecycleRequest) -> Option<EventStatus> {
        use EventStatus::*;
        use LifecycleRequest::*;

        match (current, request) {
            (Scheduled, Activate) => Some(Active),
            // Cancelled before it ever started.
            (Scheduled, Close) => Some(Closed),
            (Active, Close) => Some(Closed),
            _ => None,
        }
    }

    pub fn apply(event: EventId, current: EventStatus, request: LifecycleRequest) -> Result<EventStatus, LifecycleError> {
        Self::transition(current, request).ok_or(LifecycleError::InvalidTransition {
            event,
            from: current,
            request,
        })
    }
}

/// Externally created event definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub id: EventId,
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Maximum concurrently checked-in participants.
    #[serde(default)]
    pub capacity: Option<u32>,
}

impl EventSpec {
    pub fn new(id: EventId, name: impl Into<String>) -> Self {
        let starts_at = Utc::now();
        Self {
            id,
            name: name.into(),
            location: String::new(),
            starts_at,
            ends_at: starts_at + chrono::Duration::hours(4),
            capacity: None,
        }
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }
}
