use std::collections::HashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::lifecycle::EventStatus;
use super::record::{EventId, ParticipantId};

/// A participant's attendance at one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSession {
    pub event: EventId,
    pub participant: ParticipantId,
    pub checked_in_at: DateTime<Utc>,
    pub checked_out_at: Option<DateTime<Utc>>,
}

impl ParticipantSession {
    pub fn is_open(&self) -> bool {
        self.checked_out_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("check-in to {event} refused: event is {status}")]
    EventNotActive { event: EventId, status: EventStatus },
    #[error("check-in to {event} refused: capacity {capacity} reached")]
    CapacityReached { event: EventId, capacity: u32 },
    #[error("unknown event {0}")]
    UnknownEvent(EventId),
}

/// Check-in/check-out table for one event.
#[derive(Debug, Clone, Default)]
pub struct SessionRoster {
    sessions: HashMap<ParticipantId, ParticipantSession>,
    capacity: Option<u32>,
}

impl SessionRoster {
    pub fn new(capacity: Option<u32>) -> Self {
        Self {
            sessions: HashMap::new(),
            capacity,
        }
    }

    /// Check-in is only valid while the event is active. Checking in again
    /// while already checked in refreshes the timestamp.
    pub fn check_in(
        &mut self,
        event: EventId,
        status: EventStatus,
        participant: ParticipantId,
        at: DateTime<Utc>,
    ) -> Result<ParticipantSession, SessionError> {
        if status != EventStatus::Active {
            return Err(SessionError::EventNotActive { event, status });
        }

        let already_in = self
            .sessions
            .get(&participant)
            .map(|s| s.is_open())
            .unwrap_or(false);

        if !already_in {
            if let Some(capacity) = self.capacity {
                if self.open_count() >= capacity as usize {
                    return Err(SessionError::CapacityReached { event, capacity });
                }
            }
        }

        let session = ParticipantSession {
            event,
            participant,
            checked_in_at: at,
            checked_out_at: None,
        };
        self.sessions.insert(participant, session.clone());
        Ok(session)
    }

    /// Always allowed. Returns the closed session, or None if the participant
    /// never checked in.
    pub fn check_out(&mut self, participant: ParticipantId, at: DateTime<Utc>) -> Option<ParticipantSession> {
        let session = self.sessions.get_mut(&participant)?;
        if session.checked_out_at.is_none() {
            session.checked_out_at = Some(at);
        }
        Some(session.clone())
    }

    /// Close-time cleanup: checks out everyone still inside.
    pub fn check_out_all(&mut self, at: DateTime<Utc>) -> usize {
        let mut closed = 0;
        for session in self.sessions.values_mut() {
            if session.checked_out_at.is_none() {
                session.checked_out_at = Some(at);
                closed += 1;
            }
        }
        closed
    }

    pub fn open_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_open()).count()
    }

    pub fn get(&self, participant: ParticipantId) -> Option<&ParticipantSession> {
        self.sessions.get(&participant)
    }

    pub fn all(&self) -> Vec<ParticipantSession> {
        let mut sessions: Vec<_> = self.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.participant);
        sessions
    }
}
