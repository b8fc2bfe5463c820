use std::collections::HashMap;
use serde::{Deserialize, Serialize};

use super::buffer::StreamBuffer;
use super::lifecycle::EventStatus;
use super::record::{BiometricSample, EventId, MovementSample, StreamId, TelemetryRecord};
use super::time::Timestamp;
use crate::config::BufferConfig;

/// Why a record was refused at intake. The sender is told, the pipeline
/// carries on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordRejection {
    #[error("unknown event {0}")]
    UnknownEvent(EventId),
    #[error("{event} is not accepting telemetry ({status})")]
    EventNotActive { event: EventId, status: EventStatus },
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("non-finite value in `{0}`")]
    NonFinite(&'static str),
    #[error("`{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: f32 },
    #[error("stream {stream}: timestamp {got} is behind last seen {last}")]
    NonMonotonic {
        stream: StreamId,
        last: Timestamp,
        got: Timestamp,
    },
}

/// Payload-free label for telemetry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionKind {
    UnknownEvent,
    EventNotActive,
    Malformed,
    NonMonotonic,
}

impl RecordRejection {
    pub fn kind(&self) -> RejectionKind {
        match self {
            RecordRejection::UnknownEvent(_) => RejectionKind::UnknownEvent,
            RecordRejection::EventNotActive { .. } => RejectionKind::EventNotActive,
            RecordRejection::NonMonotonic { .. } => RejectionKind::NonMonotonic,
            RecordRejection::MissingField(_)
            | RecordRejection::NonFinite(_)
            | RecordRejection::OutOfRange { .. } => RejectionKind::Malformed,
        }
    }
}

/// Intake acknowledgement. Overflow is a warning: the record was stored and
/// the oldest ones were evicted to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ack", rename_all = "snake_case")]
pub enum IngestAck {
    Accepted,
    BufferOverflow { evicted: usize },
}

/// Validates and buffers telemetry for a single event.
#[derive(Debug)]
pub struct Normalizer {
    event: EventId,
    config: BufferConfig,
    movement: HashMap<StreamId, StreamBuffer<MovementSample>>,
    biometric: HashMap<StreamId, StreamBuffer<BiometricSample>>,
    last_seen: HashMap<StreamId, Timestamp>,
}

impl Normalizer {
    pub fn new(event: EventId, config: BufferConfig) -> Self {
        Self {
            event,
            config,
            movement: HashMap::new(),
            biometric: HashMap::new(),
            last_seen: HashMap::new(),
        }
    }

    /// Gate -> Validate -> Skew check -> Append.
    /// `status` is the owning event's status at the moment of intake.
    pub fn accept(&mut self, record: &TelemetryRecord, status: EventStatus) -> Result<IngestAck, RecordRejection> {
        // 1. Gate on lifecycle
        if record.event() != self.event {
            return Err(RecordRejection::UnknownEvent(record.event()));
        }
        if status != EventStatus::Active {
            return Err(RecordRejection::EventNotActive { event: self.event, status });
        }

        // 2. Shape
        validate(record)?;

        // 3. Per-stream ordering, with a small tolerance for jitter
        let stream = record.stream();
        let at = record.at();
        if let Some(&last) = self.last_seen.get(stream) {
            if last.since(at) > self.config.skew_tolerance_ms {
                return Err(RecordRejection::NonMonotonic {
                    stream: stream.clone(),
                    last,
                    got: at,
                });
            }
        }
        let entry = self.last_seen.entry(stream.clone()).or_insert(at);
        if at > *entry {
            *entry = at;
        }

        // 4. Append
        let capacity = self.config.capacity;
        let horizon = self.config.horizon_ms;
        let outcome = match record {
            TelemetryRecord::Movement(m) => self
                .movement
                .entry(m.stream.clone())
                .or_insert_with(|| StreamBuffer::new(capacity, horizon))
                .push(m.clone()),
            TelemetryRecord::Biometric(b) => self
                .biometric
                .entry(b.stream.clone())
                .or_insert_with(|| StreamBuffer::new(capacity, horizon))
                .push(b.clone()),
        };

        if outcome.overflowed > 0 {
            Ok(IngestAck::BufferOverflow { evicted: outcome.overflowed })
        } else {
            Ok(IngestAck::Accepted)
        }
    }

    /// Copy of the most recent `span_ms` of a movement stream, oldest first.
    pub fn movement_window(&self, stream: &StreamId, span_ms: u64) -> Vec<MovementSample> {
        self.movement
            .get(stream)
            .map(|buf| buf.recent(span_ms).cloned().collect())
            .unwrap_or_default()
    }

    pub fn last_seen(&self, stream: &StreamId) -> Option<Timestamp> {
        self.last_seen.get(stream).copied()
    }

    pub fn buffered(&self) -> usize {
        self.movement.values().map(|b| b.len()).sum::<usize>()
            + self.biometric.values().map(|b| b.len()).sum::<usize>()
    }

    pub fn stream_count(&self) -> usize {
        self.last_seen.len()
    }

    /// Drops every buffer. Used when the event closes.
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffered();
        self.movement.clear();
        self.biometric.clear();
        self.last_seen.clear();
        dropped
    }
}

fn validate(record: &TelemetryRecord) -> Result<(), RecordRejection> {
    if record.stream().0.trim().is_empty() {
        return Err(RecordRejection::MissingField("stream"));
    }

    match record {
        TelemetryRecord::Movement(m) => {
            if !m.position.is_finite() {
                return Err(RecordRejection::NonFinite("position"));
            }
            if !m.velocity.is_finite() {
                return Err(RecordRejection::NonFinite("velocity"));
            }
            if !m.acceleration.is_finite() {
                return Err(RecordRejection::NonFinite("acceleration"));
            }
            if let Some(intensity) = m.intensity {
                check_range("intensity", intensity, 0.0, 1.0)?;
            }
        }
        TelemetryRecord::Biometric(b) => {
            if b.heart_rate.is_none() && b.gsr.is_none() && b.temperature.is_none() {
                return Err(RecordRejection::MissingField("heart_rate|gsr|temperature"));
            }
            if let Some(hr) = b.heart_rate {
                check_range("heart_rate", hr, 20.0, 260.0)?;
            }
            if let Some(gsr) = b.gsr {
                check_range("gsr", gsr, 0.0, 100.0)?;
            }
            if let Some(temp) = b.temperature {
                check_range("temperature", temp, 25.0, 45.0)?;
            }
            if let Some(energy) = b.energy_level {
                check_range("energy_level", energy, 0.0, 1.0)?;
            }
        }
    }
    Ok(())
}

fn check_range(field: &'static str, value: f32, min: f32, max: f32) -> Result<(), RecordRejection> {
    if !value.is_finite() {
        return Err(RecordRejection::NonFinite(field));
    }
    if value < min || value > max {
        return Err(RecordRejection::OutOfRange { field, value });
    }
    Ok(())
}
