use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::EventId;
use super::time::Timestamp;

/// Bumped whenever a field is added to or removed from the parameter structs.
pub const PARAMETER_SCHEMA_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Sound,
    Visualization,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Sound => f.write_str("sound"),
            TriggerKind::Visualization => f.write_str("visualization"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundVoice {
    Bass,
    Percussion,
    Melody,
    Ambient,
    Vocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualStyle {
    Holographic,
    Projection,
    Laser,
    Led,
    Mist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundParameters {
    #[serde(default = "schema_version")]
    pub schema_version: u16,
    pub voice: SoundVoice,
    #[serde(default = "unit_intensity")]
    pub intensity: f32,
    #[serde(default = "default_sound_ms")]
    pub duration_ms: u64,
    #[serde(default)]
    pub tuning: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualParameters {
    #[serde(default = "schema_version")]
    pub schema_version: u16,
    pub style: VisualStyle,
    #[serde(default = "unit_intensity")]
    pub intensity: f32,
    #[serde(default = "default_visual_ms")]
    pub duration_ms: u64,
    #[serde(default)]
    pub tuning: BTreeMap<String, f64>,
}

fn schema_version() -> u16 {
    PARAMETER_SCHEMA_VERSION
}

fn unit_intensity() -> f32 {
    1.0
}

fn default_sound_ms() -> u64 {
    1_500
}

fn default_visual_ms() -> u64 {
    4_000
}

/// What the downstream generator is asked to render. Used both as the
/// configured template of a trigger and as the realized request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerParameters {
    Sound(SoundParameters),
    Visualization(VisualParameters),
}

impl TriggerParameters {
    pub fn sound(voice: SoundVoice) -> Self {
        TriggerParameters::Sound(SoundParameters {
            schema_version: PARAMETER_SCHEMA_VERSION,
            voice,
            intensity: 1.0,
            duration_ms: default_sound_ms(),
            tuning: BTreeMap::new(),
        })
    }

    pub fn visualization(style: VisualStyle) -> Self {
        TriggerParameters::Visualization(VisualParameters {
            schema_version: PARAMETER_SCHEMA_VERSION,
            style,
            intensity: 1.0,
            duration_ms: default_visual_ms(),
            tuning: BTreeMap::new(),
        })
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerParameters::Sound(_) => TriggerKind::Sound,
            TriggerParameters::Visualization(_) => TriggerKind::Visualization,
        }
    }

    pub fn intensity(&self) -> f32 {
        match self {
            TriggerParameters::Sound(p) => p.intensity,
            TriggerParameters::Visualization(p) => p.intensity,
        }
    }

    /// Configured intensity scaled by the cause's strength, clamped to [0, 1].
    pub fn realize(&self, strength: f32) -> Self {
        let mut out = self.clone();
        let scaled = (self.intensity() * strength).clamp(0.0, 1.0);
        match &mut out {
            TriggerParameters::Sound(p) => p.intensity = scaled,
            TriggerParameters::Visualization(p) => p.intensity = scaled,
        }
        out
    }
}

/// What caused a trigger. Sequence numbers are per event and per cause type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "seq", rename_all = "snake_case")]
pub enum CauseId {
    Pattern(u64),
    Crossing(u64),
}

impl std::fmt::Display for CauseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CauseId::Pattern(seq) => write!(f, "pattern-{}", seq),
            CauseId::Crossing(seq) => write!(f, "crossing-{}", seq),
        }
    }
}

/// At most one trigger per key is ever dispatched. Sinks receive the key
/// so they can dedupe redeliveries too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub event: EventId,
    pub cause: CauseId,
    pub kind: TriggerKind,
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.event.0, self.cause, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered { attempts: u32 },
    Failed { attempts: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub id: Uuid,
    pub key: IdempotencyKey,
    pub parameters: TriggerParameters,
    /// Position in this event's dispatch order, starting at 1.
    pub dispatch_seq: u64,
    /// Telemetry time of the cause.
    pub cause_at: Timestamp,
    pub dispatched_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

impl TriggerRequest {
    pub fn event(&self) -> EventId {
        self.key.event
    }

    pub fn kind(&self) -> TriggerKind {
        self.key.kind
    }

    pub fn cause(&self) -> CauseId {
        self.key.cause
    }
}
