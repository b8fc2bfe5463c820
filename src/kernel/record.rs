use serde::{Deserialize, Serialize};
use super::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

/// Device or participant stream within an event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl TemplateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event-{}", self.0)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Decoded pose telemetry for one tracked point of a dancer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementSample {
    pub event: EventId,
    pub stream: StreamId,
    pub at: Timestamp,
    pub position: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    /// Producer-side intensity estimate, if the tracker computes one.
    #[serde(default)]
    pub intensity: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalState {
    Calm,
    Excited,
    Joyful,
    Focused,
    Energetic,
}

impl EmotionalState {
    const BUCKETS: [EmotionalState; 5] = [
        EmotionalState::Calm,
        EmotionalState::Excited,
        EmotionalState::Joyful,
        EmotionalState::Focused,
        EmotionalState::Energetic,
    ];

    /// Buckets a normalized energy level into fifths.
    pub fn from_energy(energy: f32) -> Self {
        let idx = (energy.clamp(0.0, 1.0) * Self::BUCKETS.len() as f32) as usize;
        Self::BUCKETS[idx.min(Self::BUCKETS.len() - 1)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricSample {
    pub event: EventId,
    pub stream: StreamId,
    pub at: Timestamp,
    #[serde(default)]
    pub heart_rate: Option<f32>,
    /// Galvanic skin response, microsiemens.
    #[serde(default)]
    pub gsr: Option<f32>,
    /// Skin temperature, Celsius.
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub energy_level: Option<f32>,
    #[serde(default)]
    pub emotional_state: Option<EmotionalState>,
}

impl BiometricSample {
    /// The reported emotional state, or one derived from the energy level.
    pub fn emotion(&self) -> Option<EmotionalState> {
        self.emotional_state
            .or_else(|| self.energy_level.map(EmotionalState::from_energy))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryRecord {
    Movement(MovementSample),
    Biometric(BiometricSample),
}

impl TelemetryRecord {
    pub fn event(&self) -> EventId {
        match self {
            TelemetryRecord::Movement(m) => m.event,
            TelemetryRecord::Biometric(b) => b.event,
        }
    }

    pub fn stream(&self) -> &StreamId {
        match self {
            TelemetryRecord::Movement(m) => &m.stream,
            TelemetryRecord::Biometric(b) => &b.stream,
        }
    }

    pub fn at(&self) -> Timestamp {
        match self {
            TelemetryRecord::Movement(m) => m.at,
            TelemetryRecord::Biometric(b) => b.at,
        }
    }
}
