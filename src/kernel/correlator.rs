use std::collections::HashMap;
use serde::{Deserialize, Serialize};

use super::biometrics::{BiometricSnapshot, Freshness};
use super::matcher::MatchCandidate;
use super::record::{EventId, StreamId, TemplateId};
use super::time::Timestamp;
use super::trigger::{CauseId, SoundVoice, TriggerParameters, VisualStyle};

/// Acceptance range over the biometric snapshot. Unset bounds are open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiometricGate {
    #[serde(default)]
    pub min_intensity: Option<f32>,
    #[serde(default)]
    pub max_intensity: Option<f32>,
    #[serde(default)]
    pub min_heart_rate: Option<f32>,
    #[serde(default)]
    pub max_heart_rate: Option<f32>,
}

impl BiometricGate {
    pub fn min_intensity(min: f32) -> Self {
        Self {
            min_intensity: Some(min),
            ..Self::default()
        }
    }

    pub fn admits(&self, snapshot: &BiometricSnapshot) -> bool {
        let intensity = snapshot.intensity;
        if self.min_intensity.is_some_and(|min| intensity < min) {
            return false;
        }
        if self.max_intensity.is_some_and(|max| intensity > max) {
            return false;
        }
        if self.min_heart_rate.is_some() || self.max_heart_rate.is_some() {
            let Some(hr) = snapshot.mean_heart_rate else {
                return false;
            };
            if self.min_heart_rate.is_some_and(|min| hr < min) {
                return false;
            }
            if self.max_heart_rate.is_some_and(|max| hr > max) {
                return false;
            }
        }
        true
    }
}

/// How a template's detections turn into triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRule {
    pub template: TemplateId,
    /// When set, promotion requires a fresh snapshot inside this range.
    #[serde(default)]
    pub biometric: Option<BiometricGate>,
    pub triggers: Vec<TriggerParameters>,
}

/// Rising edge of crowd intensity through `threshold`. Re-arms once
/// intensity falls below `threshold - hysteresis`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossingRule {
    pub threshold: f32,
    pub hysteresis: f32,
    pub triggers: Vec<TriggerParameters>,
}

impl Default for CrossingRule {
    fn default() -> Self {
        Self {
            threshold: 0.75,
            hysteresis: 0.05,
            triggers: vec![TriggerParameters::visualization(VisualStyle::Led)],
        }
    }
}

/// Templates without an explicit rule fire `default_triggers` ungated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleBook {
    pub rules: Vec<CorrelationRule>,
    pub default_triggers: Vec<TriggerParameters>,
    /// `None` disables crowd-intensity crossings.
    pub crossing: Option<CrossingRule>,
}

impl Default for RuleBook {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_triggers: vec![TriggerParameters::sound(SoundVoice::Percussion)],
            crossing: Some(CrossingRule::default()),
        }
    }
}

impl RuleBook {
    pub fn rule_for(&self, template: &TemplateId) -> Option<&CorrelationRule> {
        self.rules.iter().find(|r| &r.template == template)
    }

    pub fn gate_for(&self, template: &TemplateId) -> Option<&BiometricGate> {
        self.rule_for(template).and_then(|r| r.biometric.as_ref())
    }

    pub fn triggers_for(&self, cause: &CausalRecord) -> &[TriggerParameters] {
        match cause {
            CausalRecord::Pattern(p) => self
                .rule_for(&p.template)
                .map(|r| r.triggers.as_slice())
                .unwrap_or(&self.default_triggers),
            CausalRecord::Crossing(_) => self
                .crossing
                .as_ref()
                .map(|c| c.triggers.as_slice())
                .unwrap_or(&[]),
        }
    }
}

/// A promoted match. Durable: handed to the dispatcher and the audit sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub event: EventId,
    /// Strictly increasing and gapless per event, starting at 1.
    pub sequence: u64,
    pub template: TemplateId,
    pub stream: StreamId,
    pub confidence: f32,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    /// Snapshot the decision was made against, when one was required.
    pub biometric: Option<BiometricSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateCrossing {
    pub event: EventId,
    pub sequence: u64,
    pub intensity: f32,
    pub threshold: f32,
    pub at: Timestamp,
}

/// Anything the dispatcher can turn into triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum CausalRecord {
    Pattern(DetectedPattern),
    Crossing(AggregateCrossing),
}

impl CausalRecord {
    pub fn event(&self) -> EventId {
        match self {
            CausalRecord::Pattern(p) => p.event,
            CausalRecord::Crossing(c) => c.event,
        }
    }

    pub fn cause_id(&self) -> CauseId {
        match self {
            CausalRecord::Pattern(p) => CauseId::Pattern(p.sequence),
            CausalRecord::Crossing(c) => CauseId::Crossing(c.sequence),
        }
    }

    pub fn at(&self) -> Timestamp {
        match self {
            CausalRecord::Pattern(p) => p.window_end,
            CausalRecord::Crossing(c) => c.at,
        }
    }

    /// Scales the configured trigger intensity.
    pub fn strength(&self) -> f32 {
        match self {
            CausalRecord::Pattern(p) => p.confidence,
            CausalRecord::Crossing(c) => c.intensity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuppressionKind {
    BelowThreshold,
    StaleSnapshot,
    BiometricOutOfRange,
    CoolingDown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Suppression {
    BelowThreshold { confidence: f32, threshold: f32 },
    /// Biometric input required but too old (or absent). Not an error.
    StaleSnapshot { age_ms: Option<u64> },
    BiometricOutOfRange { intensity: f32 },
    CoolingDown { remaining_ms: u64 },
}

impl Suppression {
    pub fn kind(&self) -> SuppressionKind {
        match self {
            Suppression::BelowThreshold { .. } => SuppressionKind::BelowThreshold,
            Suppression::StaleSnapshot { .. } => SuppressionKind::StaleSnapshot,
            Suppression::BiometricOutOfRange { .. } => SuppressionKind::BiometricOutOfRange,
            Suppression::CoolingDown { .. } => SuppressionKind::CoolingDown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Promoted(DetectedPattern),
    Suppressed(Suppression),
}

/// Promotion authority for one event. Callers must serialize access; the
/// runtime gives each event a single correlator task.
#[derive(Debug)]
pub struct Correlator {
    event: EventId,
    freshness_ms: u64,
    next_sequence: u64,
    last_promoted: HashMap<(TemplateId, StreamId), Timestamp>,
    next_crossing: u64,
    above_crossing: bool,
}

impl Correlator {
    pub fn new(event: EventId, freshness_ms: u64) -> Self {
        Self {
            event,
            freshness_ms,
            next_sequence: 1,
            last_promoted: HashMap::new(),
            next_crossing: 1,
            above_crossing: false,
        }
    }

    /// Threshold -> Biometric gate -> Cool-down -> Promote.
    pub fn consider(
        &mut self,
        candidate: &MatchCandidate,
        gate: Option<&BiometricGate>,
        snapshot: &BiometricSnapshot,
    ) -> Decision {
        // 1. Threshold
        if candidate.confidence < candidate.threshold {
            return Decision::Suppressed(Suppression::BelowThreshold {
                confidence: candidate.confidence,
                threshold: candidate.threshold,
            });
        }

        // 2. Biometric gate (only if the rule asks for it)
        let mut evidence = None;
        if let Some(gate) = gate {
            match snapshot.freshness(candidate.window_end, self.freshness_ms) {
                Freshness::Stale { age_ms } => {
                    return Decision::Suppressed(Suppression::StaleSnapshot { age_ms });
                }
                Freshness::Fresh { .. } => {}
            }
            if !gate.admits(snapshot) {
                return Decision::Suppressed(Suppression::BiometricOutOfRange {
                    intensity: snapshot.intensity,
                });
            }
            evidence = Some(snapshot.clone());
        }

        // 3. Cool-down per (template, stream)
        let key = (candidate.template.clone(), candidate.stream.clone());
        if let Some(&last) = self.last_promoted.get(&key) {
            let elapsed = candidate.window_end.since(last);
            if elapsed < candidate.cooldown_ms {
                return Decision::Suppressed(Suppression::CoolingDown {
                    remaining_ms: candidate.cooldown_ms - elapsed,
                });
            }
        }

        // 4. Promote
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.last_promoted.insert(key, candidate.window_end);

        Decision::Promoted(DetectedPattern {
            event: self.event,
            sequence,
            template: candidate.template.clone(),
            stream: candidate.stream.clone(),
            confidence: candidate.confidence,
            window_start: candidate.window_start,
            window_end: candidate.window_end,
            biometric: evidence,
        })
    }

    /// Emits a crossing on the rising edge only.
    pub fn observe_aggregate(&mut self, snapshot: &BiometricSnapshot, rule: &CrossingRule) -> Option<AggregateCrossing> {
        let at = snapshot.last_sample_at?;

        if self.above_crossing {
            if snapshot.intensity < rule.threshold - rule.hysteresis {
                self.above_crossing = false;
            }
            return None;
        }

        if snapshot.intensity >= rule.threshold {
            self.above_crossing = true;
            let sequence = self.next_crossing;
            self.next_crossing += 1;
            return Some(AggregateCrossing {
                event: self.event,
                sequence,
                intensity: snapshot.intensity,
                threshold: rule.threshold,
                at,
            });
        }
        None
    }

    /// Number of patterns promoted so far.
    pub fn promoted(&self) -> u64 {
        self.next_sequence - 1
    }
}
