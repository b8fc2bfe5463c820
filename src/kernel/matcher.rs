use std::collections::BTreeMap;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

use super::catalog::Catalog;
use super::record::{EventId, MovementSample, StreamId, TemplateId};
use super::time::Timestamp;

pub const DEFAULT_THRESHOLD: f32 = 0.7;
pub const DEFAULT_COOLDOWN_MS: u64 = 2_000;
pub const DEFAULT_MIN_SAMPLES: usize = 5;
pub const DEFAULT_WINDOW_MS: u64 = 2_000;

/// Scalar derived from a single movement sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Height,
    VerticalVelocity,
    Speed,
    Acceleration,
    Lateral,
    Depth,
}

impl Feature {
    pub fn extract(&self, sample: &MovementSample) -> f32 {
        match self {
            Feature::Height => sample.position.y,
            Feature::VerticalVelocity => sample.velocity.y,
            Feature::Speed => sample.velocity.magnitude(),
            Feature::Acceleration => sample.acceleration.magnitude(),
            Feature::Lateral => sample.position.x,
            Feature::Depth => sample.position.z,
        }
    }
}

/// Read-only movement template from the external catalog.
///
/// `frames` is the expected trajectory: one row per step, one column per
/// entry of `features`. A window is resampled to `frames.len()` steps
/// before being scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternTemplate {
    pub id: TemplateId,
    pub name: String,
    pub features: Vec<Feature>,
    pub frames: Vec<Vec<f32>>,
    /// Per-feature normalization. Missing entries mean 1.0.
    #[serde(default)]
    pub scale: Vec<f32>,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Template-specific knobs that have no place in the typed schema.
    #[serde(default)]
    pub tuning: BTreeMap<String, f64>,
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_cooldown_ms() -> u64 {
    DEFAULT_COOLDOWN_MS
}

fn default_min_samples() -> usize {
    DEFAULT_MIN_SAMPLES
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("template {0}: no features declared")]
    NoFeatures(TemplateId),
    #[error("template {0}: no frames declared")]
    NoFrames(TemplateId),
    #[error("template {id}: frame {frame} has {got} values, expected {expected}")]
    FrameWidth {
        id: TemplateId,
        frame: usize,
        got: usize,
        expected: usize,
    },
    #[error("template {id}: threshold {threshold} outside [0, 1]")]
    Threshold { id: TemplateId, threshold: f32 },
    #[error("template {0}: scale entries must be finite and positive")]
    Scale(TemplateId),
}

impl PatternTemplate {
    pub fn new(id: &str, features: Vec<Feature>, frames: Vec<Vec<f32>>) -> Self {
        Self {
            id: TemplateId::new(id),
            name: id.to_string(),
            features,
            frames,
            scale: Vec::new(),
            threshold: DEFAULT_THRESHOLD,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            min_samples: DEFAULT_MIN_SAMPLES,
            window_ms: DEFAULT_WINDOW_MS,
            tuning: BTreeMap::new(),
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    pub fn with_window(mut self, window_ms: u64, min_samples: usize) -> Self {
        self.window_ms = window_ms;
        self.min_samples = min_samples;
        self
    }

    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.features.is_empty() {
            return Err(TemplateError::NoFeatures(self.id.clone()));
        }
        if self.frames.is_empty() {
            return Err(TemplateError::NoFrames(self.id.clone()));
        }
        let expected = self.features.len();
        for (frame, row) in self.frames.iter().enumerate() {
            if row.len() != expected {
                return Err(TemplateError::FrameWidth {
                    id: self.id.clone(),
                    frame,
                    got: row.len(),
                    expected,
                });
            }
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(TemplateError::Threshold {
                id: self.id.clone(),
                threshold: self.threshold,
            });
        }
        if self.scale.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(TemplateError::Scale(self.id.clone()));
        }
        Ok(())
    }

    pub fn scale_for(&self, feature_idx: usize) -> f32 {
        self.scale.get(feature_idx).copied().unwrap_or(1.0)
    }
}

/// Scores a resampled window against a template. Must return a value in
/// [0, 1]; anything else is clamped by the matcher.
pub trait Similarity: Send + Sync + std::fmt::Debug {
    fn score(&self, observed: &[Vec<f32>], template: &PatternTemplate) -> f32;
}

/// exp(-sharpness * d^2) over the normalized RMS distance `d`.
#[derive(Debug, Clone, Copy)]
pub struct GaussianSimilarity {
    pub sharpness: f32,
}

impl Similarity for GaussianSimilarity {
    fn score(&self, observed: &[Vec<f32>], template: &PatternTemplate) -> f32 {
        let d = normalized_rms(observed, template);
        (-self.sharpness * d * d).exp()
    }
}

/// Cosine of the angle between the flattened, scaled trajectories, floored at 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineSimilarity;

impl Similarity for CosineSimilarity {
    fn score(&self, observed: &[Vec<f32>], template: &PatternTemplate) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_o = 0.0f32;
        let mut norm_t = 0.0f32;
        for (obs_row, tpl_row) in observed.iter().zip(&template.frames) {
            for (i, (o, t)) in obs_row.iter().zip(tpl_row).enumerate() {
                let s = template.scale_for(i);
                let (o, t) = (o / s, t / s);
                dot += o * t;
                norm_o += o * o;
                norm_t += t * t;
            }
        }
        if norm_o == 0.0 || norm_t == 0.0 {
            return 0.0;
        }
        (dot / (norm_o.sqrt() * norm_t.sqrt())).max(0.0)
    }
}

fn normalized_rms(observed: &[Vec<f32>], template: &PatternTemplate) -> f32 {
    let mut sum = 0.0f32;
    let mut n = 0usize;
    for (obs_row, tpl_row) in observed.iter().zip(&template.frames) {
        for (i, (o, t)) in obs_row.iter().zip(tpl_row).enumerate() {
            let diff = (o - t) / template.scale_for(i);
            sum += diff * diff;
            n += 1;
        }
    }
    if n == 0 {
        return f32::INFINITY;
    }
    (sum / n as f32).sqrt()
}

/// Linear resampling of per-sample feature rows onto `steps` evenly spaced points.
pub fn resample(rows: &[Vec<f32>], steps: usize) -> Vec<Vec<f32>> {
    if rows.is_empty() || steps == 0 {
        return Vec::new();
    }
    if steps == 1 || rows.len() == 1 {
        return vec![rows[rows.len() - 1].clone(); steps];
    }

    let last = (rows.len() - 1) as f32;
    (0..steps)
        .map(|j| {
            let pos = j as f32 * last / (steps - 1) as f32;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(rows.len() - 1);
            let frac = pos - lo as f32;
            rows[lo]
                .iter()
                .zip(&rows[hi])
                .map(|(a, b)| a + (b - a) * frac)
                .collect()
        })
        .collect()
}

/// A template that cleared its own threshold on some window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub event: EventId,
    pub template: TemplateId,
    pub stream: StreamId,
    pub confidence: f32,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    /// Copied from the template so the correlator never has to consult the catalog.
    pub threshold: f32,
    pub cooldown_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PatternMatcher {
    similarity: Arc<dyn Similarity>,
}

impl PatternMatcher {
    pub fn new(similarity: Arc<dyn Similarity>) -> Self {
        Self { similarity }
    }

    /// Scores the tail of `window` (one stream, oldest first) against every
    /// template whose minimum window fits. Every qualifying template yields
    /// a candidate; precedence is left to the correlator.
    pub fn evaluate(&self, window: &[MovementSample], catalog: &Catalog) -> Vec<MatchCandidate> {
        let Some(newest) = window.last() else {
            return Vec::new();
        };

        let mut candidates = Vec::new();
        for template in catalog.templates() {
            let cutoff = newest.at.saturating_sub_ms(template.window_ms);
            let span: Vec<&MovementSample> = window.iter().filter(|s| s.at >= cutoff).collect();
            if span.len() < template.min_samples.max(1) {
                continue;
            }

            let rows: Vec<Vec<f32>> = span
                .iter()
                .map(|s| template.features.iter().map(|f| f.extract(s)).collect())
                .collect();
            let observed = resample(&rows, template.frames.len());

            let confidence = self.similarity.score(&observed, template);
            if !confidence.is_finite() {
                continue;
            }
            let confidence = confidence.clamp(0.0, 1.0);

            if confidence >= template.threshold {
                candidates.push(MatchCandidate {
                    event: newest.event,
                    template: template.id.clone(),
                    stream: newest.stream.clone(),
                    confidence,
                    window_start: span[0].at,
                    window_end: newest.at,
                    threshold: template.threshold,
                    cooldown_ms: template.cooldown_ms,
                });
            }
        }
        candidates
    }
}
