use std::collections::HashSet;
use serde::{Deserialize, Serialize};

use super::record::{BiometricSample, EmotionalState, EventId, StreamId};
use super::time::Timestamp;
use crate::config::BiometricConfig;

const HEART_RATE_WEIGHT: f32 = 0.5;
const GSR_WEIGHT: f32 = 0.3;
const ENERGY_WEIGHT: f32 = 0.2;

/// Read-only view of an event's rolling biometric aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricSnapshot {
    pub event: EventId,
    pub mean_heart_rate: Option<f32>,
    pub heart_rate_variance: f32,
    /// Crowd intensity proxy in [0, 1].
    pub intensity: f32,
    pub samples: u64,
    pub contributors: usize,
    pub last_sample_at: Option<Timestamp>,
    pub last_emotion: Option<EmotionalState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh { age_ms: u64 },
    /// `age_ms` is None when nothing has ever arrived.
    Stale { age_ms: Option<u64> },
}

impl BiometricSnapshot {
    pub fn empty(event: EventId) -> Self {
        Self {
            event,
            mean_heart_rate: None,
            heart_rate_variance: 0.0,
            intensity: 0.0,
            samples: 0,
            contributors: 0,
            last_sample_at: None,
            last_emotion: None,
        }
    }

    /// Fails closed: no sample at all, or the newest one older than
    /// `freshness_ms` relative to `now`, is stale.
    pub fn freshness(&self, now: Timestamp, freshness_ms: u64) -> Freshness {
        match self.last_sample_at {
            None => Freshness::Stale { age_ms: None },
            Some(last) => {
                let age_ms = now.since(last);
                if age_ms > freshness_ms {
                    Freshness::Stale { age_ms: Some(age_ms) }
                } else {
                    Freshness::Fresh { age_ms }
                }
            }
        }
    }
}

/// Exponentially weighted heart-rate mean/variance and intensity for one event.
#[derive(Debug)]
pub struct BiometricAggregator {
    config: BiometricConfig,
    snapshot: BiometricSnapshot,
    streams: HashSet<StreamId>,
}

impl BiometricAggregator {
    pub fn new(event: EventId, config: BiometricConfig) -> Self {
        Self {
            config,
            snapshot: BiometricSnapshot::empty(event),
            streams: HashSet::new(),
        }
    }

    pub fn update(&mut self, sample: &BiometricSample) -> &BiometricSnapshot {
        let alpha = self.config.alpha.clamp(0.0, 1.0);
        let computed = self.sample_intensity(sample);
        let snap = &mut self.snapshot;

        // 1. Heart rate (West's incremental EWMA variance)
        if let Some(hr) = sample.heart_rate {
            match snap.mean_heart_rate {
                None => {
                    snap.mean_heart_rate = Some(hr);
                    snap.heart_rate_variance = 0.0;
                }
                Some(mean) => {
                    let diff = hr - mean;
                    let incr = alpha * diff;
                    snap.mean_heart_rate = Some(mean + incr);
                    snap.heart_rate_variance = (1.0 - alpha) * (snap.heart_rate_variance + diff * incr);
                }
            }
        }

        // 2. Intensity
        if let Some(sample_intensity) = computed {
            if snap.samples == 0 {
                snap.intensity = sample_intensity;
            } else {
                snap.intensity += alpha * (sample_intensity - snap.intensity);
            }
        }

        // 3. Bookkeeping
        snap.samples += 1;
        snap.last_sample_at = Some(match snap.last_sample_at {
            Some(prev) if prev > sample.at => prev,
            _ => sample.at,
        });
        if let Some(emotion) = sample.emotion() {
            snap.last_emotion = Some(emotion);
        }
        self.streams.insert(sample.stream.clone());
        snap.contributors = self.streams.len();

        &self.snapshot
    }

    pub fn snapshot(&self) -> &BiometricSnapshot {
        &self.snapshot
    }

    /// Weighted mean of whichever normalized components the sample carries.
    fn sample_intensity(&self, sample: &BiometricSample) -> Option<f32> {
        let mut weighted = 0.0;
        let mut weights = 0.0;

        if let Some(hr) = sample.heart_rate {
            let span = (self.config.peak_heart_rate - self.config.resting_heart_rate).max(1.0);
            let v = ((hr - self.config.resting_heart_rate) / span).clamp(0.0, 1.0);
            weighted += HEART_RATE_WEIGHT * v;
            weights += HEART_RATE_WEIGHT;
        }
        if let Some(gsr) = sample.gsr {
            let v = (gsr / self.config.gsr_ceiling.max(f32::EPSILON)).clamp(0.0, 1.0);
            weighted += GSR_WEIGHT * v;
            weights += GSR_WEIGHT;
        }
        if let Some(energy) = sample.energy_level {
            weighted += ENERGY_WEIGHT * energy.clamp(0.0, 1.0);
            weights += ENERGY_WEIGHT;
        }

        if weights > 0.0 {
            Some(weighted / weights)
        } else {
            None
        }
    }
}
