//! Synthetic dancers and wearables. Records go through
//! `SessionController::ingest` like any other producer.

use std::time::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::kernel::matcher::{Feature, PatternTemplate};
use crate::kernel::normalizer::IngestAck;
use crate::kernel::record::{BiometricSample, EventId, MovementSample, StreamId, TelemetryRecord, Vec3};
use crate::kernel::time::Timestamp;
use crate::runtime::SessionController;

const REST_HEIGHT: f32 = 1.0;
const RAISED_HEIGHT: f32 = 2.2;
const GESTURE_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub event: EventId,
    pub dancers: usize,
    pub wearers: usize,
    /// Spacing between movement samples of one dancer.
    pub tick_ms: u64,
    /// Spacing between biometric samples of one wearer.
    pub biometric_interval_ms: u64,
    /// Each dancer raises their arms once per period.
    pub gesture_period_ms: u64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            event: EventId(1),
            dancers: 10,
            wearers: 10,
            tick_ms: 100,
            biometric_interval_ms: 1_000,
            gesture_period_ms: 6_000,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone)]
struct Dancer {
    stream: StreamId,
    phase_ms: u64,
    x: f32,
    z: f32,
    last_height: f32,
}

/// Deterministic for a given seed.
#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: StdRng,
    clock: Timestamp,
    next_biometric: Timestamp,
    dancers: Vec<Dancer>,
    wearers: Vec<StreamId>,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let period = config.gesture_period_ms.max(GESTURE_MS);
        let dancers = (0..config.dancers)
            .map(|i| Dancer {
                stream: StreamId::new(format!("dancer-{}", i)),
                phase_ms: rng.gen_range(0..period),
                x: rng.gen_range(0.0f32..10.0),
                z: rng.gen_range(0.0f32..10.0),
                last_height: REST_HEIGHT,
            })
            .collect();
        let wearers = (0..config.wearers)
            .map(|i| StreamId::new(format!("wearable-{}", i)))
            .collect();

        Self {
            config,
            rng,
            clock: Timestamp::ZERO,
            next_biometric: Timestamp::ZERO,
            dancers,
            wearers,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock
    }

    /// Advances one tick and returns the records produced during it.
    pub fn step(&mut self) -> Vec<TelemetryRecord> {
        let now = self.clock;
        let event = self.config.event;
        let tick_secs = self.config.tick_ms.max(1) as f32 / 1_000.0;
        let period = self.config.gesture_period_ms.max(GESTURE_MS);
        let mut records = Vec::with_capacity(self.dancers.len() + self.wearers.len());
        let mut gesturing = 0usize;

        for dancer in &mut self.dancers {
            let t = (now.ms + dancer.phase_ms) % period;
            let target = if t < GESTURE_MS {
                gesturing += 1;
                REST_HEIGHT + (RAISED_HEIGHT - REST_HEIGHT) * (t as f32 / GESTURE_MS as f32)
            } else {
                REST_HEIGHT
            };
            let height = target + self.rng.gen_range(-0.03f32..0.03);
            let vy = (height - dancer.last_height) / tick_secs;
            dancer.last_height = height;
            dancer.x += self.rng.gen_range(-0.05f32..0.05);
            dancer.z += self.rng.gen_range(-0.05f32..0.05);

            records.push(TelemetryRecord::Movement(MovementSample {
                event,
                stream: dancer.stream.clone(),
                at: now,
                position: Vec3::new(dancer.x, height, dancer.z),
                velocity: Vec3::new(0.0, vy, 0.0),
                acceleration: Vec3::ZERO,
                intensity: None,
            }));
        }

        if now >= self.next_biometric {
            // Crowd excitement rises with the share of dancers mid-gesture.
            let excitement = if self.dancers.is_empty() {
                0.0
            } else {
                gesturing as f32 / self.dancers.len() as f32
            };
            for stream in &self.wearers {
                let heart_rate = gaussian(&mut self.rng, 80.0 + 40.0 * excitement, 15.0).clamp(40.0, 200.0);
                let energy: f32 = (self.rng.gen_range(0.0f32..1.0) * 0.5 + excitement * 0.5).min(1.0);
                records.push(TelemetryRecord::Biometric(BiometricSample {
                    event,
                    stream: stream.clone(),
                    at: now,
                    heart_rate: Some(heart_rate),
                    gsr: Some(self.rng.gen_range(0.5f32..5.0)),
                    temperature: Some(gaussian(&mut self.rng, 36.9, 0.5).clamp(30.0, 42.0)),
                    energy_level: Some(energy),
                    emotional_state: None,
                }));
            }
            self.next_biometric = now.add_ms(self.config.biometric_interval_ms);
        }

        self.clock = now.add_ms(self.config.tick_ms.max(1));
        records
    }
}

/// Box-Muller.
fn gaussian(rng: &mut StdRng, mean: f32, sd: f32) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen_range(0.0..1.0);
    mean + sd * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedReport {
    pub accepted: u64,
    pub overflowed: u64,
    pub rejected: u64,
}

/// Runs `ticks` steps through the controller. `pace` sleeps between ticks
/// to approximate real time.
pub async fn feed(
    controller: &SessionController,
    simulator: &mut Simulator,
    ticks: usize,
    pace: Option<Duration>,
) -> FeedReport {
    let mut report = FeedReport::default();
    for _ in 0..ticks {
        for record in simulator.step() {
            match controller.ingest(record).await {
                Ok(IngestAck::Accepted) => report.accepted += 1,
                Ok(IngestAck::BufferOverflow { .. }) => {
                    report.accepted += 1;
                    report.overflowed += 1;
                }
                Err(_) => report.rejected += 1,
            }
        }
        if let Some(pace) = pace {
            tokio::time::sleep(pace).await;
        }
    }
    report
}

/// raise-arms, spin and jump.
pub fn demo_templates() -> Vec<PatternTemplate> {
    let raise_arms = PatternTemplate {
        name: "Raise arms".to_string(),
        scale: vec![0.5],
        ..PatternTemplate::new(
            "raise-arms",
            vec![Feature::Height],
            vec![vec![1.0], vec![1.3], vec![1.6], vec![1.9], vec![2.2]],
        )
        .with_window(GESTURE_MS, 5)
    };

    let spin_frames = (0..8)
        .map(|i| {
            let angle = i as f32 * std::f32::consts::FRAC_PI_4;
            vec![0.5 * angle.cos(), 0.5 * angle.sin()]
        })
        .collect();
    let spin = PatternTemplate {
        name: "Spin".to_string(),
        scale: vec![0.5, 0.5],
        ..PatternTemplate::new("spin", vec![Feature::Lateral, Feature::Depth], spin_frames)
            .with_window(1_200, 8)
            .with_threshold(0.8)
    };

    let jump = PatternTemplate {
        name: "Jump".to_string(),
        scale: vec![2.0],
        ..PatternTemplate::new(
            "jump",
            vec![Feature::VerticalVelocity],
            vec![vec![0.0], vec![2.5], vec![0.0], vec![-2.5], vec![0.0]],
        )
        .with_window(800, 5)
        .with_cooldown_ms(1_000)
    };

    vec![raise_arms, spin, jump]
}
