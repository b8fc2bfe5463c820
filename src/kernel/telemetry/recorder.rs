use std::collections::VecDeque;
use super::event::PipelineEvent;
use super::metrics::MetricsSnapshot;

const MAX_EVENTS: usize = 10_000;

/// Bounded per-event log plus running totals. Eviction trims the log only;
/// the totals count every event ever recorded.
#[derive(Debug)]
pub struct TelemetryRecorder {
    buffer: VecDeque<PipelineEvent>,
    totals: MetricsSnapshot,
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::with_capacity(1024),
            totals: MetricsSnapshot::default(),
        }
    }

    pub fn record(&mut self, event: PipelineEvent) {
        self.totals.apply(&event);
        if self.buffer.len() >= MAX_EVENTS {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.totals.clone()
    }

    pub fn events(&self) -> impl Iterator<Item = &PipelineEvent> {
        self.buffer.iter()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drops the log and resets the totals.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.totals = MetricsSnapshot::default();
    }
}
