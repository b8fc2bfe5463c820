use std::collections::VecDeque;
use super::time::Timestamp;
use super::record::{BiometricSample, MovementSample};

pub trait Timestamped {
    fn at(&self) -> Timestamp;
}

impl Timestamped for MovementSample {
    fn at(&self) -> Timestamp {
        self.at
    }
}

impl Timestamped for BiometricSample {
    fn at(&self) -> Timestamp {
        self.at
    }
}

/// Result of a single append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendOutcome {
    /// Records dropped because the buffer was at capacity.
    pub overflowed: usize,
    /// Records dropped because they fell behind the horizon.
    pub expired: usize,
}

/// Sliding window over one stream: at most `capacity` records, none older
/// than `horizon_ms` behind the newest one.
#[derive(Debug, Clone)]
pub struct StreamBuffer<T> {
    records: VecDeque<T>,
    capacity: usize,
    horizon_ms: u64,
}

impl<T: Timestamped> StreamBuffer<T> {
    pub fn new(capacity: usize, horizon_ms: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            horizon_ms,
        }
    }

    pub fn push(&mut self, record: T) -> AppendOutcome {
        let mut outcome = AppendOutcome::default();

        // Late records (within the skew tolerance) are slotted in by time.
        let at = record.at();
        let pos = self
            .records
            .iter()
            .rposition(|r| r.at() <= at)
            .map_or(0, |i| i + 1);
        self.records.insert(pos, record);

        // Horizon first: expiry is routine and should not count as overflow.
        let newest = self.records.back().map(|r| r.at()).unwrap_or(at);
        let cutoff = newest.saturating_sub_ms(self.horizon_ms);
        while let Some(front) = self.records.front() {
            if front.at() < cutoff {
                self.records.pop_front();
                outcome.expired += 1;
            } else {
                break;
            }
        }

        while self.records.len() > self.capacity {
            self.records.pop_front();
            outcome.overflowed += 1;
        }

        outcome
    }

    /// Records whose timestamp is within `span_ms` of the newest record.
    pub fn recent(&self, span_ms: u64) -> impl Iterator<Item = &T> {
        let cutoff = self
            .records
            .back()
            .map(|r| r.at().saturating_sub_ms(span_ms))
            .unwrap_or(Timestamp::ZERO);
        self.records.iter().filter(move |r| r.at() >= cutoff)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
