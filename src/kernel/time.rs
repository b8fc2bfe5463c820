use serde::{Deserialize, Serialize};

/// Telemetry clock. Milliseconds as stamped by the producing device.
/// Only ordering within a stream is meaningful; the kernel never compares
/// these against the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp {
    pub ms: u64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { ms: 0 };

    pub fn from_millis(ms: u64) -> Self {
        Timestamp { ms }
    }

    /// Milliseconds elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn since(&self, earlier: Timestamp) -> u64 {
        self.ms.saturating_sub(earlier.ms)
    }

    pub fn saturating_sub_ms(&self, ms: u64) -> Self {
        Timestamp { ms: self.ms.saturating_sub(ms) }
    }

    pub fn add_ms(&self, ms: u64) -> Self {
        Timestamp { ms: self.ms.saturating_add(ms) }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.ms)
    }
}
