use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::kernel::trigger::{IdempotencyKey, TriggerRequest};
use crate::outputs::sink::{SinkError, TriggerSink};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("dispatch timeout: {key} unacknowledged after {attempts} attempts")]
    DispatchTimeout { key: IdempotencyKey, attempts: u32 },
    #[error("sink rejected {key} on attempt {attempts}: {reason}")]
    Rejected {
        key: IdempotencyKey,
        attempts: u32,
        reason: String,
    },
    #[error("delivery of {key} abandoned after {attempts} attempts: event closed")]
    Cancelled { key: IdempotencyKey, attempts: u32 },
}

impl DeliveryError {
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryError::DispatchTimeout { attempts, .. }
            | DeliveryError::Rejected { attempts, .. }
            | DeliveryError::Cancelled { attempts, .. } => *attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub ack_timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            ack_timeout: Duration::from_millis(config.ack_timeout_ms),
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Wait before attempt `attempt + 1`, doubling from `initial_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub attempts: u32,
    pub latency: Duration,
}

/// At-least-once delivery: every attempt carries the same idempotency key,
/// so a sink that acknowledged late sees a duplicate it can drop.
pub async fn deliver_with_retry(
    sink: &dyn TriggerSink,
    request: &TriggerRequest,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<DeliveryReceipt, DeliveryError> {
    let started = Instant::now();
    let key = request.key;
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(DeliveryError::Cancelled { key, attempts: attempt - 1 });
            }
            res = tokio::time::timeout(policy.ack_timeout, sink.deliver(request)) => res,
        };

        match outcome {
            Ok(Ok(())) => {
                return Ok(DeliveryReceipt {
                    attempts: attempt,
                    latency: started.elapsed(),
                });
            }
            Ok(Err(SinkError::Rejected(reason))) => {
                return Err(DeliveryError::Rejected { key, attempts: attempt, reason });
            }
            Ok(Err(SinkError::Unavailable(reason))) => {
                tracing::warn!("Dispatch: {} attempt {} failed: {}", key, attempt, reason);
            }
            Err(_) => {
                tracing::warn!("Dispatch: {} attempt {} timed out after {:?}", key, attempt, policy.ack_timeout);
            }
        }

        if attempt >= policy.max_attempts {
            return Err(DeliveryError::DispatchTimeout { key, attempts: attempt });
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(DeliveryError::Cancelled { key, attempts: attempt });
            }
            _ = tokio::time::sleep(policy.backoff(attempt)) => {}
        }
    }
}
