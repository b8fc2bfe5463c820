use std::collections::BTreeMap;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;

use crate::kernel::trigger::{IdempotencyKey, TriggerRequest};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Transient; the dispatcher retries with the same key.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    /// Permanent; retrying would not help.
    #[error("sink rejected request: {0}")]
    Rejected(String),
}

/// Sound or visualization generator. Returning `Ok` is the acknowledgement.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn deliver(&self, request: &TriggerRequest) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogTriggerSink;

#[async_trait]
impl TriggerSink for LogTriggerSink {
    async fn deliver(&self, request: &TriggerRequest) -> Result<(), SinkError> {
        tracing::info!(
            "[TRIGGER] {} #{} intensity={:.2}",
            request.key,
            request.dispatch_seq,
            request.parameters.intensity()
        );
        Ok(())
    }
}

/// In-memory generator that dedupes by idempotency key the way the external
/// collaborator is expected to.
#[derive(Debug, Default)]
pub struct RecordingTriggerSink {
    inner: Mutex<Recorded>,
}

#[derive(Debug, Default)]
struct Recorded {
    calls: u64,
    accepted: Vec<TriggerRequest>,
    by_key: BTreeMap<IdempotencyKey, usize>,
}

impl RecordingTriggerSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distinct requests, in the order they first arrived.
    pub async fn accepted(&self) -> Vec<TriggerRequest> {
        self.inner.lock().await.accepted.clone()
    }

    /// Raw delivery calls, duplicates included.
    pub async fn calls(&self) -> u64 {
        self.inner.lock().await.calls
    }
}

#[async_trait]
impl TriggerSink for RecordingTriggerSink {
    async fn deliver(&self, request: &TriggerRequest) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().await;
        inner.calls += 1;
        if !inner.by_key.contains_key(&request.key) {
            let idx = inner.accepted.len();
            inner.by_key.insert(request.key, idx);
            inner.accepted.push(request.clone());
        }
        Ok(())
    }
}

/// POSTs the request as JSON with an `Idempotency-Key` header.
#[derive(Clone)]
pub struct HttpTriggerSink {
    client: Client,
    url: String,
}

impl HttpTriggerSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl TriggerSink for HttpTriggerSink {
    async fn deliver(&self, request: &TriggerRequest) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", request.key.to_string())
            .json(request)
            .send()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::CONFLICT {
            // 409: the generator already has this key.
            Ok(())
        } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(SinkError::Unavailable(format!("generator returned {}", status)))
        } else {
            Err(SinkError::Rejected(format!("generator returned {}", status)))
        }
    }
}
