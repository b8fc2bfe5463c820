use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::kernel::correlator::CausalRecord;
use crate::kernel::trigger::TriggerRequest;

/// Creation intents offered to the external persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum AuditRecord {
    Cause(CausalRecord),
    Trigger(TriggerRequest),
}

/// Fire-and-forget from the pipeline's side: callers spawn the write and only
/// log a failure.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn persist(&self, record: AuditRecord) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogAudit;

#[async_trait]
impl AuditSink for LogAudit {
    async fn persist(&self, record: AuditRecord) -> anyhow::Result<()> {
        match &record {
            AuditRecord::Cause(cause) => {
                tracing::debug!("[AUDIT] {} {}", cause.event(), cause.cause_id());
            }
            AuditRecord::Trigger(request) => {
                tracing::debug!("[AUDIT] {} #{}", request.key, request.dispatch_seq);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }

    pub async fn causes(&self) -> Vec<CausalRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter_map(|r| match r {
                AuditRecord::Cause(c) => Some(c.clone()),
                AuditRecord::Trigger(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn persist(&self, record: AuditRecord) -> anyhow::Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }
}
