use std::collections::HashMap;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::correlator::CausalRecord;
use super::record::EventId;
use super::trigger::{DeliveryStatus, IdempotencyKey, TriggerParameters, TriggerRequest};

/// Result of planning triggers for one cause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchPlan {
    /// New requests to hand to the sinks.
    pub fresh: Vec<TriggerRequest>,
    /// Requests that already existed for this key. Not redelivered.
    pub replayed: Vec<TriggerRequest>,
}

impl DispatchPlan {
    pub fn all(&self) -> impl Iterator<Item = &TriggerRequest> {
        self.fresh.iter().chain(self.replayed.iter())
    }
}

/// Per-event record of every trigger ever dispatched, keyed for idempotency.
/// Dispatch order is the order `plan` was called in.
#[derive(Debug)]
pub struct TriggerLedger {
    event: EventId,
    next_dispatch: u64,
    requests: Vec<TriggerRequest>,
    by_key: HashMap<IdempotencyKey, usize>,
}

impl TriggerLedger {
    pub fn new(event: EventId) -> Self {
        Self {
            event,
            next_dispatch: 1,
            requests: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    /// One request per configured trigger kind. A cause that was already
    /// planned returns its prior requests under `replayed`.
    pub fn plan(&mut self, cause: &CausalRecord, specs: &[TriggerParameters], now: DateTime<Utc>) -> DispatchPlan {
        let mut plan = DispatchPlan::default();
        if cause.event() != self.event {
            return plan;
        }

        for spec in specs {
            let key = IdempotencyKey {
                event: self.event,
                cause: cause.cause_id(),
                kind: spec.kind(),
            };

            if let Some(&idx) = self.by_key.get(&key) {
                // Same kind twice in one rule collapses too.
                if !plan.replayed.iter().chain(plan.fresh.iter()).any(|r| r.key == key) {
                    plan.replayed.push(self.requests[idx].clone());
                }
                continue;
            }

            let request = TriggerRequest {
                id: Uuid::new_v4(),
                key,
                parameters: spec.realize(cause.strength()),
                dispatch_seq: self.next_dispatch,
                cause_at: cause.at(),
                dispatched_at: now,
                status: DeliveryStatus::Pending,
            };
            self.next_dispatch += 1;
            self.by_key.insert(key, self.requests.len());
            self.requests.push(request.clone());
            plan.fresh.push(request);
        }
        plan
    }

    /// Lookup-only variant of `plan`, for events that no longer dispatch.
    pub fn replay(&self, cause: &CausalRecord, specs: &[TriggerParameters]) -> DispatchPlan {
        let mut plan = DispatchPlan::default();
        for spec in specs {
            let key = IdempotencyKey {
                event: self.event,
                cause: cause.cause_id(),
                kind: spec.kind(),
            };
            if let Some(request) = self.get(&key) {
                if !plan.replayed.iter().any(|r| r.key == key) {
                    plan.replayed.push(request.clone());
                }
            }
        }
        plan
    }

    /// Returns false for a key this ledger never issued.
    pub fn set_status(&mut self, key: &IdempotencyKey, status: DeliveryStatus) -> bool {
        match self.by_key.get(key) {
            Some(&idx) => {
                self.requests[idx].status = status;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &IdempotencyKey) -> Option<&TriggerRequest> {
        self.by_key.get(key).map(|&idx| &self.requests[idx])
    }

    /// Every request in dispatch order.
    pub fn requests(&self) -> &[TriggerRequest] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.requests
            .iter()
            .filter(|r| r.status == DeliveryStatus::Pending)
            .count()
    }
}
