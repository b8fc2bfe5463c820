//! Pipeline instrumentation.
//!
//! # SAFETY INVARIANT
//! Telemetry is a READ-ONLY side-effect layer.
//! It must **NEVER** be read inside decision logic (Normalizer, Matcher, Correlator).
//! It exists solely for observability and verification.
//!
//! # PRIVACY INVARIANT
//! Telemetry events must **NEVER** contain participant data (positions, vitals, emotions).
//! Only ids (EventId, TemplateId, sequence numbers) and metrics (latencies, counts) are allowed.

pub mod event;
pub mod metrics;
pub mod recorder;
