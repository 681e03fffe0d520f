//! Run tracing for Runwright.
//!
//! [`TelemetryEngine`] is an instrumentation sink: it pairs the engine's tool
//! start/end events into spans, groups them under turn spans, and keeps
//! running usage counters.

pub mod engine;
pub mod model;

pub use engine::TelemetryEngine;
pub use model::{Span, SpanKind, Trace, UsageSnapshot};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown trace id: {0}")]
    UnknownTrace(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
