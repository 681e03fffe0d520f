//! Data model for run traces, spans and usage snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use runwright_core::event::ToolEventOutcome;

// ── Span ──────────────────────────────────────────────────────────────────

/// The kind of work a span represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// One model turn of an agent.
    Turn,
    /// A tool call, from dispatch to result.
    ToolExecution,
    /// Control moving between agents.
    Handoff,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Turn => write!(f, "turn"),
            Self::ToolExecution => write!(f, "tool_execution"),
            Self::Handoff => write!(f, "handoff"),
        }
    }
}

/// A single traced execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Unique identifier.
    pub id: String,
    /// Parent span id (None for root spans).
    pub parent_id: Option<String>,
    /// What kind of work this represents.
    pub kind: SpanKind,
    /// Human-readable label (tool name, agent name).
    pub label: String,
    /// When the span started.
    pub started_at: DateTime<Utc>,
    /// When the span ended (None if still running).
    pub ended_at: Option<DateTime<Utc>>,
    /// Duration in milliseconds (computed on end).
    pub duration_ms: Option<u64>,
    /// How a tool span ended.
    pub outcome: Option<ToolEventOutcome>,
    /// Arbitrary metadata.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Span {
    /// Create a new span with the given kind and label.
    pub fn new(kind: SpanKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            kind,
            label: label.into(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            outcome: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Set the parent span.
    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Mark the span as ended at `at`.
    pub fn end_at(&mut self, at: DateTime<Utc>) {
        self.ended_at = Some(at);
        self.duration_ms = Some(
            at.signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// All spans of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Unique trace id.
    pub id: String,
    /// Label of the run, usually the starting agent.
    pub label: String,
    /// All closed spans in this trace.
    pub spans: Vec<Span>,
    /// When the trace started.
    pub started_at: DateTime<Utc>,
    /// When the trace ended.
    pub ended_at: Option<DateTime<Utc>>,
}

impl Trace {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            spans: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Add a span to this trace.
    pub fn add_span(&mut self, span: Span) {
        self.spans.push(span);
    }

    /// Mark the trace as complete.
    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Number of tool executions in this trace.
    pub fn tool_execution_count(&self) -> usize {
        self.spans_of(SpanKind::ToolExecution).count()
    }

    pub fn spans_of(&self, kind: SpanKind) -> impl Iterator<Item = &Span> {
        self.spans.iter().filter(move |s| s.kind == kind)
    }
}

// ── Usage ─────────────────────────────────────────────────────────────────

/// Running counters across every trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub turns: u64,
    pub tool_executions: u64,
    /// Tool spans that ended in anything but `completed`.
    pub tool_failures: u64,
    pub handoffs: u64,
    /// Items streamed to the sink.
    pub items: u64,
    /// Tool end events without a matching start.
    pub unpaired_ends: u64,
    /// Tool spans currently open.
    pub open_spans: u64,
    pub trace_count: u64,
}
