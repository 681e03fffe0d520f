//! Thread-safe telemetry engine — pairs tool start/end events into spans,
//! groups them under turn spans, and serves usage reports.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use runwright_core::event::{DomainEvent, InstrumentationSink, ToolEventOutcome};

use crate::TelemetryError;
use crate::model::*;

/// The core telemetry engine.
///
/// Plug it into a runner as its instrumentation sink. Events land in the
/// most recent trace; one is started on demand.
pub struct TelemetryEngine {
    /// All recorded traces (most recent last).
    traces: RwLock<Vec<Trace>>,
    /// Spans still waiting for their end event.
    open: RwLock<OpenSpans>,
    /// Running totals.
    totals: RwLock<UsageSnapshot>,
}

#[derive(Debug, Default)]
struct OpenSpans {
    /// Open tool spans by call id.
    tools: HashMap<String, Span>,
    /// The turn span new tool spans attach to.
    turn: Option<Span>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TelemetryEngine {
    pub fn new() -> Self {
        Self {
            traces: RwLock::new(Vec::new()),
            open: RwLock::new(OpenSpans::default()),
            totals: RwLock::new(UsageSnapshot::default()),
        }
    }

    // ── Trace management ──────────────────────────────────────────────

    /// Start a new trace; subsequent events land in it.
    pub fn start_trace(&self, label: impl Into<String>) -> String {
        self.close_turn(Utc::now());
        let trace = Trace::new(label);
        let id = trace.id.clone();

        let mut traces = write(&self.traces);
        const MAX_TRACES: usize = 1_000;
        if traces.len() >= MAX_TRACES {
            let drain_count = MAX_TRACES / 10;
            traces.drain(..drain_count);
        }
        traces.push(trace);
        write(&self.totals).trace_count = traces.len() as u64;
        id
    }

    /// End the current trace, closing its turn span.
    pub fn end_trace(&self, trace_id: &str) -> Result<(), TelemetryError> {
        self.close_turn(Utc::now());
        let mut traces = write(&self.traces);
        let trace = traces
            .iter_mut()
            .find(|t| t.id == trace_id)
            .ok_or_else(|| TelemetryError::UnknownTrace(trace_id.to_string()))?;
        trace.end();
        Ok(())
    }

    fn add_span(&self, span: Span) {
        let mut traces = write(&self.traces);
        if traces.is_empty() {
            traces.push(Trace::new("run"));
            write(&self.totals).trace_count = 1;
        }
        if let Some(trace) = traces.last_mut() {
            trace.add_span(span);
        }
    }

    fn close_turn(&self, at: DateTime<Utc>) {
        let turn = write(&self.open).turn.take();
        if let Some(mut turn) = turn {
            turn.end_at(at);
            self.add_span(turn);
        }
    }

    // ── Event handling ────────────────────────────────────────────────

    fn on_turn_started(&self, agent: &str, turn: u32, timestamp: DateTime<Utc>) {
        self.close_turn(timestamp);
        let mut span = Span::new(SpanKind::Turn, agent).with_metadata("turn", turn);
        span.started_at = timestamp;
        write(&self.open).turn = Some(span);
        write(&self.totals).turns += 1;
    }

    fn on_tool_started(&self, tool_name: &str, call_id: &str, timestamp: DateTime<Utc>) {
        let mut open = write(&self.open);
        let parent = open.turn.as_ref().map(|t| t.id.clone());
        let mut span = Span::new(SpanKind::ToolExecution, tool_name)
            .with_parent(parent)
            .with_metadata("call_id", call_id);
        span.started_at = timestamp;
        if open.tools.insert(call_id.to_string(), span).is_some() {
            tracing::warn!(call_id, tool = tool_name, "Tool started twice without ending");
        }
    }

    fn on_tool_finished(
        &self,
        tool_name: &str,
        call_id: &str,
        outcome: ToolEventOutcome,
        timestamp: DateTime<Utc>,
    ) {
        let span = write(&self.open).tools.remove(call_id);
        let Some(mut span) = span else {
            tracing::warn!(call_id, tool = tool_name, "Tool end without a matching start");
            write(&self.totals).unpaired_ends += 1;
            return;
        };

        span.end_at(timestamp);
        span.outcome = Some(outcome);
        {
            let mut totals = write(&self.totals);
            totals.tool_executions += 1;
            if outcome != ToolEventOutcome::Completed {
                totals.tool_failures += 1;
            }
        }
        self.add_span(span);
    }

    fn on_handoff(&self, from: &str, to: &str, timestamp: DateTime<Utc>) {
        let parent = read(&self.open).turn.as_ref().map(|t| t.id.clone());
        let mut span = Span::new(SpanKind::Handoff, format!("{from} -> {to}")).with_parent(parent);
        span.started_at = timestamp;
        span.end_at(timestamp);
        write(&self.totals).handoffs += 1;
        self.add_span(span);
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Get a specific trace by ID.
    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        read(&self.traces).iter().find(|t| t.id == trace_id).cloned()
    }

    /// The trace events currently land in.
    pub fn current_trace(&self) -> Option<Trace> {
        read(&self.traces).last().cloned()
    }

    /// List recent traces (most recent first).
    pub fn recent_traces(&self, limit: usize) -> Vec<Trace> {
        read(&self.traces).iter().rev().take(limit).cloned().collect()
    }

    /// Total number of traces recorded.
    pub fn trace_count(&self) -> usize {
        read(&self.traces).len()
    }

    /// Get a real-time usage snapshot.
    pub fn usage_snapshot(&self) -> UsageSnapshot {
        let mut snapshot = read(&self.totals).clone();
        snapshot.open_spans = read(&self.open).tools.len() as u64;
        snapshot
    }

    /// Serialize a trace as pretty JSON.
    pub fn export_trace(&self, trace_id: &str) -> Result<String, TelemetryError> {
        let trace = self
            .get_trace(trace_id)
            .ok_or_else(|| TelemetryError::UnknownTrace(trace_id.to_string()))?;
        Ok(serde_json::to_string_pretty(&trace)?)
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InstrumentationSink for TelemetryEngine {
    fn record(&self, event: DomainEvent) {
        match event {
            DomainEvent::TurnStarted {
                agent,
                turn,
                timestamp,
            } => self.on_turn_started(&agent, turn, timestamp),
            DomainEvent::ToolStarted {
                tool_name,
                call_id,
                timestamp,
                ..
            } => self.on_tool_started(&tool_name, &call_id, timestamp),
            DomainEvent::ToolFinished {
                tool_name,
                call_id,
                outcome,
                timestamp,
                ..
            } => self.on_tool_finished(&tool_name, &call_id, outcome, timestamp),
            DomainEvent::AgentHandoff {
                from,
                to,
                timestamp,
            } => self.on_handoff(&from, &to, timestamp),
            DomainEvent::ItemGenerated { .. } => write(&self.totals).items += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runwright_core::item::ToolCategory;

    fn started(call_id: &str) -> DomainEvent {
        DomainEvent::ToolStarted {
            agent: "triage".into(),
            tool_name: "lookup".into(),
            call_id: call_id.into(),
            category: ToolCategory::Function,
            timestamp: Utc::now(),
        }
    }

    fn finished(call_id: &str, outcome: ToolEventOutcome) -> DomainEvent {
        DomainEvent::ToolFinished {
            agent: "triage".into(),
            tool_name: "lookup".into(),
            call_id: call_id.into(),
            outcome,
            duration_ms: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn start_and_end_trace() {
        let engine = TelemetryEngine::new();
        let trace_id = engine.start_trace("triage");
        assert_eq!(engine.trace_count(), 1);

        engine.end_trace(&trace_id).unwrap();
        let trace = engine.get_trace(&trace_id).unwrap();
        assert!(trace.ended_at.is_some());
    }

    #[test]
    fn ending_an_unknown_trace_fails() {
        let engine = TelemetryEngine::new();
        assert!(matches!(
            engine.end_trace("nope"),
            Err(TelemetryError::UnknownTrace(_))
        ));
    }

    #[test]
    fn tool_events_pair_into_spans_under_the_turn() {
        let engine = TelemetryEngine::new();
        let trace_id = engine.start_trace("triage");
        engine.record(DomainEvent::TurnStarted {
            agent: "triage".into(),
            turn: 1,
            timestamp: Utc::now(),
        });
        engine.record(started("c1"));
        engine.record(started("c2"));
        assert_eq!(engine.usage_snapshot().open_spans, 2);

        engine.record(finished("c2", ToolEventOutcome::Rejected));
        engine.record(finished("c1", ToolEventOutcome::Completed));
        engine.end_trace(&trace_id).unwrap();

        let trace = engine.get_trace(&trace_id).unwrap();
        assert_eq!(trace.tool_execution_count(), 2);
        let turn = trace.spans_of(SpanKind::Turn).next().unwrap();
        assert!(
            trace
                .spans_of(SpanKind::ToolExecution)
                .all(|s| s.parent_id.as_deref() == Some(turn.id.as_str()))
        );

        let snapshot = engine.usage_snapshot();
        assert_eq!(snapshot.tool_executions, 2);
        assert_eq!(snapshot.tool_failures, 1);
        assert_eq!(snapshot.open_spans, 0);
        assert_eq!(snapshot.turns, 1);
    }

    #[test]
    fn unpaired_end_is_counted_not_recorded() {
        let engine = TelemetryEngine::new();
        engine.record(finished("ghost", ToolEventOutcome::Completed));
        let snapshot = engine.usage_snapshot();
        assert_eq!(snapshot.unpaired_ends, 1);
        assert_eq!(snapshot.tool_executions, 0);
    }

    #[test]
    fn events_without_a_trace_start_one() {
        let engine = TelemetryEngine::new();
        engine.record(DomainEvent::AgentHandoff {
            from: "triage".into(),
            to: "billing".into(),
            timestamp: Utc::now(),
        });
        let trace = engine.current_trace().unwrap();
        assert_eq!(trace.spans[0].label, "triage -> billing");
        assert_eq!(engine.usage_snapshot().handoffs, 1);
    }

    #[test]
    fn export_trace_is_json() {
        let engine = TelemetryEngine::new();
        let trace_id = engine.start_trace("triage");
        engine.record(started("c1"));
        engine.record(finished("c1", ToolEventOutcome::Completed));
        let json = engine.export_trace(&trace_id).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["spans"][0]["outcome"], "completed");
    }
}
