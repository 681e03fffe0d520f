//! `runwright inspect` — summarize a run state snapshot.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context;
use runwright_agent::{NextStep, RunState};
use runwright_core::item::RunItem;

pub fn read_snapshot(path: &Path) -> anyhow::Result<RunState> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    let state = RunState::from_json(&json)
        .with_context(|| format!("Invalid snapshot {}", path.display()))?;
    Ok(state)
}

pub fn run(path: &Path) -> anyhow::Result<()> {
    let state = read_snapshot(path)?;
    print!("{}", summarize(&state));
    Ok(())
}

pub fn summarize(state: &RunState) -> String {
    let mut out = String::new();
    let step = state.current_step().map(NextStep::label).unwrap_or("not started");
    let _ = writeln!(out, "📋 Run {}", state.id());
    let _ = writeln!(out, "─────────────────────────────────────");
    let _ = writeln!(out, "  Agent:     {}", state.current_agent());
    let _ = writeln!(out, "  Turn:      {} / {}", state.current_turn(), state.max_turns());
    let _ = writeln!(out, "  Step:      {step}");
    let _ = writeln!(
        out,
        "  Items:     {} ({} persisted)",
        state.generated_items().len(),
        state.persisted_item_count()
    );
    if let Some(output) = state.final_output() {
        let _ = writeln!(out, "  Output:    {output}");
    }

    let pending = state.pending_approvals();
    if !pending.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  Waiting on:");
        for record in pending {
            let detail = record.call.arguments_text();
            let nested = record
                .owner
                .as_ref()
                .map(|o| format!(" (inside {})", o.call.tool_name))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "    {} {}{} {}",
                record.call_id(),
                record.tool_name(),
                nested,
                detail
            );
        }
    }

    let results = state
        .generated_items()
        .iter()
        .filter(|i| matches!(i, RunItem::ToolResult { .. }))
        .count();
    let _ = writeln!(out);
    let _ = writeln!(out, "  Tool results: {results}");
    out
}
