//! `runwright decide` — record approval decisions into a snapshot.

use std::path::Path;

use anyhow::{Context, bail};
use runwright_agent::RunState;
use runwright_core::error::ApprovalError;
use tracing::info;

use super::inspect::read_snapshot;

/// Decisions given on the command line.
#[derive(Debug, Default)]
pub struct Decisions {
    pub approve: Vec<String>,
    pub reject: Vec<String>,
    pub always: bool,
}

pub fn run(path: &Path, decisions: &Decisions, out: Option<&Path>) -> anyhow::Result<()> {
    if decisions.approve.is_empty() && decisions.reject.is_empty() {
        bail!("Nothing to decide: pass --approve and/or --reject");
    }
    let mut state = read_snapshot(path)?;
    if !state.is_interrupted() {
        bail!("Run {} is not waiting on any approval", state.id());
    }

    let applied = apply(&mut state, decisions)?;
    let target = out.unwrap_or(path);
    std::fs::write(target, state.to_json()?)
        .with_context(|| format!("Failed to write snapshot {}", target.display()))?;

    info!(run_id = state.id(), applied, "Recorded decisions");
    println!("✅ Recorded {applied} decision(s) in {}", target.display());
    let remaining = state
        .pending_approvals()
        .iter()
        .filter(|r| !state.context().approval_status(r.tool_name(), r.call_id()).is_resolved())
        .count();
    if remaining > 0 {
        println!("   {remaining} call(s) still undecided");
    }
    Ok(())
}

/// Record every decision; the first unknown call id aborts.
pub fn apply(state: &mut RunState, decisions: &Decisions) -> Result<usize, ApprovalError> {
    for call_id in &decisions.approve {
        state.approve(call_id, decisions.always)?;
    }
    for call_id in &decisions.reject {
        state.reject(call_id, decisions.always)?;
    }
    Ok(decisions.approve.len() + decisions.reject.len())
}
