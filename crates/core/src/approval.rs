//! Approval ledger — the per-run record of decisions on gated tool calls.
//!
//! Decisions are keyed by (tool name, call id), or by tool name alone for
//! permanent ("always") decisions. The ledger is the single source of truth
//! the dispatcher consults before running a gated tool.
//!
//! Resolved per-call decisions are immutable: repeating the same decision is
//! a no-op, a conflicting one is refused.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ApprovalError;

/// The state of an approval decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ToolDecisions {
    /// Blanket decision for every call of the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    always: Option<ApprovalStatus>,

    /// Per-call decisions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    calls: BTreeMap<String, ApprovalStatus>,
}

/// Per-run record of human or policy decisions on pending tool calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLedger {
    #[serde(default)]
    tools: BTreeMap<String, ToolDecisions>,
}

impl ApprovalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approve a single call.
    pub fn approve(&mut self, tool_name: &str, call_id: &str) -> Result<(), ApprovalError> {
        self.decide(tool_name, call_id, ApprovalStatus::Approved)
    }

    /// Reject a single call.
    pub fn reject(&mut self, tool_name: &str, call_id: &str) -> Result<(), ApprovalError> {
        self.decide(tool_name, call_id, ApprovalStatus::Rejected)
    }

    /// Approve every call of `tool_name` for the rest of the run.
    pub fn approve_always(&mut self, tool_name: &str) -> Result<(), ApprovalError> {
        self.decide_always(tool_name, ApprovalStatus::Approved)
    }

    /// Reject every call of `tool_name` for the rest of the run.
    pub fn reject_always(&mut self, tool_name: &str) -> Result<(), ApprovalError> {
        self.decide_always(tool_name, ApprovalStatus::Rejected)
    }

    /// Look up the decision for a call. Per-call decisions win over blanket
    /// ones so that an already-resolved call never changes outcome.
    pub fn status(&self, tool_name: &str, call_id: &str) -> ApprovalStatus {
        let Some(entry) = self.tools.get(tool_name) else {
            return ApprovalStatus::Pending;
        };
        if let Some(status) = entry.calls.get(call_id) {
            return *status;
        }
        entry.always.unwrap_or(ApprovalStatus::Pending)
    }

    /// Copy decisions from `other` that this ledger doesn't have yet.
    ///
    /// Used to hand a parent run's decisions down to a nested run.
    pub fn absorb(&mut self, other: &ApprovalLedger) {
        for (tool, decisions) in &other.tools {
            let entry = self.tools.entry(tool.clone()).or_default();
            if entry.always.is_none() {
                entry.always = decisions.always;
            }
            for (call_id, status) in &decisions.calls {
                entry.calls.entry(call_id.clone()).or_insert(*status);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn decide(
        &mut self,
        tool_name: &str,
        call_id: &str,
        status: ApprovalStatus,
    ) -> Result<(), ApprovalError> {
        let entry = self.tools.entry(tool_name.to_string()).or_default();
        match entry.calls.get(call_id) {
            Some(existing) if *existing == status => Ok(()),
            Some(existing) => {
                warn!(
                    tool = %tool_name,
                    call_id = %call_id,
                    existing = existing.label(),
                    "Refusing to change a resolved approval"
                );
                Err(ApprovalError::Conflict {
                    tool_name: tool_name.to_string(),
                    call_id: call_id.to_string(),
                    existing: existing.label().to_string(),
                    requested: status.label().to_string(),
                })
            }
            None => {
                debug!(tool = %tool_name, call_id = %call_id, decision = status.label(), "Recorded approval decision");
                entry.calls.insert(call_id.to_string(), status);
                Ok(())
            }
        }
    }

    fn decide_always(&mut self, tool_name: &str, status: ApprovalStatus) -> Result<(), ApprovalError> {
        let entry = self.tools.entry(tool_name.to_string()).or_default();
        match entry.always {
            Some(existing) if existing == status => Ok(()),
            Some(existing) => Err(ApprovalError::BlanketConflict {
                tool_name: tool_name.to_string(),
                existing: existing.label().to_string(),
            }),
            None => {
                debug!(tool = %tool_name, decision = status.label(), "Recorded permanent approval decision");
                entry.always = Some(status);
                Ok(())
            }
        }
    }
}
