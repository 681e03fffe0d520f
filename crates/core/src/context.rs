//! Run-scoped context shared by every tool call of a run.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalLedger, ApprovalStatus};
use crate::error::ApprovalError;

/// Caller-supplied data plus the run's approval ledger.
///
/// The host mutates the ledger between engine invocations; during a turn
/// the engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    /// Arbitrary caller data, visible to tools and guardrails.
    #[serde(default)]
    pub data: serde_json::Value,

    #[serde(default)]
    approvals: ApprovalLedger,

    #[serde(skip, default = "CancellationToken::new")]
    cancellation: CancellationToken,
}

impl RunContext {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            approvals: ApprovalLedger::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn approvals(&self) -> &ApprovalLedger {
        &self.approvals
    }

    pub fn approvals_mut(&mut self) -> &mut ApprovalLedger {
        &mut self.approvals
    }

    pub fn approval_status(&self, tool_name: &str, call_id: &str) -> ApprovalStatus {
        self.approvals.status(tool_name, call_id)
    }

    /// Approve a call, or with `always` every call of the tool.
    pub fn approve_tool(
        &mut self,
        tool_name: &str,
        call_id: &str,
        always: bool,
    ) -> Result<(), ApprovalError> {
        if always {
            self.approvals.approve_always(tool_name)?;
        }
        self.approvals.approve(tool_name, call_id)
    }

    /// Reject a call, or with `always` every call of the tool.
    pub fn reject_tool(
        &mut self,
        tool_name: &str,
        call_id: &str,
        always: bool,
    ) -> Result<(), ApprovalError> {
        if always {
            self.approvals.reject_always(tool_name)?;
        }
        self.approvals.reject(tool_name, call_id)
    }

    /// The token in-flight tool executions watch for cancellation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Replace the cancellation token, e.g. with a child of the host's token.
    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(serde_json::Value::Null)
    }
}
