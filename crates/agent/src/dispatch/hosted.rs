//! Hosted tool approval requests.
//!
//! The server runs the tool; the engine only answers whether it may. A
//! registered callback answers immediately, otherwise the ledger does.

use tracing::debug;

use runwright_core::approval::ApprovalStatus;
use runwright_core::context::RunContext;
use runwright_core::item::{ApprovalRecord, CallPayload, HostedApprovalResponse, ToolCallRequest};

use crate::agent::Agent;

/// The answer to a hosted approval request.
#[derive(Debug, Clone, PartialEq)]
pub enum HostedResolution {
    Responded(HostedApprovalResponse),
    Pending(ApprovalRecord),
}

pub(super) async fn resolve(
    agent: &Agent,
    ctx: &RunContext,
    call: &ToolCallRequest,
) -> HostedResolution {
    let server = match &call.payload {
        CallPayload::Hosted { server_label, .. } => server_label.as_str(),
        _ => "",
    };

    if let Some(callback) = agent.hosted_tool(server).and_then(|h| h.on_approval.as_ref()) {
        let decision = callback.decide(ctx, call).await;
        debug!(server, request_id = %call.call_id, approve = decision.approve, "Hosted approval decided by callback");
        return HostedResolution::Responded(HostedApprovalResponse {
            request_id: call.call_id.clone(),
            approve: decision.approve,
            reason: decision.reason,
        });
    }

    let approve = match ctx.approval_status(&call.tool_name, &call.call_id) {
        ApprovalStatus::Pending => return HostedResolution::Pending(ApprovalRecord::pending(call.clone())),
        ApprovalStatus::Approved => true,
        ApprovalStatus::Rejected => false,
    };
    HostedResolution::Responded(HostedApprovalResponse {
        request_id: call.call_id.clone(),
        approve,
        reason: None,
    })
}
