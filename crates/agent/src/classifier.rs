//! Model-output classifier — sorts a model response into items and work.
//!
//! Every output block becomes zero or one generated item. Calls the agent
//! can serve are grouped for dispatch; calls it cannot serve are dropped
//! with a warning rather than failing the turn.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use runwright_core::capability::{APPLY_PATCH_TOOL_NAME, COMPUTER_TOOL_NAME, SHELL_TOOL_NAME};
use runwright_core::item::{
    CallPayload, HandoffRecord, HandoffStage, RunItem, ToolCallRequest, ToolCategory,
};
use runwright_core::message::Message;
use runwright_core::provider::{ModelResponse, OutputBlock};

use crate::agent::Agent;

/// A model request to transfer control to another agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub call_id: String,
    pub tool_name: String,
    pub target: String,
}

/// A classified model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedResponse {
    /// Items to append, in output order.
    pub new_items: Vec<RunItem>,
    /// Locally executed calls (function, computer, shell, patch), in output order.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Hosted tool calls awaiting an approval decision.
    pub hosted_approvals: Vec<ToolCallRequest>,
    pub handoffs: Vec<HandoffRequest>,
    /// Names of every tool the model invoked, handoffs included.
    pub tools_used: Vec<String>,
}

impl ProcessedResponse {
    fn of(&self, category: ToolCategory) -> impl Iterator<Item = &ToolCallRequest> {
        self.tool_calls
            .iter()
            .filter(move |c| c.category() == category)
    }

    pub fn functions(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.of(ToolCategory::Function)
    }

    pub fn computer_actions(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.of(ToolCategory::Computer)
    }

    pub fn shell_actions(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.of(ToolCategory::Shell)
    }

    pub fn patch_operations(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.of(ToolCategory::ApplyPatch)
    }

    pub fn has_tools_or_approvals_to_run(&self) -> bool {
        !self.tool_calls.is_empty() || !self.hosted_approvals.is_empty() || !self.handoffs.is_empty()
    }
}

/// Classify `response` for `agent`.
pub fn classify(agent: &Agent, response: &ModelResponse) -> ProcessedResponse {
    let mut processed = ProcessedResponse::default();
    let mut seen: HashSet<(ToolCategory, String)> = HashSet::new();
    let agent_name = agent.name.as_str();

    for block in &response.output {
        match block {
            OutputBlock::Message { .. } => {
                let text = block.message_text().unwrap_or_default();
                processed.new_items.push(RunItem::Message {
                    agent: agent_name.to_string(),
                    message: Message::assistant(text),
                });
            }
            OutputBlock::Reasoning { text } => {
                processed.new_items.push(RunItem::Reasoning {
                    agent: agent_name.to_string(),
                    text: text.clone(),
                });
            }
            OutputBlock::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                if name.is_empty() {
                    warn!(agent = agent_name, call_id = %call_id, "Dropping function call without a name");
                    continue;
                }
                if !seen.insert((ToolCategory::Function, call_id.clone())) {
                    warn!(agent = agent_name, call_id = %call_id, "Dropping duplicate call id");
                    continue;
                }
                if let Some(handoff) = agent.find_handoff(name) {
                    processed.tools_used.push(name.clone());
                    processed.handoffs.push(HandoffRequest {
                        call_id: call_id.clone(),
                        tool_name: name.clone(),
                        target: handoff.agent.name.clone(),
                    });
                    processed.new_items.push(RunItem::Handoff {
                        agent: agent_name.to_string(),
                        record: HandoffRecord {
                            call_id: call_id.clone(),
                            from_agent: agent_name.to_string(),
                            to_agent: handoff.agent.name.clone(),
                            stage: HandoffStage::Requested,
                        },
                    });
                    continue;
                }
                if !agent.tools.contains(name) {
                    warn!(agent = agent_name, tool = %name, call_id = %call_id, "Dropping call to unknown tool");
                    continue;
                }
                let call = ToolCallRequest::function(call_id.clone(), name.clone(), arguments.clone());
                processed.push_local(agent_name, call);
            }
            OutputBlock::ComputerCall { call_id, action } => {
                if agent.computer.is_none() {
                    warn!(agent = agent_name, call_id = %call_id, "Dropping computer call: agent has no computer");
                    continue;
                }
                if !seen.insert((ToolCategory::Computer, call_id.clone())) {
                    warn!(agent = agent_name, call_id = %call_id, "Dropping duplicate call id");
                    continue;
                }
                let call = ToolCallRequest {
                    call_id: call_id.clone(),
                    tool_name: COMPUTER_TOOL_NAME.to_string(),
                    payload: CallPayload::Computer {
                        action: action.clone(),
                    },
                };
                processed.push_local(agent_name, call);
            }
            OutputBlock::ShellCall { call_id, action } => {
                if agent.shell.is_none() {
                    warn!(agent = agent_name, call_id = %call_id, "Dropping shell call: agent has no shell");
                    continue;
                }
                if !seen.insert((ToolCategory::Shell, call_id.clone())) {
                    warn!(agent = agent_name, call_id = %call_id, "Dropping duplicate call id");
                    continue;
                }
                let call = ToolCallRequest {
                    call_id: call_id.clone(),
                    tool_name: SHELL_TOOL_NAME.to_string(),
                    payload: CallPayload::Shell {
                        action: action.clone(),
                    },
                };
                processed.push_local(agent_name, call);
            }
            OutputBlock::ApplyPatchCall { call_id, operation } => {
                if agent.apply_patch.is_none() {
                    warn!(agent = agent_name, call_id = %call_id, "Dropping patch call: agent has no editor");
                    continue;
                }
                if !seen.insert((ToolCategory::ApplyPatch, call_id.clone())) {
                    warn!(agent = agent_name, call_id = %call_id, "Dropping duplicate call id");
                    continue;
                }
                let call = ToolCallRequest {
                    call_id: call_id.clone(),
                    tool_name: APPLY_PATCH_TOOL_NAME.to_string(),
                    payload: CallPayload::ApplyPatch {
                        operation: operation.clone(),
                    },
                };
                processed.push_local(agent_name, call);
            }
            OutputBlock::HostedApprovalRequest {
                id,
                server_label,
                name,
                arguments,
            } => {
                if agent.hosted_tool(server_label).is_none() {
                    warn!(agent = agent_name, server = %server_label, request_id = %id, "Dropping approval request for unknown server");
                    continue;
                }
                if !seen.insert((ToolCategory::Hosted, id.clone())) {
                    warn!(agent = agent_name, request_id = %id, "Dropping duplicate request id");
                    continue;
                }
                let call = ToolCallRequest {
                    call_id: id.clone(),
                    tool_name: name.clone(),
                    payload: CallPayload::Hosted {
                        server_label: server_label.clone(),
                        arguments: arguments.clone(),
                    },
                };
                processed.tools_used.push(name.clone());
                processed.new_items.push(RunItem::ToolCall {
                    agent: agent_name.to_string(),
                    call: call.clone(),
                });
                processed.hosted_approvals.push(call);
            }
        }
    }

    debug!(
        agent = agent_name,
        items = processed.new_items.len(),
        calls = processed.tool_calls.len(),
        hosted = processed.hosted_approvals.len(),
        handoffs = processed.handoffs.len(),
        "Classified model response"
    );
    processed
}

impl ProcessedResponse {
    fn push_local(&mut self, agent: &str, call: ToolCallRequest) {
        self.tools_used.push(call.tool_name.clone());
        self.new_items.push(RunItem::ToolCall {
            agent: agent.to_string(),
            call: call.clone(),
        });
        self.tool_calls.push(call);
    }
}
