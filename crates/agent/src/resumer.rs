//! Interruption resumer — continues a paused turn once decisions are in.
//!
//! Resuming is idempotent: a call whose result is already in the history
//! is never dispatched again, and each decision is recorded once. Calling
//! resume twice with the same ledger yields the same history and step.

use tracing::{debug, info};

use runwright_core::approval::ApprovalStatus;
use runwright_core::error::EngineError;
use runwright_core::item::{ApprovalRecord, RunItem, ToolCallRequest, ToolCategory};

use crate::agent::{Agent, FunctionToolResult};
use crate::dispatch::{DispatchSettings, HostedResolution, ToolDispatcher};
use crate::resolver::{
    TurnOutcome, decide_next_step, execute_handoffs, push_decision, push_placeholders,
    record_hosted_response, record_outcome,
};
use crate::state::{NextStep, RunState};

/// Records of one paused agent-as-tool call.
struct NestedGroup {
    owner: ToolCallRequest,
    state: serde_json::Value,
    records: Vec<ApprovalRecord>,
}

pub struct InterruptionResumer<'a> {
    agent: &'a Agent,
    settings: &'a DispatchSettings,
}

impl<'a> InterruptionResumer<'a> {
    pub fn new(agent: &'a Agent, settings: &'a DispatchSettings) -> Self {
        Self { agent, settings }
    }

    pub async fn resume(&self, state: &mut RunState) -> Result<NextStep, EngineError> {
        let agent = self.agent;
        let approvals = state.pending_approvals().to_vec();
        let removed = state.rewind();
        debug!(agent = %agent.name, removed, records = approvals.len(), "Resuming interrupted turn");

        let mut still_pending = Vec::new();
        let mut to_dispatch: Vec<(ToolCallRequest, Option<serde_json::Value>)> = Vec::new();
        let mut nested: Vec<NestedGroup> = Vec::new();

        for record in approvals {
            if let Some(owner) = &record.owner {
                match nested
                    .iter_mut()
                    .find(|g| same_call(&g.owner, &owner.call))
                {
                    Some(group) => group.records.push(record),
                    None => nested.push(NestedGroup {
                        owner: owner.call.clone(),
                        state: owner.state.clone(),
                        records: vec![record],
                    }),
                }
                continue;
            }

            if record.call.category() == ToolCategory::Hosted {
                let resolution = ToolDispatcher::new(agent, &state.context, self.settings)
                    .resolve_hosted(&record.call)
                    .await;
                match resolution {
                    HostedResolution::Responded(response) => {
                        record_hosted_response(state, &agent.name, &record.call, response);
                    }
                    HostedResolution::Pending(record) => still_pending.push(record),
                }
                continue;
            }

            match state
                .context
                .approval_status(record.tool_name(), record.call_id())
            {
                ApprovalStatus::Pending => still_pending.push(record),
                decided => {
                    push_decision(state, &agent.name, &record.call, decided);
                    if !state.has_result_for(&record.call)
                        && !to_dispatch.iter().any(|(c, _)| same_call(c, &record.call))
                    {
                        to_dispatch.push((record.call, None));
                    }
                }
            }
        }

        for group in nested {
            let any_resolved = group.records.iter().any(|r| {
                state
                    .context
                    .approval_status(r.tool_name(), r.call_id())
                    .is_resolved()
            });
            if !any_resolved {
                still_pending.extend(group.records);
            } else if !state.has_result_for(&group.owner) {
                to_dispatch.push((group.owner, Some(group.state)));
            }
        }

        if !to_dispatch.is_empty() {
            info!(agent = %agent.name, calls = to_dispatch.len(), "Dispatching approved calls");
        }
        let outcomes = ToolDispatcher::new(agent, &state.context, self.settings)
            .dispatch_batch(
                to_dispatch
                    .iter()
                    .map(|(call, nested_state)| (call, nested_state.as_ref()))
                    .collect(),
            )
            .await?;
        let mut scratch = Vec::new();
        for outcome in outcomes {
            record_outcome(state, &agent.name, outcome, &mut scratch, &mut still_pending);
        }

        let function_results = turn_function_results(state);
        let handoffs = state.deferred_handoffs.clone();
        let step = decide_next_step(
            agent,
            &state.context,
            TurnOutcome {
                function_results: &function_results,
                pending: &still_pending,
                handoffs: &handoffs,
                final_text: None,
                had_tool_work: true,
            },
        )
        .await?;

        match &step {
            NextStep::Interruption { approvals } => {
                push_placeholders(state, &agent.name, approvals);
            }
            NextStep::Handoff { .. } => {
                execute_handoffs(agent, state, &handoffs, self.settings);
                state.deferred_handoffs.clear();
            }
            NextStep::FinalOutput { .. } | NextStep::RunAgain => {
                state.deferred_handoffs.clear();
            }
        }

        debug!(agent = %agent.name, step = step.label(), "Resumed turn resolved");
        state.current_step = Some(step.clone());
        state.settle();
        Ok(step)
    }
}

/// Call ids are unique per category within a turn.
fn same_call(a: &ToolCallRequest, b: &ToolCallRequest) -> bool {
    a.category() == b.category() && a.call_id == b.call_id
}

/// Every function result of the current turn, in history order.
fn turn_function_results(state: &RunState) -> Vec<FunctionToolResult> {
    state
        .generated_items
        .iter()
        .skip(state.current_turn_start)
        .filter_map(|item| match item {
            RunItem::ToolResult { result, .. } if result.category == ToolCategory::Function => {
                Some(FunctionToolResult::from(result))
            }
            _ => None,
        })
        .collect()
}
