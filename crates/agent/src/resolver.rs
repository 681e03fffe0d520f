//! Turn resolver — turns a classified response into history and a next step.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use runwright_core::approval::ApprovalStatus;
use runwright_core::context::RunContext;
use runwright_core::error::EngineError;
use runwright_core::event::DomainEvent;
use runwright_core::item::{
    ApprovalRecord, HandoffRecord, HandoffStage, HostedApprovalResponse, OutputValue, RunItem,
    ToolCallRequest, ToolCallResult, ToolCategory,
};

use crate::agent::{
    Agent, FunctionToolResult, HandoffInputData, ToolUseBehavior, ToolsToFinalOutput,
};
use crate::classifier::{HandoffRequest, ProcessedResponse};
use crate::dispatch::{DispatchOutcome, DispatchSettings, HostedResolution, ToolDispatcher};
use crate::state::{NextStep, RunState};

/// Synthetic output given to every handoff after the first in one turn.
pub const MULTIPLE_HANDOFFS_MESSAGE: &str = "Multiple handoffs detected, ignoring this one.";

impl From<&ToolCallResult> for FunctionToolResult {
    fn from(result: &ToolCallResult) -> Self {
        Self {
            call_id: result.call_id.clone(),
            tool_name: result.tool_name.clone(),
            output: result.output.clone(),
            status: result.status,
        }
    }
}

/// What a turn produced, as far as the next-step decision cares.
#[derive(Debug, Clone, Copy)]
pub struct TurnOutcome<'a> {
    /// Function tool results of the turn, in order.
    pub function_results: &'a [FunctionToolResult],
    /// Approval records still waiting for a decision.
    pub pending: &'a [ApprovalRecord],
    pub handoffs: &'a [HandoffRequest],
    /// Text of the turn's last assistant message.
    pub final_text: Option<&'a str>,
    /// Whether the model asked for any tool, approval or handoff.
    pub had_tool_work: bool,
}

/// Decide what follows a turn. Depends only on its arguments.
pub async fn decide_next_step(
    agent: &Agent,
    ctx: &RunContext,
    turn: TurnOutcome<'_>,
) -> Result<NextStep, EngineError> {
    if let ToolUseBehavior::StopAtToolNames(names) = &agent.tool_use_behavior
        && names.is_empty()
    {
        return Err(EngineError::InvalidToolUseBehavior {
            agent: agent.name.clone(),
            reason: "stop_at_tool_names must name at least one tool".into(),
        });
    }

    if !turn.pending.is_empty() {
        return Ok(NextStep::Interruption {
            approvals: turn.pending.to_vec(),
        });
    }

    if !turn.function_results.is_empty() {
        match &agent.tool_use_behavior {
            ToolUseBehavior::RunLlmAgain => {}
            ToolUseBehavior::StopOnFirstTool => {
                return Ok(NextStep::FinalOutput {
                    output: turn.function_results[0].output.as_text(),
                });
            }
            ToolUseBehavior::StopAtToolNames(names) => {
                if let Some(hit) = turn
                    .function_results
                    .iter()
                    .find(|r| names.contains(&r.tool_name))
                {
                    return Ok(NextStep::FinalOutput {
                        output: hit.output.as_text(),
                    });
                }
            }
            ToolUseBehavior::Custom(policy) => {
                match policy.decide(ctx, turn.function_results).await? {
                    ToolsToFinalOutput::Continue => {}
                    ToolsToFinalOutput::Final(output) => {
                        return Ok(NextStep::FinalOutput { output });
                    }
                    ToolsToFinalOutput::Interrupted(approvals) => {
                        return Ok(NextStep::Interruption { approvals });
                    }
                }
            }
        }
    }

    if let Some(first) = turn.handoffs.first() {
        return Ok(NextStep::Handoff {
            new_agent: first.target.clone(),
        });
    }

    if !turn.had_tool_work
        && let Some(text) = turn.final_text
    {
        return match agent.output_schema() {
            None => Ok(NextStep::FinalOutput {
                output: text.to_string(),
            }),
            Some(_) if text.trim().is_empty() => Ok(NextStep::RunAgain),
            Some(schema) => {
                validate_structured(agent, schema, text)?;
                Ok(NextStep::FinalOutput {
                    output: text.to_string(),
                })
            }
        };
    }

    Ok(NextStep::RunAgain)
}

/// Check `text` against the agent's output schema.
pub(crate) fn validate_structured(
    agent: &Agent,
    schema: &serde_json::Value,
    text: &str,
) -> Result<(), EngineError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| EngineError::ModelBehavior {
            message: format!("Final output of agent '{}' is not valid JSON: {e}", agent.name),
        })?;
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        EngineError::UserError(format!("Invalid output schema for agent '{}': {e}", agent.name))
    })?;
    if let Err(error) = validator.validate(&value) {
        return Err(EngineError::ModelBehavior {
            message: format!(
                "Final output of agent '{}' does not match its schema: {error}",
                agent.name
            ),
        });
    }
    Ok(())
}

/// Resolves one model turn for one agent.
pub struct TurnResolver<'a> {
    agent: &'a Agent,
    settings: &'a DispatchSettings,
}

impl<'a> TurnResolver<'a> {
    pub fn new(agent: &'a Agent, settings: &'a DispatchSettings) -> Self {
        Self { agent, settings }
    }

    /// Append the turn's items, run its tools and record the next step.
    pub async fn resolve_turn(
        &self,
        state: &mut RunState,
        processed: &ProcessedResponse,
    ) -> Result<NextStep, EngineError> {
        let agent = self.agent;
        state.begin_turn();
        for item in &processed.new_items {
            state.push(item.clone());
        }
        state
            .tool_use
            .record(&agent.name, &processed.tools_used, false);

        let (outcomes, hosted) = {
            let dispatcher = ToolDispatcher::new(agent, &state.context, self.settings);
            let outcomes = dispatcher.dispatch_all(&processed.tool_calls).await?;
            let mut hosted = Vec::with_capacity(processed.hosted_approvals.len());
            for call in &processed.hosted_approvals {
                hosted.push(dispatcher.resolve_hosted(call).await);
            }
            (outcomes, hosted)
        };

        let mut function_results = Vec::new();
        let mut pending = Vec::new();
        for outcome in outcomes {
            record_outcome(state, &agent.name, outcome, &mut function_results, &mut pending);
        }
        for (call, resolution) in processed.hosted_approvals.iter().zip(hosted) {
            match resolution {
                HostedResolution::Responded(response) => {
                    record_hosted_response(state, &agent.name, call, response);
                }
                HostedResolution::Pending(record) => pending.push(record),
            }
        }

        let final_text = processed
            .new_items
            .iter()
            .rev()
            .find_map(RunItem::assistant_text);
        let step = decide_next_step(
            agent,
            &state.context,
            TurnOutcome {
                function_results: &function_results,
                pending: &pending,
                handoffs: &processed.handoffs,
                final_text,
                had_tool_work: processed.has_tools_or_approvals_to_run(),
            },
        )
        .await?;

        match &step {
            NextStep::Interruption { approvals } => {
                info!(agent = %agent.name, pending = approvals.len(), "Turn paused for approvals");
                push_placeholders(state, &agent.name, approvals);
                state.deferred_handoffs = processed.handoffs.clone();
            }
            NextStep::Handoff { .. } => {
                execute_handoffs(agent, state, &processed.handoffs, self.settings);
            }
            NextStep::FinalOutput { .. } | NextStep::RunAgain => {}
        }

        debug!(agent = %agent.name, step = step.label(), "Turn resolved");
        state.current_step = Some(step.clone());
        state.settle();
        Ok(step)
    }
}

/// Append an outcome's items and collect what the decision needs.
pub(crate) fn record_outcome(
    state: &mut RunState,
    agent: &str,
    outcome: DispatchOutcome,
    function_results: &mut Vec<FunctionToolResult>,
    pending: &mut Vec<ApprovalRecord>,
) {
    match outcome {
        DispatchOutcome::Completed { result, .. } => {
            if result.category == ToolCategory::Function {
                function_results.push(FunctionToolResult::from(&result));
            }
            state.push(RunItem::ToolResult {
                agent: agent.to_string(),
                result,
            });
        }
        DispatchOutcome::Rejected { call, result } => {
            push_decision(state, agent, &call, ApprovalStatus::Rejected);
            if result.category == ToolCategory::Function {
                function_results.push(FunctionToolResult::from(&result));
            }
            state.push(RunItem::ToolResult {
                agent: agent.to_string(),
                result,
            });
        }
        DispatchOutcome::PendingApproval { approvals, .. } => pending.extend(approvals),
    }
}

/// Append the decision for a hosted approval request and the response sent
/// back to its server, each at most once per turn.
pub(crate) fn record_hosted_response(
    state: &mut RunState,
    agent: &str,
    call: &ToolCallRequest,
    response: HostedApprovalResponse,
) {
    let status = if response.approve {
        ApprovalStatus::Approved
    } else {
        ApprovalStatus::Rejected
    };
    push_decision(state, agent, call, status);
    if !state.has_result_for(call) {
        state.push(RunItem::HostedApprovalResponse {
            agent: agent.to_string(),
            response,
        });
    }
}

/// Append pending placeholders at the tail of the history.
pub(crate) fn push_placeholders(state: &mut RunState, agent: &str, approvals: &[ApprovalRecord]) {
    for record in approvals {
        state.push(RunItem::Approval {
            agent: agent.to_string(),
            record: record.clone(),
        });
    }
}

/// Append a resolved approval record unless the current turn already has
/// one for `call`.
pub(crate) fn push_decision(
    state: &mut RunState,
    agent: &str,
    call: &ToolCallRequest,
    status: ApprovalStatus,
) {
    if !state.has_decision_for(call) {
        state.push(RunItem::Approval {
            agent: agent.to_string(),
            record: ApprovalRecord {
                call: call.clone(),
                status,
                owner: None,
            },
        });
    }
}

/// Run the first requested handoff and turn away the rest. Returns the
/// agent control moves to.
pub(crate) fn execute_handoffs(
    agent: &Agent,
    state: &mut RunState,
    handoffs: &[HandoffRequest],
    settings: &DispatchSettings,
) -> Option<Arc<Agent>> {
    let (first, extras) = handoffs.split_first()?;
    let Some(handoff) = agent.find_handoff(&first.tool_name) else {
        warn!(agent = %agent.name, tool = %first.tool_name, "Handoff target vanished");
        return None;
    };

    state.push(RunItem::Handoff {
        agent: agent.name.clone(),
        record: HandoffRecord {
            call_id: first.call_id.clone(),
            from_agent: agent.name.clone(),
            to_agent: handoff.agent.name.clone(),
            stage: HandoffStage::Completed,
        },
    });
    for extra in extras {
        warn!(agent = %agent.name, call_id = %extra.call_id, "Ignoring extra handoff");
        let call = ToolCallRequest::function(extra.call_id.clone(), extra.tool_name.clone(), "{}");
        state.push(RunItem::ToolResult {
            agent: agent.name.clone(),
            result: ToolCallResult::failed(&call, OutputValue::text(MULTIPLE_HANDOFFS_MESSAGE)),
        });
    }

    if let Some(sink) = &settings.sink {
        sink.record(DomainEvent::AgentHandoff {
            from: agent.name.clone(),
            to: handoff.agent.name.clone(),
            timestamp: Utc::now(),
        });
    }
    info!(from = %agent.name, to = %handoff.agent.name, "Handing off");

    if let Some(filter) = &handoff.input_filter {
        let streamed = state.emitted_item_count.min(state.generated_items.len());
        let streamed: Vec<RunItem> = state.generated_items[..streamed].to_vec();
        let split = state.current_turn_start.min(state.generated_items.len());
        let new_items = state.generated_items.split_off(split);
        let data = HandoffInputData {
            input_history: std::mem::take(&mut state.original_input),
            pre_handoff_items: std::mem::take(&mut state.generated_items),
            new_items,
        };
        let filtered = filter.filter(data);
        state.original_input = filtered.input_history;
        state.current_turn_start = filtered.pre_handoff_items.len();
        state.generated_items = filtered.pre_handoff_items;
        state.generated_items.extend(filtered.new_items);
        // Streamed items that survived the filter keep their place at the front.
        let mut seen = streamed.iter();
        state.emitted_item_count = state
            .generated_items
            .iter()
            .take_while(|item| seen.any(|old| old == *item))
            .count();
        state.persisted_item_count = state.persisted_item_count.min(state.current_turn_start);
    }

    Some(Arc::clone(&handoff.agent))
}
