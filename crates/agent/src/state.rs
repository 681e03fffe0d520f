//! Turn state — everything needed to continue a run after a pause.
//!
//! A [`RunState`] is plain data. It serializes losslessly to JSON so a host
//! can persist it while a human decides pending approvals, then hand it back
//! to [`crate::runner::Runner::resume`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use runwright_core::context::RunContext;
use runwright_core::error::ApprovalError;
use runwright_core::item::{ApprovalRecord, RunItem, ToolCallRequest};
use runwright_core::message::Message;
use runwright_core::provider::ModelResponse;
use runwright_core::tool_use::ToolUseTracker;

use crate::classifier::HandoffRequest;
use crate::error::StateError;

/// Snapshot format version written by [`RunState::to_json`].
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// What the engine does next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NextStep {
    RunAgain,
    FinalOutput { output: String },
    Handoff { new_agent: String },
    Interruption { approvals: Vec<ApprovalRecord> },
}

impl NextStep {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RunAgain => "run_again",
            Self::FinalOutput { .. } => "final_output",
            Self::Handoff { .. } => "handoff",
            Self::Interruption { .. } => "interruption",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub(crate) schema_version: u32,
    pub(crate) id: String,
    pub(crate) current_agent: String,
    pub(crate) original_input: Vec<RunItem>,
    pub(crate) generated_items: Vec<RunItem>,
    /// Items a host may treat as final; pending placeholders at the tail
    /// are never covered.
    pub(crate) persisted_item_count: usize,
    /// Items already streamed to the instrumentation sink.
    pub(crate) emitted_item_count: usize,
    /// Call ids of approval placeholders already streamed.
    #[serde(default)]
    pub(crate) emitted_placeholders: BTreeSet<String>,
    /// Index of the first item of the current turn.
    pub(crate) current_turn_start: usize,
    pub(crate) current_step: Option<NextStep>,
    pub(crate) current_turn: u32,
    pub(crate) max_turns: u32,
    pub(crate) context: RunContext,
    #[serde(default)]
    pub(crate) tool_use: ToolUseTracker,
    #[serde(default)]
    pub(crate) model_responses: Vec<ModelResponse>,
    /// Handoffs requested by a turn that paused for approvals.
    #[serde(default)]
    pub(crate) deferred_handoffs: Vec<HandoffRequest>,
    #[serde(default)]
    pub(crate) final_output: Option<String>,
}

impl RunState {
    pub fn new(agent: &str, input: Vec<RunItem>, context: RunContext, max_turns: u32) -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            id: Uuid::new_v4().to_string(),
            current_agent: agent.to_string(),
            original_input: input,
            generated_items: Vec::new(),
            persisted_item_count: 0,
            emitted_item_count: 0,
            emitted_placeholders: BTreeSet::new(),
            current_turn_start: 0,
            current_step: None,
            current_turn: 0,
            max_turns,
            context,
            tool_use: ToolUseTracker::new(),
            model_responses: Vec::new(),
            deferred_handoffs: Vec::new(),
            final_output: None,
        }
    }

    /// Wrap a plain text prompt as the run's input.
    pub fn user_input(agent: &str, text: &str) -> Vec<RunItem> {
        vec![RunItem::Message {
            agent: agent.to_string(),
            message: Message::user(text),
        }]
    }

    pub fn to_json(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, StateError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Read a snapshot that is already parsed, checking its version.
    pub fn from_value(value: serde_json::Value) -> Result<Self, StateError> {
        let found = value
            .get("schema_version")
            .and_then(serde_json::Value::as_u64)
            .ok_or(StateError::MissingVersion)?;
        if found != u64::from(STATE_SCHEMA_VERSION) {
            return Err(StateError::UnsupportedVersion {
                found,
                expected: STATE_SCHEMA_VERSION,
            });
        }
        Ok(serde_json::from_value(value)?)
    }

    // ── Accessors ─────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn current_agent(&self) -> &str {
        &self.current_agent
    }

    pub fn original_input(&self) -> &[RunItem] {
        &self.original_input
    }

    pub fn generated_items(&self) -> &[RunItem] {
        &self.generated_items
    }

    pub fn persisted_item_count(&self) -> usize {
        self.persisted_item_count
    }

    pub fn emitted_item_count(&self) -> usize {
        self.emitted_item_count
    }

    pub fn current_step(&self) -> Option<&NextStep> {
        self.current_step.as_ref()
    }

    pub fn current_turn(&self) -> u32 {
        self.current_turn
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn set_max_turns(&mut self, max_turns: u32) {
        self.max_turns = max_turns;
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RunContext {
        &mut self.context
    }

    pub fn tool_use(&self) -> &ToolUseTracker {
        &self.tool_use
    }

    pub fn model_responses(&self) -> &[ModelResponse] {
        &self.model_responses
    }

    pub fn final_output(&self) -> Option<&str> {
        self.final_output.as_deref()
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self.current_step, Some(NextStep::Interruption { .. }))
    }

    /// Approval records the current step is waiting on.
    pub fn pending_approvals(&self) -> &[ApprovalRecord] {
        match &self.current_step {
            Some(NextStep::Interruption { approvals }) => approvals,
            _ => &[],
        }
    }

    /// Approve the pending call `call_id`; `always` also approves every
    /// future call of the same tool.
    pub fn approve(&mut self, call_id: &str, always: bool) -> Result<(), ApprovalError> {
        let tool_name = self.pending_tool_name(call_id)?;
        self.context.approve_tool(&tool_name, call_id, always)
    }

    /// Reject the pending call `call_id`; `always` also rejects every
    /// future call of the same tool.
    pub fn reject(&mut self, call_id: &str, always: bool) -> Result<(), ApprovalError> {
        let tool_name = self.pending_tool_name(call_id)?;
        self.context.reject_tool(&tool_name, call_id, always)
    }

    fn pending_tool_name(&self, call_id: &str) -> Result<String, ApprovalError> {
        self.pending_approvals()
            .iter()
            .find(|record| record.call_id() == call_id)
            .map(|record| record.tool_name().to_string())
            .ok_or_else(|| ApprovalError::NoPendingCall(call_id.to_string()))
    }

    /// Original input followed by every model-visible generated item.
    pub fn history(&self) -> Vec<RunItem> {
        self.original_input
            .iter()
            .chain(self.generated_items.iter().filter(|i| i.is_model_visible()))
            .cloned()
            .collect()
    }

    // ── Engine bookkeeping ────────────────────────────────────────────

    pub(crate) fn begin_turn(&mut self) {
        self.current_turn_start = self.generated_items.len();
    }

    pub(crate) fn push(&mut self, item: RunItem) {
        self.generated_items.push(item);
    }

    /// Items appended since the current turn began.
    pub(crate) fn current_turn_items(&self) -> &[RunItem] {
        let start = self.current_turn_start.min(self.generated_items.len());
        &self.generated_items[start..]
    }

    /// Whether the current turn already holds a result for `call`.
    pub(crate) fn has_result_for(&self, call: &ToolCallRequest) -> bool {
        self.current_turn_items()
            .iter()
            .any(|i| i.is_result_for(call.category(), &call.call_id))
    }

    /// Whether the current turn already holds a decision for `call`.
    pub(crate) fn has_decision_for(&self, call: &ToolCallRequest) -> bool {
        self.current_turn_items().iter().any(|item| {
            matches!(
                item,
                RunItem::Approval { record, .. }
                    if record.status.is_resolved()
                        && record.call.category() == call.category()
                        && record.call.call_id == call.call_id
            )
        })
    }

    /// Close a step: persist everything except trailing pending placeholders.
    pub(crate) fn settle(&mut self) {
        let pending_tail = self
            .generated_items
            .iter()
            .rev()
            .take_while(|i| i.as_pending_approval().is_some())
            .count();
        self.persisted_item_count = self.generated_items.len() - pending_tail;
    }

    /// Drop trailing pending placeholders before a resume. Returns how many
    /// were removed.
    pub(crate) fn rewind(&mut self) -> usize {
        let mut removed = 0;
        while self
            .generated_items
            .last()
            .is_some_and(|i| i.as_pending_approval().is_some())
        {
            self.generated_items.pop();
            removed += 1;
        }
        let len = self.generated_items.len();
        self.persisted_item_count = self.persisted_item_count.min(len);
        self.emitted_item_count = self.emitted_item_count.min(len);
        self.current_turn_start = self.current_turn_start.min(len);
        removed
    }

    /// Items not yet streamed, with their indices. Placeholders re-appended
    /// by a resume are not streamed twice.
    pub(crate) fn take_unemitted(&mut self) -> Vec<(usize, RunItem)> {
        let mut fresh = Vec::new();
        for (index, item) in self
            .generated_items
            .iter()
            .enumerate()
            .skip(self.emitted_item_count)
        {
            if let Some(record) = item.as_pending_approval()
                && !self
                    .emitted_placeholders
                    .insert(record.call_id().to_string())
            {
                continue;
            }
            fresh.push((index, item.clone()));
        }
        self.emitted_item_count = self.generated_items.len();
        fresh
    }
}
