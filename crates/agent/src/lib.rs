//! The turn engine — drives an agent run one model turn at a time.
//!
//! Each turn follows a **Classify → Dispatch → Resolve** cycle:
//!
//! 1. **Ask** the model provider for the next response
//! 2. **Classify** the raw output into items, local tool calls, hosted
//!    approval requests and handoffs
//! 3. **Dispatch** local calls (approval gate, guardrails, timeout, error
//!    formatting) and resolve hosted approvals
//! 4. **Resolve** the turn into the next step: run again, final output,
//!    handoff or interruption
//!
//! An interrupted run is a plain [`RunState`] snapshot. The host records
//! decisions on it and hands it back to [`Runner::resume`], which rewinds
//! the pending tail and finishes the turn without running anything twice.

pub mod agent;
pub mod agent_tool;
pub mod classifier;
pub mod dispatch;
pub mod error;
pub mod error_policy;
pub mod resolver;
pub mod resumer;
pub mod runner;
pub mod state;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use agent::{
    Agent, FunctionToolResult, Handoff, HandoffInputData, HandoffInputFilter, OutputType,
    RemoveToolItems, ToolUseBehavior, ToolUsePolicy, ToolsToFinalOutput, handoff_tool_name,
};
pub use agent_tool::AgentTool;
pub use classifier::{HandoffRequest, ProcessedResponse, classify};
pub use dispatch::{DispatchOutcome, DispatchSettings, ToolDispatcher};
pub use error::{RunError, StateError};
pub use error_policy::{
    ErrorHandlerResult, MaxTurnsHandler, RunErrorData, RunErrorHandlers, max_turns_handler,
};
pub use resolver::{TurnResolver, decide_next_step};
pub use resumer::InterruptionResumer;
pub use runner::{RunOptions, RunResult, Runner};
pub use state::{NextStep, RunState, STATE_SCHEMA_VERSION};
