//! # Runwright Core
//!
//! Domain types, traits, and error definitions for the Runwright agent
//! execution engine. This crate has **no engine logic** — it defines the
//! domain model the engine and every executor implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the engine consumes is a trait here (model provider,
//! tools, guardrails, computer/shell/editor executors, hosted approval
//! callbacks, instrumentation sinks). This enables:
//! - Swapping implementations per host
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod approval;
pub mod capability;
pub mod context;
pub mod error;
pub mod event;
pub mod guardrail;
pub mod item;
pub mod message;
pub mod provider;
pub mod tool;
pub mod tool_use;

// Re-export key types at crate root for ergonomics
pub use approval::{ApprovalLedger, ApprovalStatus};
pub use capability::{
    ApplyPatchTool, Computer, ComputerTool, Editor, HostedApprovalCallback, HostedDecision,
    HostedTool, Shell, ShellTool,
};
pub use context::RunContext;
pub use error::{
    ApprovalError, EngineError, Error, GuardrailError, ProviderError, Result, ToolError,
};
pub use event::{DomainEvent, EventBus, InstrumentationSink, ToolEventOutcome};
pub use guardrail::{GuardrailVerdict, OutputGuardrail, ToolInputGuardrail, ToolOutputGuardrail};
pub use item::{
    ApprovalRecord, CallPayload, ItemKind, NestedOwner, OutputValue, ResultStatus, RunItem, ToolCallRequest,
    ToolCallResult, ToolCategory,
};
pub use message::{Message, MessageSource, Role};
pub use provider::{
    ModelProvider, ModelRequest, ModelResponse, ModelSettings, OutputBlock, ToolChoice,
    ToolDefinition, Usage,
};
pub use tool::{
    ApprovalRequirement, ErrorBehavior, NestedRunOutcome, TimeoutBehavior, Tool, ToolContext, ToolOutput,
    ToolPolicy, ToolRegistry,
};
pub use tool_use::ToolUseTracker;
