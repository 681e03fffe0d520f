//! Error types for the Runwright domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant. Fatal engine conditions
//! live in [`EngineError`]; the agent crate pairs them with a run-state
//! snapshot before handing them to the host.

use thiserror::Error;

/// The top-level error type for all Runwright operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Guardrail errors ---
    #[error("Guardrail error: {0}")]
    Guardrail(#[from] GuardrailError),

    // --- Approval ledger errors ---
    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    // --- Fatal engine conditions ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution cancelled: {0}")]
    Cancelled(String),

    /// A condition that must abort the calling run as well, such as a
    /// guardrail tripwire inside a nested agent run.
    #[error("Fatal tool error: {0}")]
    Fatal(Box<EngineError>),
}

/// A guardrail failed to produce a verdict at all.
#[derive(Debug, Clone, Error)]
pub enum GuardrailError {
    #[error("Guardrail '{guardrail}' failed: {reason}")]
    Failed { guardrail: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum ApprovalError {
    #[error(
        "Call {call_id} of tool '{tool_name}' is already {existing}; refusing to record it as {requested}"
    )]
    Conflict {
        tool_name: String,
        call_id: String,
        existing: String,
        requested: String,
    },

    #[error("Tool '{tool_name}' already has a permanent {existing} decision")]
    BlanketConflict { tool_name: String, existing: String },

    #[error("No pending approval for call {0}")]
    NoPendingCall(String),
}

/// Fatal conditions that abort a run.
///
/// Everything recoverable (rejections, tool failures, guardrail content
/// replacement) is turned into data by the dispatcher and never shows up here.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Max turns ({max_turns}) exceeded")]
    MaxTurnsExceeded { max_turns: u32 },

    #[error("Model behaved unexpectedly: {message}")]
    ModelBehavior { message: String },

    #[error("Tool '{tool_name}' (call {call_id}) timed out after {timeout_ms}ms")]
    ToolTimeout {
        tool_name: String,
        call_id: String,
        timeout_ms: u64,
    },

    #[error("Tool '{tool_name}' (call {call_id}) failed: {source}")]
    ToolCall {
        tool_name: String,
        call_id: String,
        #[source]
        source: ToolError,
    },

    #[error("Input guardrail '{guardrail}' halted tool '{tool_name}' (call {call_id})")]
    ToolInputGuardrailTripwire {
        guardrail: String,
        tool_name: String,
        call_id: String,
    },

    #[error("Output guardrail '{guardrail}' halted tool '{tool_name}' (call {call_id})")]
    ToolOutputGuardrailTripwire {
        guardrail: String,
        tool_name: String,
        call_id: String,
    },

    #[error("Output guardrail '{guardrail}' halted the final output of agent '{agent}'")]
    OutputGuardrailTripwire { guardrail: String, agent: String },

    #[error("Invalid tool use behavior for agent '{agent}': {reason}")]
    InvalidToolUseBehavior { agent: String, reason: String },

    #[error(transparent)]
    Guardrail(#[from] GuardrailError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("{0}")]
    UserError(String),
}

impl EngineError {
    /// Short machine-readable label, used in logs and the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MaxTurnsExceeded { .. } => "max_turns_exceeded",
            Self::ModelBehavior { .. } => "model_behavior",
            Self::ToolTimeout { .. } => "tool_timeout",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolInputGuardrailTripwire { .. } => "tool_input_guardrail",
            Self::ToolOutputGuardrailTripwire { .. } => "tool_output_guardrail",
            Self::OutputGuardrailTripwire { .. } => "output_guardrail",
            Self::InvalidToolUseBehavior { .. } => "invalid_tool_use_behavior",
            Self::Guardrail(_) => "guardrail",
            Self::Provider(_) => "provider",
            Self::Cancelled => "cancelled",
            Self::UserError(_) => "user_error",
        }
    }
}
