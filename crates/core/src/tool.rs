//! Tool trait — the abstraction over agent capabilities.
//!
//! A function tool is a named, typed callable. How the engine treats it
//! (approval, timeout, guardrails, error handling) is described by its
//! [`ToolPolicy`], registered alongside it in the [`ToolRegistry`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::ToolError;
use crate::guardrail::{ToolInputGuardrail, ToolOutputGuardrail};
use crate::item::{ApprovalRecord, OutputValue, ToolCallRequest};
use crate::provider::ToolDefinition;

/// What a tool sees of the call it is serving.
pub struct ToolContext<'a> {
    pub run: &'a RunContext,
    pub agent: &'a str,
    pub call: &'a ToolCallRequest,
    /// Serialized state of this call's own paused nested run, when the call
    /// is being re-dispatched after an interruption.
    pub resume_state: Option<&'a serde_json::Value>,
}

/// Summary of a nested agent run performed by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedRunOutcome {
    pub agent: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,

    /// Approvals the nested run is waiting on. Non-empty means the nested
    /// run paused and the outer call has not completed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interruptions: Vec<ApprovalRecord>,

    /// Serialized nested run state, present while paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
}

impl NestedRunOutcome {
    pub fn is_paused(&self) -> bool {
        !self.interruptions.is_empty()
    }
}

/// The value returned by a tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub value: OutputValue,
    pub nested: Option<NestedRunOutcome>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            value: OutputValue::text(text),
            nested: None,
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self {
            value: OutputValue::Json { value },
            nested: None,
        }
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "lookup", "get_weather").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with already-parsed arguments.
    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Decides per call whether a tool needs approval.
#[async_trait]
pub trait ApprovalPredicate: Send + Sync {
    async fn needs_approval(&self, ctx: &RunContext, call: &ToolCallRequest) -> bool;
}

#[derive(Clone, Default)]
pub enum ApprovalRequirement {
    #[default]
    Never,
    Always,
    Predicate(Arc<dyn ApprovalPredicate>),
}

impl ApprovalRequirement {
    pub async fn applies(&self, ctx: &RunContext, call: &ToolCallRequest) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::Predicate(predicate) => predicate.needs_approval(ctx, call).await,
        }
    }
}

impl std::fmt::Debug for ApprovalRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => write!(f, "Never"),
            Self::Always => write!(f, "Always"),
            Self::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// What happens when a tool exceeds its timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutBehavior {
    /// Return a synthetic "timed out" message as the tool result.
    #[default]
    ErrorAsResult,
    /// Abort the run.
    RaiseException,
}

/// What happens when a tool fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorBehavior {
    /// Feed a user-safe error message back as the tool result.
    #[default]
    UserSafeMessage,
    /// Abort the run.
    Propagate,
}

/// Approval, timeout, guardrail and error policy for one tool.
#[derive(Clone, Default)]
pub struct ToolPolicy {
    pub approval: ApprovalRequirement,
    pub timeout: Option<Duration>,
    pub timeout_behavior: TimeoutBehavior,
    /// `None` defers to the run's default.
    pub error_behavior: Option<ErrorBehavior>,
    pub input_guardrails: Vec<Arc<dyn ToolInputGuardrail>>,
    pub output_guardrails: Vec<Arc<dyn ToolOutputGuardrail>>,
}

impl ToolPolicy {
    pub fn needs_approval(mut self) -> Self {
        self.approval = ApprovalRequirement::Always;
        self
    }

    pub fn approval_when(mut self, predicate: Arc<dyn ApprovalPredicate>) -> Self {
        self.approval = ApprovalRequirement::Predicate(predicate);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration, behavior: TimeoutBehavior) -> Self {
        self.timeout = Some(timeout);
        self.timeout_behavior = behavior;
        self
    }

    pub fn with_error_behavior(mut self, behavior: ErrorBehavior) -> Self {
        self.error_behavior = Some(behavior);
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: Arc<dyn ToolInputGuardrail>) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: Arc<dyn ToolOutputGuardrail>) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }
}

impl std::fmt::Debug for ToolPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolPolicy")
            .field("approval", &self.approval)
            .field("timeout", &self.timeout)
            .field("timeout_behavior", &self.timeout_behavior)
            .field("error_behavior", &self.error_behavior)
            .field("input_guardrails", &self.input_guardrails.len())
            .field("output_guardrails", &self.output_guardrails.len())
            .finish()
    }
}

/// A tool together with its policy.
#[derive(Clone)]
pub struct RegisteredTool {
    pub tool: Arc<dyn Tool>,
    pub policy: ToolPolicy,
}

/// A registry of available function tools.
///
/// The engine uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Look up tools and their policies when the LLM requests them
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    /// Registration order, so definitions are sent in a stable order.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with the default policy. Replaces any existing tool
    /// with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.register_with_policy(tool, ToolPolicy::default());
    }

    pub fn register_with_policy(&mut self, tool: Arc<dyn Tool>, policy: ToolPolicy) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, RegisteredTool { tool, policy });
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.tool.to_definition())
            .collect()
    }

    /// List all registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.order.iter()).finish()
    }
}
