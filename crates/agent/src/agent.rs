//! Agent definitions — the unit of behavior the engine runs.
//!
//! An agent bundles instructions, function tools, optional computer/shell/
//! patch capabilities, hosted tool servers, handoff targets, its tool-use
//! policy and its output contract.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use runwright_config::{RUN_LLM_AGAIN, STOP_ON_FIRST_TOOL, ToolUseBehaviorConfig};
use runwright_core::capability::{
    APPLY_PATCH_TOOL_NAME, ApplyPatchTool, COMPUTER_TOOL_NAME, ComputerTool, HostedTool,
    SHELL_TOOL_NAME, ShellTool,
};
use runwright_core::context::RunContext;
use runwright_core::error::EngineError;
use runwright_core::guardrail::OutputGuardrail;
use runwright_core::item::{ApprovalRecord, OutputValue, ResultStatus, RunItem, ToolCategory};
use runwright_core::provider::{ModelSettings, ToolDefinition};
use runwright_core::tool::{Tool, ToolPolicy, ToolRegistry};

/// The shape of an agent's final output.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum OutputType {
    #[default]
    Text,
    /// JSON text that must validate against `schema`.
    Json {
        name: String,
        schema: serde_json::Value,
    },
}

/// A function tool's result, as seen by tool-use policies.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub output: OutputValue,
    pub status: ResultStatus,
}

/// Verdict of a custom tool-use policy.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolsToFinalOutput {
    /// Send the tool results back to the model.
    Continue,
    /// Finish the run with this output.
    Final(String),
    /// Pause the run until these records are decided.
    Interrupted(Vec<ApprovalRecord>),
}

/// Decides what happens after a turn's function tools ran.
#[async_trait]
pub trait ToolUsePolicy: Send + Sync {
    async fn decide(
        &self,
        ctx: &RunContext,
        results: &[FunctionToolResult],
    ) -> Result<ToolsToFinalOutput, EngineError>;
}

/// What the engine does once tools have produced output.
#[derive(Clone, Default)]
pub enum ToolUseBehavior {
    #[default]
    RunLlmAgain,
    StopOnFirstTool,
    StopAtToolNames(Vec<String>),
    Custom(Arc<dyn ToolUsePolicy>),
}

impl ToolUseBehavior {
    pub fn from_config(config: &ToolUseBehaviorConfig) -> Result<Self, EngineError> {
        match config {
            ToolUseBehaviorConfig::Named(name) if name == RUN_LLM_AGAIN => Ok(Self::RunLlmAgain),
            ToolUseBehaviorConfig::Named(name) if name == STOP_ON_FIRST_TOOL => {
                Ok(Self::StopOnFirstTool)
            }
            ToolUseBehaviorConfig::Named(name) => Err(EngineError::InvalidToolUseBehavior {
                agent: String::new(),
                reason: format!("unknown policy '{name}'"),
            }),
            ToolUseBehaviorConfig::StopAt { stop_at_tool_names } => {
                Ok(Self::StopAtToolNames(stop_at_tool_names.clone()))
            }
        }
    }
}

impl std::fmt::Debug for ToolUseBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RunLlmAgain => write!(f, "RunLlmAgain"),
            Self::StopOnFirstTool => write!(f, "StopOnFirstTool"),
            Self::StopAtToolNames(names) => f.debug_tuple("StopAtToolNames").field(names).finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// History handed to a handoff's input filter.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffInputData {
    /// The run's original input.
    pub input_history: Vec<RunItem>,
    /// Items generated before the turn that requested the handoff.
    pub pre_handoff_items: Vec<RunItem>,
    /// Items of the handoff turn, including the handoff records.
    pub new_items: Vec<RunItem>,
}

/// Rewrites the history the next agent receives.
pub trait HandoffInputFilter: Send + Sync {
    fn filter(&self, data: HandoffInputData) -> HandoffInputData;
}

/// Drops every tool-related item, leaving messages and reasoning.
pub struct RemoveToolItems;

impl HandoffInputFilter for RemoveToolItems {
    fn filter(&self, data: HandoffInputData) -> HandoffInputData {
        let keep = |items: Vec<RunItem>| -> Vec<RunItem> {
            items
                .into_iter()
                .filter(|item| matches!(item, RunItem::Message { .. } | RunItem::Reasoning { .. }))
                .collect()
        };
        HandoffInputData {
            input_history: keep(data.input_history),
            pre_handoff_items: keep(data.pre_handoff_items),
            new_items: keep(data.new_items),
        }
    }
}

/// A transfer of control to another agent, exposed to the model as a
/// function tool.
#[derive(Clone)]
pub struct Handoff {
    pub agent: Arc<Agent>,
    pub tool_name: String,
    pub description: String,
    pub input_filter: Option<Arc<dyn HandoffInputFilter>>,
}

impl Handoff {
    pub fn to(agent: Arc<Agent>) -> Self {
        let description = match &agent.handoff_description {
            Some(description) => format!(
                "Handoff to the {} agent to handle the request. {description}",
                agent.name
            ),
            None => format!("Handoff to the {} agent to handle the request.", agent.name),
        };
        Self {
            tool_name: handoff_tool_name(&agent.name),
            description,
            agent,
            input_filter: None,
        }
    }

    pub fn with_input_filter(mut self, filter: Arc<dyn HandoffInputFilter>) -> Self {
        self.input_filter = Some(filter);
        self
    }

    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.tool_name.clone(),
            description: self.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }
}

/// `transfer_to_<agent>` with the name lowercased and non-alphanumerics
/// replaced by underscores.
pub fn handoff_tool_name(agent_name: &str) -> String {
    let slug: String = agent_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("transfer_to_{slug}")
}

/// An agent definition.
#[derive(Clone)]
pub struct Agent {
    pub name: String,
    pub instructions: Option<String>,
    /// Shown to other agents that can hand off to this one.
    pub handoff_description: Option<String>,
    pub tools: ToolRegistry,
    pub computer: Option<ComputerTool>,
    pub shell: Option<ShellTool>,
    pub apply_patch: Option<ApplyPatchTool>,
    pub hosted_tools: Vec<HostedTool>,
    pub handoffs: Vec<Handoff>,
    pub tool_use_behavior: ToolUseBehavior,
    pub output_type: OutputType,
    pub output_guardrails: Vec<Arc<dyn OutputGuardrail>>,
    pub model_settings: ModelSettings,
    /// Relax a forced `tool_choice` once this agent has used a tool.
    pub reset_tool_choice: bool,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: None,
            handoff_description: None,
            tools: ToolRegistry::new(),
            computer: None,
            shell: None,
            apply_patch: None,
            hosted_tools: Vec::new(),
            handoffs: Vec::new(),
            tool_use_behavior: ToolUseBehavior::default(),
            output_type: OutputType::default(),
            output_guardrails: Vec::new(),
            model_settings: ModelSettings::default(),
            reset_tool_choice: true,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = Some(description.into());
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn with_tool_policy(mut self, tool: Arc<dyn Tool>, policy: ToolPolicy) -> Self {
        self.tools.register_with_policy(tool, policy);
        self
    }

    pub fn with_computer(mut self, computer: ComputerTool) -> Self {
        self.computer = Some(computer);
        self
    }

    pub fn with_shell(mut self, shell: ShellTool) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn with_apply_patch(mut self, apply_patch: ApplyPatchTool) -> Self {
        self.apply_patch = Some(apply_patch);
        self
    }

    pub fn with_hosted_tool(mut self, hosted: HostedTool) -> Self {
        self.hosted_tools.push(hosted);
        self
    }

    pub fn with_handoff(mut self, handoff: Handoff) -> Self {
        self.handoffs.push(handoff);
        self
    }

    pub fn with_tool_use_behavior(mut self, behavior: ToolUseBehavior) -> Self {
        self.tool_use_behavior = behavior;
        self
    }

    /// Apply a configured tool-use behavior; unknown policy names are an error.
    pub fn with_tool_use_config(
        mut self,
        config: &ToolUseBehaviorConfig,
    ) -> Result<Self, EngineError> {
        self.tool_use_behavior = match ToolUseBehavior::from_config(config) {
            Ok(behavior) => behavior,
            Err(EngineError::InvalidToolUseBehavior { reason, .. }) => {
                return Err(EngineError::InvalidToolUseBehavior {
                    agent: self.name.clone(),
                    reason,
                });
            }
            Err(other) => return Err(other),
        };
        Ok(self)
    }

    pub fn with_output_type(mut self, output_type: OutputType) -> Self {
        self.output_type = output_type;
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: Arc<dyn OutputGuardrail>) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn with_model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = settings;
        self
    }

    pub fn with_reset_tool_choice(mut self, reset: bool) -> Self {
        self.reset_tool_choice = reset;
        self
    }

    pub fn find_handoff(&self, tool_name: &str) -> Option<&Handoff> {
        self.handoffs.iter().find(|h| h.tool_name == tool_name)
    }

    pub fn hosted_tool(&self, server_label: &str) -> Option<&HostedTool> {
        self.hosted_tools
            .iter()
            .find(|h| h.server_label == server_label)
    }

    /// The policy governing calls of `category` named `tool_name`.
    pub fn policy_for(&self, category: ToolCategory, tool_name: &str) -> Option<&ToolPolicy> {
        match category {
            ToolCategory::Function => self.tools.get(tool_name).map(|t| &t.policy),
            ToolCategory::Computer => self.computer.as_ref().map(|c| &c.policy),
            ToolCategory::Shell => self.shell.as_ref().map(|s| &s.policy),
            ToolCategory::ApplyPatch => self.apply_patch.as_ref().map(|p| &p.policy),
            ToolCategory::Hosted => None,
        }
    }

    pub fn output_schema(&self) -> Option<&serde_json::Value> {
        match &self.output_type {
            OutputType::Text => None,
            OutputType::Json { schema, .. } => Some(schema),
        }
    }

    /// Everything the model may call: function tools, enabled built-in
    /// capabilities, then handoffs.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = self.tools.definitions();
        let builtin = [
            (self.computer.is_some(), COMPUTER_TOOL_NAME, "Control a computer screen."),
            (self.shell.is_some(), SHELL_TOOL_NAME, "Run shell commands."),
            (self.apply_patch.is_some(), APPLY_PATCH_TOOL_NAME, "Create, update or delete files."),
        ];
        for (enabled, name, description) in builtin {
            if enabled {
                definitions.push(ToolDefinition {
                    name: name.to_string(),
                    description: description.to_string(),
                    parameters: serde_json::json!({"type": "object"}),
                });
            }
        }
        definitions.extend(self.handoffs.iter().map(Handoff::to_definition));
        definitions
    }

    /// Find `name` among this agent and every agent reachable through
    /// handoffs.
    pub fn find_agent(self: &Arc<Self>, name: &str) -> Option<Arc<Agent>> {
        let mut seen = HashSet::new();
        let mut stack = vec![Arc::clone(self)];
        while let Some(agent) = stack.pop() {
            if agent.name == name {
                return Some(agent);
            }
            if !seen.insert(agent.name.clone()) {
                continue;
            }
            stack.extend(agent.handoffs.iter().map(|h| Arc::clone(&h.agent)));
        }
        None
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("tools", &self.tools)
            .field("computer", &self.computer.is_some())
            .field("shell", &self.shell.is_some())
            .field("apply_patch", &self.apply_patch.is_some())
            .field("hosted_tools", &self.hosted_tools)
            .field(
                "handoffs",
                &self.handoffs.iter().map(|h| &h.tool_name).collect::<Vec<_>>(),
            )
            .field("tool_use_behavior", &self.tool_use_behavior)
            .field("output_type", &self.output_type)
            .finish()
    }
}
