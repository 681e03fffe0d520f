//! Agent-as-tool — exposes an agent as a function tool running a nested run.
//!
//! The nested run shares the caller's approval ledger and is cancelled with
//! it. When it pauses, its serialized state travels with the outer call and
//! is handed back on re-dispatch so the nested run resumes where it stopped.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use runwright_core::context::RunContext;
use runwright_core::error::{EngineError, ToolError};
use runwright_core::item::OutputValue;
use runwright_core::provider::ModelProvider;
use runwright_core::tool::{NestedRunOutcome, Tool, ToolContext, ToolOutput};

use crate::agent::Agent;
use crate::error::RunError;
use crate::runner::{RunOptions, Runner};
use crate::state::RunState;

pub struct AgentTool {
    agent: Arc<Agent>,
    provider: Arc<dyn ModelProvider>,
    options: RunOptions,
    name: String,
    description: String,
}

impl AgentTool {
    pub fn new(agent: Arc<Agent>, provider: Arc<dyn ModelProvider>) -> Self {
        let name = tool_slug(&agent.name);
        let description = agent
            .handoff_description
            .clone()
            .unwrap_or_else(|| format!("Ask the {} agent", agent.name));
        Self {
            agent,
            provider,
            options: RunOptions::default(),
            name,
            description,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    async fn run_nested(&self, ctx: &ToolContext<'_>, input: &str) -> Result<ToolOutput, ToolError> {
        let runner = Runner::new(self.provider.clone()).with_options(self.options.clone());
        let token = ctx.run.cancellation_token().child_token();

        let outcome = match ctx.resume_state {
            Some(snapshot) => {
                let mut state = RunState::from_value(snapshot.clone()).map_err(|e| {
                    ToolError::ExecutionFailed {
                        tool_name: self.name.clone(),
                        reason: format!("unreadable nested run state: {e}"),
                    }
                })?;
                state.context.approvals_mut().absorb(ctx.run.approvals());
                state.context.set_cancellation_token(token);
                debug!(tool = %self.name, call_id = %ctx.call.call_id, "Resuming nested run");
                runner.resume(&self.agent, state).await
            }
            None => {
                let mut nested = RunContext::new(ctx.run.data.clone());
                nested.approvals_mut().absorb(ctx.run.approvals());
                nested.set_cancellation_token(token);
                debug!(tool = %self.name, call_id = %ctx.call.call_id, "Starting nested run");
                runner.run(&self.agent, input, nested).await
            }
        };
        let result = outcome.map_err(|e| self.tool_error(e))?;

        if result.is_interrupted() {
            let state = serde_json::to_value(&result.state).map_err(|e| {
                ToolError::ExecutionFailed {
                    tool_name: self.name.clone(),
                    reason: format!("nested run state could not be saved: {e}"),
                }
            })?;
            return Ok(ToolOutput {
                value: OutputValue::text(""),
                nested: Some(NestedRunOutcome {
                    agent: result.last_agent,
                    final_output: None,
                    interruptions: result.interruptions,
                    state: Some(state),
                }),
            });
        }

        let text = result.final_output.unwrap_or_default();
        Ok(ToolOutput {
            value: OutputValue::text(text.clone()),
            nested: Some(NestedRunOutcome {
                agent: result.last_agent,
                final_output: Some(text),
                interruptions: Vec::new(),
                state: None,
            }),
        })
    }

    /// A nested run that merely failed to answer reads as a tool failure;
    /// every other fatal condition aborts the calling run too.
    fn tool_error(&self, err: RunError) -> ToolError {
        match err.kind {
            EngineError::Cancelled => ToolError::Cancelled(self.name.clone()),
            unanswered @ (EngineError::MaxTurnsExceeded { .. } | EngineError::Provider(_)) => {
                ToolError::ExecutionFailed {
                    tool_name: self.name.clone(),
                    reason: unanswered.to_string(),
                }
            }
            fatal => ToolError::Fatal(Box::new(fatal)),
        }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "input": {"type": "string", "description": "What to ask the agent"}
            },
            "required": ["input"]
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let input = arguments
            .get("input")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.run_nested(ctx, &input).await
    }
}

fn tool_slug(agent_name: &str) -> String {
    agent_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
