//! Guardrail contract — policy checks on tool input, tool output and final
//! agent output.
//!
//! All three flavours return the same [`GuardrailVerdict`]. Authoring rules
//! is up to the host; the engine only enforces the verdicts.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::GuardrailError;
use crate::item::{OutputValue, ToolCallRequest};

/// What a guardrail decided about a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailVerdict {
    /// Let the content through.
    Allow,
    /// Substitute this text for the content; the run continues.
    RejectContent(String),
    /// Stop the run.
    Halt,
}

/// Checked before a tool executes.
#[async_trait]
pub trait ToolInputGuardrail: Send + Sync {
    fn name(&self) -> &str;

    async fn check(
        &self,
        ctx: &RunContext,
        call: &ToolCallRequest,
    ) -> Result<GuardrailVerdict, GuardrailError>;
}

/// Checked after a tool executes, on its output.
#[async_trait]
pub trait ToolOutputGuardrail: Send + Sync {
    fn name(&self) -> &str;

    async fn check(
        &self,
        ctx: &RunContext,
        call: &ToolCallRequest,
        output: &OutputValue,
    ) -> Result<GuardrailVerdict, GuardrailError>;
}

/// Checked on an agent's final output.
#[async_trait]
pub trait OutputGuardrail: Send + Sync {
    fn name(&self) -> &str;

    async fn check(
        &self,
        ctx: &RunContext,
        agent: &str,
        output: &str,
    ) -> Result<GuardrailVerdict, GuardrailError>;
}

/// A guardrail backed by a plain closure.
pub struct FnGuardrail<F> {
    name: String,
    check: F,
}

/// Build a tool input guardrail from a closure.
pub fn tool_input_guardrail<F>(name: impl Into<String>, check: F) -> Arc<dyn ToolInputGuardrail>
where
    F: Fn(&RunContext, &ToolCallRequest) -> GuardrailVerdict + Send + Sync + 'static,
{
    Arc::new(FnGuardrail {
        name: name.into(),
        check,
    })
}

/// Build a tool output guardrail from a closure.
pub fn tool_output_guardrail<F>(name: impl Into<String>, check: F) -> Arc<dyn ToolOutputGuardrail>
where
    F: Fn(&RunContext, &ToolCallRequest, &OutputValue) -> GuardrailVerdict
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnGuardrail {
        name: name.into(),
        check,
    })
}

/// Build a final-output guardrail from a closure.
pub fn output_guardrail<F>(name: impl Into<String>, check: F) -> Arc<dyn OutputGuardrail>
where
    F: Fn(&RunContext, &str, &str) -> GuardrailVerdict + Send + Sync + 'static,
{
    Arc::new(FnGuardrail {
        name: name.into(),
        check,
    })
}

#[async_trait]
impl<F> ToolInputGuardrail for FnGuardrail<F>
where
    F: Fn(&RunContext, &ToolCallRequest) -> GuardrailVerdict + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        ctx: &RunContext,
        call: &ToolCallRequest,
    ) -> Result<GuardrailVerdict, GuardrailError> {
        Ok((self.check)(ctx, call))
    }
}

#[async_trait]
impl<F> ToolOutputGuardrail for FnGuardrail<F>
where
    F: Fn(&RunContext, &ToolCallRequest, &OutputValue) -> GuardrailVerdict + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        ctx: &RunContext,
        call: &ToolCallRequest,
        output: &OutputValue,
    ) -> Result<GuardrailVerdict, GuardrailError> {
        Ok((self.check)(ctx, call, output))
    }
}

#[async_trait]
impl<F> OutputGuardrail for FnGuardrail<F>
where
    F: Fn(&RunContext, &str, &str) -> GuardrailVerdict + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(
        &self,
        ctx: &RunContext,
        agent: &str,
        output: &str,
    ) -> Result<GuardrailVerdict, GuardrailError> {
        Ok((self.check)(ctx, agent, output))
    }
}
