//! Tool dispatcher — runs one turn's tool calls.
//!
//! Every local category (function, computer, shell, patch) goes through the
//! same skeleton: approval gate, input guardrails, execution under timeout
//! and cancellation, output guardrails, error formatting. Each call gets a
//! paired `ToolStarted`/`ToolFinished` event; a drop guard closes the pair
//! when the call's future is dropped mid-flight.

mod computer;
mod function;
mod hosted;
mod patch;
mod shell;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use runwright_core::approval::ApprovalStatus;
use runwright_core::context::RunContext;
use runwright_core::error::{EngineError, ToolError};
use runwright_core::event::{DomainEvent, InstrumentationSink, ToolEventOutcome};
use runwright_core::guardrail::GuardrailVerdict;
use runwright_core::item::{
    ApprovalRecord, CallPayload, NestedOwner, OutputValue, ToolCallRequest, ToolCallResult,
};
use runwright_core::tool::{
    ErrorBehavior, NestedRunOutcome, TimeoutBehavior, ToolOutput, ToolPolicy,
};

use crate::agent::Agent;

pub use hosted::HostedResolution;

/// Renders the text a rejected call reports back to the model.
pub type RejectionFormatter = Arc<dyn Fn(&ToolCallRequest) -> String + Send + Sync>;

/// Renders the text a failed call reports back to the model.
pub type ErrorFormatter = Arc<dyn Fn(&ToolCallRequest, &ToolError) -> String + Send + Sync>;

/// Run-wide dispatch settings.
#[derive(Clone)]
pub struct DispatchSettings {
    /// Run a batch concurrently instead of one call after another.
    pub parallel: bool,
    pub rejection_message: String,
    pub rejection_formatter: Option<RejectionFormatter>,
    pub error_formatter: Option<ErrorFormatter>,
    /// Timeout for tools whose policy sets none.
    pub fallback_timeout: Option<(Duration, TimeoutBehavior)>,
    /// Error behavior for tools whose policy sets none.
    pub fallback_error_behavior: ErrorBehavior,
    pub sink: Option<Arc<dyn InstrumentationSink>>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            parallel: true,
            rejection_message: runwright_config::DEFAULT_REJECTION_MESSAGE.to_string(),
            rejection_formatter: None,
            error_formatter: None,
            fallback_timeout: None,
            fallback_error_behavior: ErrorBehavior::default(),
            sink: None,
        }
    }
}

impl DispatchSettings {
    pub fn rejection_text(&self, call: &ToolCallRequest) -> String {
        match &self.rejection_formatter {
            Some(format) => format(call),
            None => self.rejection_message.clone(),
        }
    }

    pub fn error_text(&self, call: &ToolCallRequest, error: &ToolError) -> String {
        match &self.error_formatter {
            Some(format) => format(call, error),
            None => format!(
                "An error occurred while running the tool. Please try again. Error: {error}"
            ),
        }
    }
}

impl std::fmt::Debug for DispatchSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchSettings")
            .field("parallel", &self.parallel)
            .field("rejection_message", &self.rejection_message)
            .field("fallback_timeout", &self.fallback_timeout)
            .field("fallback_error_behavior", &self.fallback_error_behavior)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// How a single call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The call produced a result (possibly a failure message or a
    /// guardrail substitution).
    Completed {
        call: ToolCallRequest,
        result: ToolCallResult,
        nested: Option<NestedRunOutcome>,
    },
    /// The call waits for a decision: its own, or those of a paused nested run.
    PendingApproval {
        call: ToolCallRequest,
        approvals: Vec<ApprovalRecord>,
    },
    /// The ledger rejected the call; `result` carries the rejection text.
    Rejected {
        call: ToolCallRequest,
        result: ToolCallResult,
    },
}

impl DispatchOutcome {
    pub fn call(&self) -> &ToolCallRequest {
        match self {
            Self::Completed { call, .. }
            | Self::PendingApproval { call, .. }
            | Self::Rejected { call, .. } => call,
        }
    }

    pub fn result(&self) -> Option<&ToolCallResult> {
        match self {
            Self::Completed { result, .. } | Self::Rejected { result, .. } => Some(result),
            Self::PendingApproval { .. } => None,
        }
    }
}

/// Dispatches calls for one agent within one run.
pub struct ToolDispatcher<'a> {
    agent: &'a Agent,
    ctx: &'a RunContext,
    settings: &'a DispatchSettings,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(agent: &'a Agent, ctx: &'a RunContext, settings: &'a DispatchSettings) -> Self {
        Self {
            agent,
            ctx,
            settings,
        }
    }

    /// Dispatch a batch. Outcomes follow call order.
    pub async fn dispatch_all(
        &self,
        calls: &[ToolCallRequest],
    ) -> Result<Vec<DispatchOutcome>, EngineError> {
        self.dispatch_batch(calls.iter().map(|call| (call, None)).collect())
            .await
    }

    /// Dispatch a batch where some calls resume a paused nested run.
    pub(crate) async fn dispatch_batch(
        &self,
        calls: Vec<(&ToolCallRequest, Option<&serde_json::Value>)>,
    ) -> Result<Vec<DispatchOutcome>, EngineError> {
        if self.settings.parallel {
            join_all(
                calls
                    .into_iter()
                    .map(|(call, state)| self.dispatch_with_resume(call, state)),
            )
            .await
            .into_iter()
            .collect()
        } else {
            let mut outcomes = Vec::with_capacity(calls.len());
            for (call, state) in calls {
                outcomes.push(self.dispatch_with_resume(call, state).await?);
            }
            Ok(outcomes)
        }
    }

    pub async fn dispatch(&self, call: &ToolCallRequest) -> Result<DispatchOutcome, EngineError> {
        self.dispatch_with_resume(call, None).await
    }

    /// Dispatch `call`, handing `resume_state` to an agent-as-tool that
    /// paused on a previous attempt.
    pub async fn dispatch_with_resume(
        &self,
        call: &ToolCallRequest,
        resume_state: Option<&serde_json::Value>,
    ) -> Result<DispatchOutcome, EngineError> {
        debug!(
            agent = %self.agent.name,
            tool = %call.tool_name,
            call_id = %call.call_id,
            category = %call.category(),
            "Dispatching tool call"
        );
        match &call.payload {
            CallPayload::Function { arguments } => {
                function::dispatch(self, call, arguments, resume_state).await
            }
            CallPayload::Computer { action } => computer::dispatch(self, call, action).await,
            CallPayload::Shell { action } => shell::dispatch(self, call, action).await,
            CallPayload::ApplyPatch { operation } => patch::dispatch(self, call, operation).await,
            CallPayload::Hosted { .. } => Err(EngineError::ModelBehavior {
                message: format!(
                    "Hosted call {} of '{}' is executed by its server, not locally",
                    call.call_id, call.tool_name
                ),
            }),
        }
    }

    /// Decide a hosted approval request.
    pub async fn resolve_hosted(&self, call: &ToolCallRequest) -> HostedResolution {
        hosted::resolve(self.agent, self.ctx, call).await
    }

    fn missing(&self, call: &ToolCallRequest) -> DispatchOutcome {
        warn!(agent = %self.agent.name, tool = %call.tool_name, call_id = %call.call_id, "No executor for tool call");
        let error = ToolError::NotFound(call.tool_name.clone());
        DispatchOutcome::Completed {
            call: call.clone(),
            result: ToolCallResult::failed(
                call,
                OutputValue::text(self.settings.error_text(call, &error)),
            ),
            nested: None,
        }
    }

    /// The shared skeleton. `reject` renders the rejection text in the
    /// category's output shape; `execute` runs the tool.
    async fn run_gated<R, F, Fut>(
        &self,
        call: &ToolCallRequest,
        policy: &ToolPolicy,
        reject: R,
        execute: F,
    ) -> Result<DispatchOutcome, EngineError>
    where
        R: FnOnce(String) -> OutputValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ToolOutput, ToolError>>,
    {
        let tool_name = call.tool_name.as_str();
        let call_id = call.call_id.as_str();

        if policy.approval.applies(self.ctx, call).await {
            match self.ctx.approval_status(tool_name, call_id) {
                ApprovalStatus::Pending => {
                    info!(tool = tool_name, call_id, "Tool call needs approval");
                    return Ok(DispatchOutcome::PendingApproval {
                        call: call.clone(),
                        approvals: vec![ApprovalRecord::pending(call.clone())],
                    });
                }
                ApprovalStatus::Rejected => {
                    info!(tool = tool_name, call_id, "Tool call was rejected");
                    self.start_events(call).finish(ToolEventOutcome::Rejected);
                    let text = self.settings.rejection_text(call);
                    return Ok(DispatchOutcome::Rejected {
                        call: call.clone(),
                        result: ToolCallResult::failed(call, reject(text)),
                    });
                }
                ApprovalStatus::Approved => {}
            }
        }

        let events = self.start_events(call);

        for guardrail in &policy.input_guardrails {
            let verdict = match guardrail.check(self.ctx, call).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    events.finish(ToolEventOutcome::Failed);
                    return Err(e.into());
                }
            };
            match verdict {
                GuardrailVerdict::Allow => {}
                GuardrailVerdict::RejectContent(text) => {
                    info!(tool = tool_name, call_id, guardrail = guardrail.name(), "Input guardrail replaced tool call");
                    events.finish(ToolEventOutcome::GuardrailRejected);
                    return Ok(completed(call, OutputValue::text(text), None));
                }
                GuardrailVerdict::Halt => {
                    warn!(tool = tool_name, call_id, guardrail = guardrail.name(), "Input guardrail tripwire");
                    events.finish(ToolEventOutcome::Failed);
                    return Err(EngineError::ToolInputGuardrailTripwire {
                        guardrail: guardrail.name().to_string(),
                        tool_name: tool_name.to_string(),
                        call_id: call_id.to_string(),
                    });
                }
            }
        }

        let timeout = policy
            .timeout
            .map(|limit| (limit, policy.timeout_behavior))
            .or(self.settings.fallback_timeout);
        let token = self.ctx.cancellation_token();
        let run = execute();
        let limited = async {
            match timeout {
                Some((limit, behavior)) => tokio::time::timeout(limit, run)
                    .await
                    .map_err(|_| Stop::TimedOut(limit, behavior)),
                None => Ok(run.await),
            }
        };
        let executed = tokio::select! {
            biased;
            _ = token.cancelled() => Err(Stop::Cancelled),
            out = limited => out,
        };

        let output = match executed {
            Err(Stop::Cancelled) | Ok(Err(ToolError::Cancelled(_))) => {
                warn!(tool = tool_name, call_id, "Tool call cancelled");
                events.finish(ToolEventOutcome::Aborted);
                return Err(EngineError::Cancelled);
            }
            Err(Stop::TimedOut(limit, behavior)) => {
                let timeout_ms = limit.as_millis() as u64;
                warn!(tool = tool_name, call_id, timeout_ms, "Tool call timed out");
                events.finish(ToolEventOutcome::TimedOut);
                return match behavior {
                    TimeoutBehavior::ErrorAsResult => Ok(DispatchOutcome::Completed {
                        call: call.clone(),
                        result: ToolCallResult::failed(
                            call,
                            OutputValue::text(format!(
                                "Tool '{tool_name}' timed out after {timeout_ms}ms."
                            )),
                        ),
                        nested: None,
                    }),
                    TimeoutBehavior::RaiseException => Err(EngineError::ToolTimeout {
                        tool_name: tool_name.to_string(),
                        call_id: call_id.to_string(),
                        timeout_ms,
                    }),
                };
            }
            Ok(Err(ToolError::Fatal(fatal))) => {
                warn!(tool = tool_name, call_id, kind = fatal.kind(), "Tool call raised a fatal error");
                events.finish(ToolEventOutcome::Failed);
                return Err(*fatal);
            }
            Ok(Err(error)) => {
                warn!(tool = tool_name, call_id, error = %error, "Tool call failed");
                events.finish(ToolEventOutcome::Failed);
                return match policy
                    .error_behavior
                    .unwrap_or(self.settings.fallback_error_behavior)
                {
                    ErrorBehavior::UserSafeMessage => {
                        Ok(DispatchOutcome::Completed {
                            call: call.clone(),
                            result: ToolCallResult::failed(
                                call,
                                OutputValue::text(self.settings.error_text(call, &error)),
                            ),
                            nested: None,
                        })
                    }
                    ErrorBehavior::Propagate => Err(EngineError::ToolCall {
                        tool_name: tool_name.to_string(),
                        call_id: call_id.to_string(),
                        source: error,
                    }),
                };
            }
            Ok(Ok(output)) => output,
        };

        if let Some(nested) = output.nested.as_ref().filter(|n| n.is_paused()) {
            info!(
                tool = tool_name,
                call_id,
                pending = nested.interruptions.len(),
                "Nested run paused for approval"
            );
            events.finish(ToolEventOutcome::Completed);
            let owner = NestedOwner {
                call: call.clone(),
                state: nested.state.clone().unwrap_or_default(),
            };
            let approvals = nested
                .interruptions
                .iter()
                .map(|record| ApprovalRecord {
                    owner: Some(owner.clone()),
                    ..record.clone()
                })
                .collect();
            return Ok(DispatchOutcome::PendingApproval {
                call: call.clone(),
                approvals,
            });
        }

        for guardrail in &policy.output_guardrails {
            let verdict = match guardrail.check(self.ctx, call, &output.value).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    events.finish(ToolEventOutcome::Failed);
                    return Err(e.into());
                }
            };
            match verdict {
                GuardrailVerdict::Allow => {}
                GuardrailVerdict::RejectContent(text) => {
                    info!(tool = tool_name, call_id, guardrail = guardrail.name(), "Output guardrail replaced tool output");
                    events.finish(ToolEventOutcome::GuardrailRejected);
                    return Ok(completed(call, OutputValue::text(text), None));
                }
                GuardrailVerdict::Halt => {
                    warn!(tool = tool_name, call_id, guardrail = guardrail.name(), "Output guardrail tripwire");
                    events.finish(ToolEventOutcome::Failed);
                    return Err(EngineError::ToolOutputGuardrailTripwire {
                        guardrail: guardrail.name().to_string(),
                        tool_name: tool_name.to_string(),
                        call_id: call_id.to_string(),
                    });
                }
            }
        }

        debug!(tool = tool_name, call_id, "Tool call completed");
        events.finish(ToolEventOutcome::Completed);
        Ok(completed(call, output.value, output.nested))
    }

    fn start_events(&self, call: &ToolCallRequest) -> ToolEventGuard<'_> {
        ToolEventGuard::start(self.settings.sink.as_deref(), &self.agent.name, call)
    }
}

enum Stop {
    Cancelled,
    TimedOut(Duration, TimeoutBehavior),
}

fn completed(
    call: &ToolCallRequest,
    output: OutputValue,
    nested: Option<NestedRunOutcome>,
) -> DispatchOutcome {
    DispatchOutcome::Completed {
        call: call.clone(),
        result: ToolCallResult::completed(call, output),
        nested,
    }
}

/// Emits `ToolStarted` on creation and exactly one `ToolFinished`: the
/// explicit outcome, or `Aborted` when dropped unfinished.
struct ToolEventGuard<'a> {
    sink: Option<&'a dyn InstrumentationSink>,
    agent: String,
    tool_name: String,
    call_id: String,
    started: Instant,
    finished: bool,
}

impl<'a> ToolEventGuard<'a> {
    fn start(sink: Option<&'a dyn InstrumentationSink>, agent: &str, call: &ToolCallRequest) -> Self {
        if let Some(sink) = sink {
            sink.record(DomainEvent::ToolStarted {
                agent: agent.to_string(),
                tool_name: call.tool_name.clone(),
                call_id: call.call_id.clone(),
                category: call.category(),
                timestamp: Utc::now(),
            });
        }
        Self {
            sink,
            agent: agent.to_string(),
            tool_name: call.tool_name.clone(),
            call_id: call.call_id.clone(),
            started: Instant::now(),
            finished: false,
        }
    }

    fn finish(mut self, outcome: ToolEventOutcome) {
        self.emit(outcome);
    }

    fn emit(&mut self, outcome: ToolEventOutcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(sink) = self.sink {
            sink.record(DomainEvent::ToolFinished {
                agent: self.agent.clone(),
                tool_name: self.tool_name.clone(),
                call_id: self.call_id.clone(),
                outcome,
                duration_ms: self.started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });
        }
    }
}

impl Drop for ToolEventGuard<'_> {
    fn drop(&mut self) {
        self.emit(ToolEventOutcome::Aborted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use runwright_core::capability::{
        APPLY_PATCH_TOOL_NAME, ApplyPatchTool, COMPUTER_TOOL_NAME, ComputerTool, SHELL_TOOL_NAME,
        ShellTool,
    };
    use runwright_core::guardrail::{tool_input_guardrail, tool_output_guardrail};
    use runwright_core::item::{
        ComputerAction, MouseButton, PatchOperation, ResultStatus, ShellAction, ShellOutcome,
    };

    use crate::test_helpers::{
        CountingTool, EchoShell, FakeComputer, MemoryEditor, RecordingSink, SlowTool,
    };

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest::function(id, name, "{}")
    }

    fn computer_call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            call_id: id.into(),
            tool_name: COMPUTER_TOOL_NAME.into(),
            payload: CallPayload::Computer {
                action: ComputerAction::Click {
                    x: 10,
                    y: 20,
                    button: MouseButton::Left,
                },
            },
        }
    }

    fn shell_call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            call_id: id.into(),
            tool_name: SHELL_TOOL_NAME.into(),
            payload: CallPayload::Shell {
                action: ShellAction {
                    commands: vec!["ls".into(), "pwd".into()],
                    timeout_ms: None,
                    max_output_length: None,
                },
            },
        }
    }

    fn patch_call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            call_id: id.into(),
            tool_name: APPLY_PATCH_TOOL_NAME.into(),
            payload: CallPayload::ApplyPatch {
                operation: PatchOperation::UpdateFile {
                    path: "src/lib.rs".into(),
                    diff: "@@\n-old\n+new".into(),
                },
            },
        }
    }

    /// Dispatch `call` undecided, then rejected, then (under a fresh id)
    /// approved. Returns the rejected and approved results.
    async fn walk_approval_gate(
        agent: &Agent,
        make: fn(&str) -> ToolCallRequest,
    ) -> (ToolCallResult, ToolCallResult) {
        let settings = DispatchSettings::default();
        let mut ctx = RunContext::default();
        let first = make("x1");

        let pending = ToolDispatcher::new(agent, &ctx, &settings)
            .dispatch(&first)
            .await
            .unwrap();
        let DispatchOutcome::PendingApproval { approvals, .. } = pending else {
            panic!("expected a pause, got {pending:?}");
        };
        assert_eq!(approvals[0].call, first);

        ctx.reject_tool(&first.tool_name, "x1", false).unwrap();
        let refused = ToolDispatcher::new(agent, &ctx, &settings)
            .dispatch(&first)
            .await
            .unwrap();
        let DispatchOutcome::Rejected { result: rejected, .. } = refused else {
            panic!("expected a rejection, got {refused:?}");
        };

        let second = make("x2");
        ctx.approve_tool(&second.tool_name, "x2", false).unwrap();
        let allowed = ToolDispatcher::new(agent, &ctx, &settings)
            .dispatch(&second)
            .await
            .unwrap();
        let DispatchOutcome::Completed { result: approved, .. } = allowed else {
            panic!("expected a completed call, got {allowed:?}");
        };
        (rejected, approved)
    }

    #[tokio::test]
    async fn undecided_gated_call_pauses_without_events() {
        let tool = Arc::new(CountingTool::new("lookup"));
        let agent = Agent::new("triage")
            .with_tool_policy(tool.clone(), ToolPolicy::default().needs_approval());
        let sink = Arc::new(RecordingSink::default());
        let settings = DispatchSettings {
            sink: Some(sink.clone()),
            ..DispatchSettings::default()
        };
        let ctx = RunContext::default();

        let outcome = ToolDispatcher::new(&agent, &ctx, &settings)
            .dispatch(&call("c1", "lookup"))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::PendingApproval { .. }));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn rejected_call_reports_rejection_text() {
        let tool = Arc::new(CountingTool::new("lookup"));
        let agent = Agent::new("triage")
            .with_tool_policy(tool.clone(), ToolPolicy::default().needs_approval());
        let settings = DispatchSettings::default();
        let mut ctx = RunContext::default();
        ctx.reject_tool("lookup", "c1", false).unwrap();

        let outcome = ToolDispatcher::new(&agent, &ctx, &settings)
            .dispatch(&call("c1", "lookup"))
            .await
            .unwrap();
        let DispatchOutcome::Rejected { result, .. } = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert_eq!(result.output.as_text(), "Tool execution was not approved.");
        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_rejecting_guardrail_short_circuits() {
        let tool = Arc::new(CountingTool::new("lookup"));
        let second_ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = second_ran.clone();
        let policy = ToolPolicy::default()
            .with_input_guardrail(tool_input_guardrail("a", |_, _| {
                GuardrailVerdict::RejectContent("a".into())
            }))
            .with_input_guardrail(tool_input_guardrail("b", move |_, _| {
                flag.store(true, Ordering::SeqCst);
                GuardrailVerdict::RejectContent("b".into())
            }));
        let agent = Agent::new("triage").with_tool_policy(tool.clone(), policy);
        let sink = Arc::new(RecordingSink::default());
        let settings = DispatchSettings {
            sink: Some(sink.clone()),
            ..DispatchSettings::default()
        };
        let ctx = RunContext::default();

        let outcome = ToolDispatcher::new(&agent, &ctx, &settings)
            .dispatch(&call("c1", "lookup"))
            .await
            .unwrap();
        assert_eq!(outcome.result().unwrap().output.as_text(), "a");
        assert!(!second_ran.load(Ordering::SeqCst));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            sink.tool_outcomes(),
            vec![("c1".to_string(), ToolEventOutcome::GuardrailRejected)]
        );
    }

    #[tokio::test]
    async fn halting_output_guardrail_is_fatal() {
        let tool = Arc::new(CountingTool::new("lookup"));
        let policy = ToolPolicy::default().with_output_guardrail(tool_output_guardrail(
            "no_secrets",
            |_, _, _| GuardrailVerdict::Halt,
        ));
        let agent = Agent::new("triage").with_tool_policy(tool.clone(), policy);
        let settings = DispatchSettings::default();
        let ctx = RunContext::default();

        let err = ToolDispatcher::new(&agent, &ctx, &settings)
            .dispatch(&call("c1", "lookup"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::ToolOutputGuardrailTripwire { ref guardrail, .. } if guardrail == "no_secrets"
        ));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_arguments_become_a_user_safe_message() {
        let tool = Arc::new(CountingTool::new("lookup"));
        let agent = Agent::new("triage").with_tool(tool.clone());
        let settings = DispatchSettings::default();
        let ctx = RunContext::default();

        let outcome = ToolDispatcher::new(&agent, &ctx, &settings)
            .dispatch(&ToolCallRequest::function("c1", "lookup", "{not json"))
            .await
            .unwrap();
        let result = outcome.result().unwrap();
        assert_eq!(result.status, ResultStatus::Failed);
        assert!(
            result
                .output
                .as_text()
                .starts_with("An error occurred while running the tool. Please try again. Error:")
        );
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn propagated_errors_are_fatal() {
        let tool = Arc::new(CountingTool::failing("lookup"));
        let agent = Agent::new("triage").with_tool_policy(
            tool,
            ToolPolicy::default().with_error_behavior(ErrorBehavior::Propagate),
        );
        let settings = DispatchSettings::default();
        let ctx = RunContext::default();

        let err = ToolDispatcher::new(&agent, &ctx, &settings)
            .dispatch(&call("c1", "lookup"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "tool_call");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_behaviors() {
        let settings = DispatchSettings::default();
        let ctx = RunContext::default();

        let soft = Agent::new("triage").with_tool_policy(
            Arc::new(SlowTool::new("slow", Duration::from_secs(5))),
            ToolPolicy::default()
                .with_timeout(Duration::from_millis(100), TimeoutBehavior::ErrorAsResult),
        );
        let outcome = ToolDispatcher::new(&soft, &ctx, &settings)
            .dispatch(&call("c1", "slow"))
            .await
            .unwrap();
        assert_eq!(
            outcome.result().unwrap().output.as_text(),
            "Tool 'slow' timed out after 100ms."
        );

        let hard = Agent::new("triage").with_tool_policy(
            Arc::new(SlowTool::new("slow", Duration::from_secs(5))),
            ToolPolicy::default()
                .with_timeout(Duration::from_millis(100), TimeoutBehavior::RaiseException),
        );
        let err = ToolDispatcher::new(&hard, &ctx, &settings)
            .dispatch(&call("c2", "slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ToolTimeout { timeout_ms: 100, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_not_a_timeout() {
        let agent = Agent::new("triage").with_tool_policy(
            Arc::new(SlowTool::new("slow", Duration::from_secs(5))),
            ToolPolicy::default()
                .with_timeout(Duration::from_secs(60), TimeoutBehavior::RaiseException),
        );
        let sink = Arc::new(RecordingSink::default());
        let settings = DispatchSettings {
            sink: Some(sink.clone()),
            ..DispatchSettings::default()
        };
        let ctx = RunContext::default();
        let token = ctx.cancellation_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let err = ToolDispatcher::new(&agent, &ctx, &settings)
            .dispatch(&call("c1", "slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(
            sink.tool_outcomes(),
            vec![("c1".to_string(), ToolEventOutcome::Aborted)]
        );
    }

    #[tokio::test]
    async fn dropped_dispatch_closes_its_event_pair() {
        let agent = Agent::new("triage")
            .with_tool(Arc::new(SlowTool::new("slow", Duration::from_secs(60))));
        let sink = Arc::new(RecordingSink::default());
        let settings = DispatchSettings {
            sink: Some(sink.clone()),
            ..DispatchSettings::default()
        };
        let ctx = RunContext::default();
        let dispatcher = ToolDispatcher::new(&agent, &ctx, &settings);
        let slow_call = call("c1", "slow");

        let raced = tokio::time::timeout(
            Duration::from_millis(20),
            dispatcher.dispatch(&slow_call),
        )
        .await;
        assert!(raced.is_err());
        assert_eq!(
            sink.tool_outcomes(),
            vec![("c1".to_string(), ToolEventOutcome::Aborted)]
        );
    }

    #[tokio::test]
    async fn computer_calls_pass_the_approval_gate() {
        let computer = Arc::new(FakeComputer::default());
        let agent = Agent::new("operator").with_computer(ComputerTool {
            policy: ToolPolicy::default().needs_approval(),
            ..ComputerTool::new(computer.clone())
        });

        let (rejected, approved) = walk_approval_gate(&agent, computer_call).await;
        assert_eq!(rejected.status, ResultStatus::Failed);
        assert_eq!(rejected.output.as_text(), "Tool execution was not approved.");
        assert_eq!(approved.status, ResultStatus::Completed);
        assert_eq!(
            approved.output,
            OutputValue::Image {
                data_url: "data:image/png;base64,iVBORw0KGgo".into()
            }
        );
        assert_eq!(computer.actions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shell_calls_pass_the_approval_gate() {
        let shell = Arc::new(EchoShell::default());
        let agent = Agent::new("ops").with_shell(ShellTool {
            policy: ToolPolicy::default().needs_approval(),
            ..ShellTool::new(shell.clone())
        });

        let (rejected, approved) = walk_approval_gate(&agent, shell_call).await;
        let OutputValue::Shell { outputs } = &rejected.output else {
            panic!("expected shell output");
        };
        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().all(|o| o.outcome == ShellOutcome::Exit { exit_code: 1 }));
        assert_eq!(rejected.status, ResultStatus::Failed);
        let OutputValue::Shell { outputs } = &approved.output else {
            panic!("expected shell output");
        };
        assert_eq!(outputs[1].stdout, "pwd");
        assert_eq!(shell.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn patch_calls_pass_the_approval_gate() {
        let editor = Arc::new(MemoryEditor::default());
        let agent = Agent::new("coder").with_apply_patch(ApplyPatchTool {
            policy: ToolPolicy::default().needs_approval(),
            ..ApplyPatchTool::new(editor.clone())
        });

        let (rejected, approved) = walk_approval_gate(&agent, patch_call).await;
        assert_eq!(rejected.status, ResultStatus::Failed);
        assert_eq!(rejected.output.as_text(), "Tool execution was not approved.");
        assert_eq!(approved.status, ResultStatus::Completed);
        assert_eq!(approved.output.as_text(), "updated src/lib.rs");
        assert_eq!(*editor.applied.lock().unwrap(), vec!["updated src/lib.rs".to_string()]);
    }

    #[tokio::test]
    async fn batch_outcomes_follow_call_order() {
        let agent = Agent::new("triage")
            .with_tool(Arc::new(CountingTool::new("a")))
            .with_tool(Arc::new(CountingTool::new("b")));
        let ctx = RunContext::default();
        for parallel in [true, false] {
            let settings = DispatchSettings {
                parallel,
                ..DispatchSettings::default()
            };
            let outcomes = ToolDispatcher::new(&agent, &ctx, &settings)
                .dispatch_all(&[call("c1", "b"), call("c2", "a"), call("c3", "missing")])
                .await
                .unwrap();
            let ids: Vec<_> = outcomes.iter().map(|o| o.call().call_id.as_str()).collect();
            assert_eq!(ids, vec!["c1", "c2", "c3"]);
            assert_eq!(
                outcomes[2].result().unwrap().status,
                ResultStatus::Failed
            );
        }
    }
}
