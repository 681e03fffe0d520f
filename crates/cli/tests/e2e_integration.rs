//! End-to-end integration tests for the Runwright turn engine.
//!
//! These tests drive full runs through the public runner API: approvals and
//! resumption, tool-use policies, guardrails, timeouts, cancellation,
//! handoffs, nested agent tools and instrumentation pairing.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use runwright_agent::{
    Agent, AgentTool, ErrorHandlerResult, Handoff, NextStep, RunErrorHandlers, RunOptions,
    RunState, Runner, ToolUseBehavior, max_turns_handler,
};
use runwright_core::approval::ApprovalStatus;
use runwright_core::capability::{HostedApprovalCallback, HostedDecision, HostedTool, ShellTool};
use runwright_core::context::RunContext;
use runwright_core::error::{EngineError, ProviderError, ToolError};
use runwright_core::guardrail::{GuardrailVerdict, tool_input_guardrail};
use runwright_core::item::{
    ItemKind, OutputValue, ResultStatus, RunItem, ShellAction, ShellOutcome, ToolCallRequest,
    ToolCallResult,
};
use runwright_core::message::MessageSource;
use runwright_core::provider::{ModelProvider, ModelRequest, ModelResponse, OutputBlock};
use runwright_core::tool::{TimeoutBehavior, Tool, ToolContext, ToolOutput, ToolPolicy};
use runwright_telemetry::TelemetryEngine;
use runwright_tools::default_shell;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence.
struct ScriptedProvider {
    responses: Mutex<Vec<ModelResponse>>,
    call_count: Mutex<usize>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn respond(&self, _request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        if *count >= responses.len() {
            panic!(
                "ScriptedProvider exhausted: call #{}, have {}",
                *count,
                responses.len()
            );
        }
        let resp = responses[*count].clone();
        *count += 1;
        Ok(resp)
    }
}

fn call(call_id: &str, name: &str) -> OutputBlock {
    OutputBlock::FunctionCall {
        call_id: call_id.into(),
        name: name.into(),
        arguments: "{}".into(),
    }
}

fn tools(calls: Vec<OutputBlock>) -> ModelResponse {
    ModelResponse::new(calls)
}

// ── Test tools ───────────────────────────────────────────────────────────

/// Answers with a fixed reply and counts executions.
struct StaticTool {
    name: String,
    reply: String,
    delay: Option<Duration>,
    runs: AtomicUsize,
}

impl StaticTool {
    fn new(name: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            reply: reply.into(),
            delay: None,
            runs: AtomicUsize::new(0),
        })
    }

    fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            reply: "late".into(),
            delay: Some(delay),
            runs: AtomicUsize::new(0),
        })
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Reply with a fixed answer"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        _ctx: &ToolContext<'_>,
        _arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ToolOutput::text(self.reply.clone()))
    }
}

fn results(state: &RunState) -> Vec<&ToolCallResult> {
    state
        .generated_items()
        .iter()
        .filter_map(|item| match item {
            RunItem::ToolResult { result, .. } => Some(result),
            _ => None,
        })
        .collect()
}

fn decisions_for(state: &RunState, call_id: &str) -> Vec<ApprovalStatus> {
    state
        .generated_items()
        .iter()
        .filter_map(|item| match item {
            RunItem::Approval { record, .. } if record.call_id() == call_id => Some(record.status),
            _ => None,
        })
        .collect()
}

fn gated(tool: Arc<StaticTool>) -> Agent {
    Agent::new("assistant").with_tool_policy(tool, ToolPolicy::default().needs_approval())
}

// ── Approvals ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_rejection_becomes_the_final_output() {
    let tool = StaticTool::new("delete_repo", "deleted");
    let agent = Arc::new(gated(tool.clone()).with_tool_use_behavior(ToolUseBehavior::StopOnFirstTool));
    let provider = ScriptedProvider::new(vec![tools(vec![call("c1", "delete_repo")])]);
    let runner = Runner::new(provider.clone());

    let paused = runner
        .run(&agent, "clean up", RunContext::default())
        .await
        .unwrap();
    assert!(paused.is_interrupted());
    assert_eq!(paused.interruptions.len(), 1);

    let mut state = paused.state;
    state.reject("c1", false).unwrap();
    let finished = runner.resume(&agent, state).await.unwrap();

    assert_eq!(
        finished.final_output.as_deref(),
        Some("Tool execution was not approved.")
    );
    assert_eq!(tool.runs(), 0);
    assert_eq!(decisions_for(&finished.state, "c1"), vec![ApprovalStatus::Rejected]);
    let results = results(&finished.state);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].call_id, "c1");
    assert_eq!(results[0].status, ResultStatus::Failed);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn e2e_approved_call_runs_exactly_once() {
    let tool = StaticTool::new("deploy", "deployed v2");
    let agent = Arc::new(gated(tool.clone()));
    let provider = ScriptedProvider::new(vec![
        tools(vec![call("c1", "deploy")]),
        ModelResponse::text("Deployment finished."),
    ]);
    let runner = Runner::new(provider.clone());

    let paused = runner
        .run(&agent, "ship it", RunContext::default())
        .await
        .unwrap();
    assert_eq!(tool.runs(), 0);

    let mut state = paused.state;
    state.approve("c1", false).unwrap();
    let finished = runner.resume(&agent, state).await.unwrap();
    assert_eq!(finished.final_output.as_deref(), Some("Deployment finished."));

    // Resuming a finished run only reports the recorded output.
    let again = runner.resume(&agent, finished.state).await.unwrap();
    assert_eq!(again.final_output.as_deref(), Some("Deployment finished."));
    assert_eq!(tool.runs(), 1);
    assert_eq!(provider.calls(), 2);
    assert_eq!(results(&again.state).len(), 1);
}

#[tokio::test]
async fn e2e_partial_approval_keeps_the_rest_pending() {
    let tool = StaticTool::new("lookup", "row");
    let agent = Arc::new(gated(tool.clone()));
    let provider = ScriptedProvider::new(vec![
        tools(vec![call("c1", "lookup"), call("c2", "lookup"), call("c3", "lookup")]),
        ModelResponse::text("three rows"),
    ]);
    let runner = Runner::new(provider);

    let paused = runner
        .run(&agent, "fetch", RunContext::default())
        .await
        .unwrap();
    let mut state = paused.state;
    state.approve("c1", false).unwrap();

    let still = runner.resume(&agent, state).await.unwrap();
    assert!(still.is_interrupted());
    let pending: Vec<_> = still.interruptions.iter().map(|r| r.call_id()).collect();
    assert_eq!(pending, vec!["c2", "c3"]);
    assert_eq!(tool.runs(), 1);
    assert_eq!(
        still.state.persisted_item_count(),
        still.state.generated_items().len() - 2
    );

    let mut state = still.state;
    state.approve("c2", false).unwrap();
    state.approve("c3", false).unwrap();
    let finished = runner.resume(&agent, state).await.unwrap();
    assert_eq!(finished.final_output.as_deref(), Some("three rows"));
    assert_eq!(tool.runs(), 3);
    assert_eq!(results(&finished.state).len(), 3);
}

#[tokio::test]
async fn e2e_resume_is_deterministic() {
    let tool = StaticTool::new("lookup", "row");
    let agent = Arc::new(gated(tool.clone()));
    let first = ScriptedProvider::new(vec![tools(vec![call("c1", "lookup"), call("c2", "lookup")])]);
    let paused = Runner::new(first)
        .run(&agent, "fetch", RunContext::default())
        .await
        .unwrap();
    let mut state = paused.state;
    state.approve("c1", false).unwrap();
    state.reject("c2", false).unwrap();

    let mut kinds = Vec::new();
    for _ in 0..2 {
        let provider = ScriptedProvider::new(vec![ModelResponse::text("done")]);
        let finished = Runner::new(provider)
            .resume(&agent, state.clone())
            .await
            .unwrap();
        let shape: Vec<(ItemKind, String)> = finished
            .state
            .generated_items()
            .iter()
            .map(|item| {
                let id = match item {
                    RunItem::ToolCall { call, .. } => call.call_id.clone(),
                    RunItem::ToolResult { result, .. } => result.call_id.clone(),
                    RunItem::Approval { record, .. } => record.call_id().to_string(),
                    _ => String::new(),
                };
                (item.kind(), id)
            })
            .collect();
        kinds.push(shape);
    }
    assert_eq!(kinds[0], kinds[1]);
    assert_eq!(tool.runs(), 2);
}

#[tokio::test]
async fn e2e_snapshot_survives_serialization() {
    let tool = StaticTool::new("deploy", "deployed");
    let agent = Arc::new(gated(tool.clone()));
    let provider = ScriptedProvider::new(vec![
        tools(vec![call("c1", "deploy")]),
        ModelResponse::text("ok"),
    ]);
    let runner = Runner::new(provider);

    let paused = runner
        .run(&agent, "ship", RunContext::default())
        .await
        .unwrap();
    let json = paused.state.to_json().unwrap();

    let mut restored = RunState::from_json(&json).unwrap();
    assert!(restored.is_interrupted());
    restored.approve("c1", true).unwrap();
    let finished = runner.resume(&agent, restored).await.unwrap();
    assert_eq!(finished.final_output.as_deref(), Some("ok"));
    assert_eq!(tool.runs(), 1);
}

// ── Tool use policies and guardrails ─────────────────────────────────────

#[tokio::test]
async fn e2e_stop_on_first_tool_uses_the_first_result() {
    let a = StaticTool::new("weather", "sunny");
    let b = StaticTool::new("news", "quiet day");
    let agent = Arc::new(
        Agent::new("assistant")
            .with_tool(a.clone())
            .with_tool(b.clone())
            .with_tool_use_behavior(ToolUseBehavior::StopOnFirstTool),
    );
    let provider = ScriptedProvider::new(vec![tools(vec![call("c1", "weather"), call("c2", "news")])]);

    let result = Runner::new(provider.clone())
        .run(&agent, "today?", RunContext::default())
        .await
        .unwrap();
    assert_eq!(result.final_output.as_deref(), Some("sunny"));
    assert_eq!(a.runs() + b.runs(), 2);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn e2e_input_guardrail_short_circuits_the_tool() {
    let tool = StaticTool::new("send_email", "sent");
    let policy = ToolPolicy::default().with_input_guardrail(tool_input_guardrail(
        "no_external_mail",
        |_, _| GuardrailVerdict::RejectContent("Blocked by mail policy".into()),
    ));
    let agent = Arc::new(Agent::new("assistant").with_tool_policy(tool.clone(), policy));
    let provider = ScriptedProvider::new(vec![
        tools(vec![call("c1", "send_email")]),
        ModelResponse::text("I could not send it."),
    ]);

    let result = Runner::new(provider)
        .run(&agent, "mail bob", RunContext::default())
        .await
        .unwrap();
    assert_eq!(tool.runs(), 0);
    assert_eq!(results(&result.state)[0].output.as_text(), "Blocked by mail policy");
    assert_eq!(result.final_output.as_deref(), Some("I could not send it."));
}

#[tokio::test(start_paused = true)]
async fn e2e_timeout_as_result_keeps_the_run_going() {
    let tool = StaticTool::slow("crawl", Duration::from_secs(30));
    let agent = Arc::new(Agent::new("assistant").with_tool_policy(
        tool.clone(),
        ToolPolicy::default().with_timeout(Duration::from_millis(50), TimeoutBehavior::ErrorAsResult),
    ));
    let provider = ScriptedProvider::new(vec![
        tools(vec![call("c1", "crawl")]),
        ModelResponse::text("The crawl took too long."),
    ]);

    let result = Runner::new(provider)
        .run(&agent, "crawl it", RunContext::default())
        .await
        .unwrap();
    let timed_out = results(&result.state)[0];
    assert_eq!(timed_out.output.as_text(), "Tool 'crawl' timed out after 50ms.");
    assert_eq!(timed_out.status, ResultStatus::Failed);
    assert_eq!(result.final_output.as_deref(), Some("The crawl took too long."));
}

#[tokio::test]
async fn e2e_cancelled_run_reports_cancellation() {
    let agent = Arc::new(Agent::new("assistant"));
    let provider = ScriptedProvider::new(vec![ModelResponse::text("never")]);
    let ctx = RunContext::default();
    ctx.cancel();

    let err = Runner::new(provider.clone())
        .run(&agent, "hi", ctx)
        .await
        .unwrap_err();
    assert!(matches!(err.kind, EngineError::Cancelled));
    assert_eq!(provider.calls(), 0);
}

// ── Error policy ─────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_max_turns_handler_supplies_the_answer() {
    let tool = StaticTool::new("search", "more results");
    let agent = Arc::new(Agent::new("assistant").with_tool(tool));
    let provider = ScriptedProvider::new(vec![tools(vec![call("c1", "search")])]);
    let handlers = RunErrorHandlers::new().with_max_turns(max_turns_handler(|data| {
        assert_eq!(data.last_agent, "assistant");
        Some(ErrorHandlerResult::new("fallback answer"))
    }));
    let runner = Runner::new(provider).with_options(
        RunOptions::default()
            .with_max_turns(1)
            .with_error_handlers(handlers),
    );

    let result = runner
        .run(&agent, "search forever", RunContext::default())
        .await
        .unwrap();
    assert_eq!(result.final_output.as_deref(), Some("fallback answer"));
    let last = result.state.generated_items().last().unwrap();
    let RunItem::Message { message, .. } = last else {
        panic!("expected the handler's message last, got {last:?}");
    };
    assert_eq!(message.source, MessageSource::ErrorHandler);
    assert_eq!(message.content, "fallback answer");
}

// ── Hosted tools, handoffs, nesting ──────────────────────────────────────

struct ApproveAll;

#[async_trait::async_trait]
impl HostedApprovalCallback for ApproveAll {
    async fn decide(&self, _ctx: &RunContext, _request: &ToolCallRequest) -> HostedDecision {
        HostedDecision {
            approve: true,
            reason: Some("trusted server".into()),
        }
    }
}

#[tokio::test]
async fn e2e_hosted_callback_answers_without_pausing() {
    let agent = Arc::new(
        Agent::new("assistant")
            .with_hosted_tool(HostedTool::new("docs").with_approval_callback(Arc::new(ApproveAll))),
    );
    let provider = ScriptedProvider::new(vec![
        ModelResponse::new(vec![OutputBlock::HostedApprovalRequest {
            id: "h1".into(),
            server_label: "docs".into(),
            name: "search_docs".into(),
            arguments: r#"{"q":"install"}"#.into(),
        }]),
        ModelResponse::text("Found the install guide."),
    ]);

    let result = Runner::new(provider)
        .run(&agent, "how to install?", RunContext::default())
        .await
        .unwrap();
    assert!(!result.is_interrupted());
    let response = result
        .state
        .generated_items()
        .iter()
        .find_map(|item| match item {
            RunItem::HostedApprovalResponse { response, .. } => Some(response),
            _ => None,
        })
        .unwrap();
    assert_eq!(response.request_id, "h1");
    assert!(response.approve);
    assert_eq!(result.final_output.as_deref(), Some("Found the install guide."));
}

#[tokio::test]
async fn e2e_handoff_switches_agents() {
    let billing = Arc::new(Agent::new("billing"));
    let triage = Arc::new(Agent::new("triage").with_handoff(Handoff::to(billing)));
    let provider = ScriptedProvider::new(vec![
        tools(vec![call("h1", "transfer_to_billing")]),
        ModelResponse::text("Your invoice is attached."),
    ]);

    let result = Runner::new(provider)
        .run(&triage, "where is my invoice?", RunContext::default())
        .await
        .unwrap();
    assert_eq!(result.last_agent, "billing");
    assert_eq!(result.state.current_agent(), "billing");
    assert_eq!(result.final_output.as_deref(), Some("Your invoice is attached."));
}

#[tokio::test]
async fn e2e_nested_agent_tool_pauses_and_resumes_from_snapshot() {
    let lookup = StaticTool::new("lookup", "order 42 shipped");
    let inner = Arc::new(gated(lookup.clone()));
    let inner_provider = ScriptedProvider::new(vec![
        tools(vec![call("n1", "lookup")]),
        ModelResponse::text("It shipped."),
    ]);
    let outer = Arc::new(Agent::new("front_desk").with_tool(Arc::new(
        AgentTool::new(inner, inner_provider.clone()).with_name("ask_orders"),
    )));
    let outer_provider = ScriptedProvider::new(vec![
        ModelResponse::new(vec![OutputBlock::FunctionCall {
            call_id: "c1".into(),
            name: "ask_orders".into(),
            arguments: r#"{"input":"status of 42"}"#.into(),
        }]),
        ModelResponse::text("Order 42 has shipped."),
    ]);
    let runner = Runner::new(outer_provider);

    let paused = runner
        .run(&outer, "where is order 42?", RunContext::default())
        .await
        .unwrap();
    assert_eq!(paused.interruptions.len(), 1);
    assert_eq!(paused.interruptions[0].call_id(), "n1");

    let mut state = RunState::from_json(&paused.state.to_json().unwrap()).unwrap();
    state.approve("n1", false).unwrap();
    let finished = runner.resume(&outer, state).await.unwrap();

    assert_eq!(finished.final_output.as_deref(), Some("Order 42 has shipped."));
    assert_eq!(lookup.runs(), 1);
    assert_eq!(inner_provider.calls(), 2);
    assert!(matches!(
        finished.state.current_step(),
        Some(NextStep::FinalOutput { .. })
    ));
}

// ── Shell ────────────────────────────────────────────────────────────────

fn shell_call(call_id: &str, command: &str) -> ModelResponse {
    ModelResponse::new(vec![OutputBlock::ShellCall {
        call_id: call_id.into(),
        action: ShellAction {
            commands: vec![command.into()],
            timeout_ms: Some(5_000),
            max_output_length: None,
        },
    }])
}

fn gated_shell() -> Arc<Agent> {
    Arc::new(Agent::new("ops").with_shell(ShellTool {
        policy: ToolPolicy::default().needs_approval(),
        ..ShellTool::new(Arc::new(default_shell()))
    }))
}

#[tokio::test]
async fn e2e_rejected_shell_batch_reads_as_failed_commands() {
    let agent = gated_shell();
    let provider = ScriptedProvider::new(vec![
        shell_call("s1", "echo hello"),
        ModelResponse::text("Skipped."),
    ]);
    let runner = Runner::new(provider);

    let mut state = runner
        .run(&agent, "say hello", RunContext::default())
        .await
        .unwrap()
        .state;
    state.reject("s1", false).unwrap();
    let finished = runner.resume(&agent, state).await.unwrap();

    let OutputValue::Shell { outputs } = &results(&finished.state)[0].output else {
        panic!("expected shell output");
    };
    assert_eq!(outputs[0].stderr, "Tool execution was not approved.");
    assert_eq!(outputs[0].outcome, ShellOutcome::Exit { exit_code: 1 });
    assert_eq!(finished.final_output.as_deref(), Some("Skipped."));
}

#[tokio::test]
async fn e2e_approved_shell_batch_runs_locally() {
    let agent = gated_shell();
    let provider = ScriptedProvider::new(vec![
        shell_call("s1", "echo hello"),
        ModelResponse::text("It said hello."),
    ]);
    let runner = Runner::new(provider);

    let mut state = runner
        .run(&agent, "say hello", RunContext::default())
        .await
        .unwrap()
        .state;
    state.approve("s1", false).unwrap();
    let finished = runner.resume(&agent, state).await.unwrap();

    let result = results(&finished.state)[0];
    assert_eq!(result.status, ResultStatus::Completed);
    assert_eq!(result.output.as_text().trim(), "hello");
}

// ── Instrumentation ──────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_every_tool_start_has_an_end() {
    let telemetry = Arc::new(TelemetryEngine::new());
    let agent = Arc::new(
        Agent::new("assistant")
            .with_tool(StaticTool::new("a", "1"))
            .with_tool(StaticTool::new("b", "2")),
    );
    let provider = ScriptedProvider::new(vec![
        tools(vec![call("c1", "a"), call("c2", "b"), call("c3", "missing")]),
        ModelResponse::text("done"),
    ]);

    let result = Runner::new(provider)
        .with_options(RunOptions::default().with_sink(telemetry.clone()))
        .run(&agent, "go", RunContext::default())
        .await
        .unwrap();
    assert_eq!(result.final_output.as_deref(), Some("done"));

    let usage = telemetry.usage_snapshot();
    assert_eq!(usage.tool_executions, 2);
    assert_eq!(usage.open_spans, 0);
    assert_eq!(usage.unpaired_ends, 0);
    assert_eq!(usage.turns, 2);
    assert_eq!(usage.items as usize, result.state.generated_items().len());
}
