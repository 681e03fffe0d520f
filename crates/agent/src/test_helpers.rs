//! Shared test helpers for engine tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use runwright_core::capability::{Computer, Editor, Shell};
use runwright_core::error::{ProviderError, ToolError};
use runwright_core::event::{DomainEvent, InstrumentationSink, ToolEventOutcome};
use runwright_core::item::{ComputerAction, ShellAction, ShellCommandOutput, ShellOutcome};
use runwright_core::provider::{ModelProvider, ModelRequest, ModelResponse, OutputBlock};
use runwright_core::tool::{Tool, ToolContext, ToolOutput};

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `respond` returns the next response in the queue and
/// records the request. Running out of responses is a provider error.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ModelResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![ModelResponse::text(text)])
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn respond(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        let responses = self.responses.lock().unwrap();
        let index = requests.len() - 1;
        responses.get(index).cloned().ok_or_else(|| {
            ProviderError::InvalidResponse(format!(
                "no scripted response for call #{index} (have {})",
                responses.len()
            ))
        })
    }
}

/// Helper to create a function call block.
pub fn function_call(call_id: &str, name: &str, arguments: &str) -> OutputBlock {
    OutputBlock::FunctionCall {
        call_id: call_id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }
}

/// Returns its arguments as text.
pub struct EchoTool {
    name: String,
}

impl EchoTool {
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echo the arguments back"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        _ctx: &ToolContext<'_>,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(arguments.to_string()))
    }
}

/// Counts executions; optionally fails every time.
pub struct CountingTool {
    name: String,
    fail: bool,
    pub calls: AtomicUsize,
}

impl CountingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Count invocations"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        _arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: "boom".into(),
            });
        }
        Ok(ToolOutput::text(format!("{}#{n} for {}", self.name, ctx.call.call_id)))
    }
}

/// Sleeps before answering.
pub struct SlowTool {
    name: String,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Take a while"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        _ctx: &ToolContext<'_>,
        _arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(ToolOutput::text("finally"))
    }
}

/// A screen that records actions and always shows the same picture.
#[derive(Default)]
pub struct FakeComputer {
    pub actions: Mutex<Vec<ComputerAction>>,
}

#[async_trait]
impl Computer for FakeComputer {
    async fn perform(&self, action: &ComputerAction) -> Result<(), ToolError> {
        self.actions.lock().unwrap().push(action.clone());
        Ok(())
    }

    async fn screenshot(&self) -> Result<String, ToolError> {
        Ok("iVBORw0KGgo".into())
    }
}

/// Pretends every command printed itself and exited 0.
#[derive(Default)]
pub struct EchoShell {
    pub runs: AtomicUsize,
}

#[async_trait]
impl Shell for EchoShell {
    async fn run(&self, action: &ShellAction) -> Result<Vec<ShellCommandOutput>, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(action
            .commands
            .iter()
            .map(|command| ShellCommandOutput {
                command: command.clone(),
                stdout: command.clone(),
                stderr: String::new(),
                outcome: ShellOutcome::Exit { exit_code: 0 },
            })
            .collect())
    }
}

/// Records patch operations as `"<op> <path>"` without touching disk.
#[derive(Default)]
pub struct MemoryEditor {
    pub applied: Mutex<Vec<String>>,
}

impl MemoryEditor {
    fn record(&self, op: &str, path: &str) -> Result<Option<String>, ToolError> {
        let entry = format!("{op} {path}");
        self.applied.lock().unwrap().push(entry.clone());
        Ok(Some(entry))
    }
}

#[async_trait]
impl Editor for MemoryEditor {
    async fn create_file(&self, path: &str, _diff: &str) -> Result<Option<String>, ToolError> {
        self.record("created", path)
    }

    async fn update_file(&self, path: &str, _diff: &str) -> Result<Option<String>, ToolError> {
        self.record("updated", path)
    }

    async fn delete_file(&self, path: &str) -> Result<Option<String>, ToolError> {
        self.record("deleted", path)
    }
}

/// Keeps every event it sees.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `(call_id, outcome)` of every finished tool event, in order.
    pub fn tool_outcomes(&self) -> Vec<(String, ToolEventOutcome)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                DomainEvent::ToolFinished {
                    call_id, outcome, ..
                } => Some((call_id, outcome)),
                _ => None,
            })
            .collect()
    }
}

impl InstrumentationSink for RecordingSink {
    fn record(&self, event: DomainEvent) {
        self.events.lock().unwrap().push(event);
    }
}
