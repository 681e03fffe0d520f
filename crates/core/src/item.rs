//! Generated items — everything a run appends to its history.
//!
//! Every item is a variant of [`RunItem`]; the engine matches on it
//! exhaustively. The call id is the correlation key between a
//! [`ToolCallRequest`], its [`ApprovalRecord`] and its [`ToolCallResult`].

use serde::{Deserialize, Serialize};

use crate::approval::ApprovalStatus;
use crate::message::Message;

/// The category of a tool call. Each category has its own payload shape and
/// its own dispatcher path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Function,
    Computer,
    Shell,
    ApplyPatch,
    Hosted,
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Function => "function",
            Self::Computer => "computer",
            Self::Shell => "shell",
            Self::ApplyPatch => "apply_patch",
            Self::Hosted => "hosted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Wheel,
    Back,
    Forward,
}

/// A computer-use action requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComputerAction {
    Click { x: i32, y: i32, button: MouseButton },
    DoubleClick { x: i32, y: i32 },
    Scroll { x: i32, y: i32, scroll_x: i32, scroll_y: i32 },
    Type { text: String },
    Keypress { keys: Vec<String> },
    Move { x: i32, y: i32 },
    Drag { path: Vec<(i32, i32)> },
    Screenshot,
    Wait,
}

/// A batch of shell commands requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellAction {
    pub commands: Vec<String>,

    /// Per-command timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Cap on captured stdout/stderr per command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_length: Option<usize>,
}

/// A file-patch operation. Diffs use the V4A hunk format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatchOperation {
    CreateFile { path: String, diff: String },
    UpdateFile { path: String, diff: String },
    DeleteFile { path: String },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            Self::CreateFile { path, .. }
            | Self::UpdateFile { path, .. }
            | Self::DeleteFile { path } => path,
        }
    }
}

/// Category-specific payload of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum CallPayload {
    /// Raw JSON argument string, exactly as the model produced it.
    Function { arguments: String },
    Computer { action: ComputerAction },
    Shell { action: ShellAction },
    ApplyPatch { operation: PatchOperation },
    /// An approval request raised by a server-managed tool.
    Hosted { server_label: String, arguments: String },
}

impl CallPayload {
    pub fn category(&self) -> ToolCategory {
        match self {
            Self::Function { .. } => ToolCategory::Function,
            Self::Computer { .. } => ToolCategory::Computer,
            Self::Shell { .. } => ToolCategory::Shell,
            Self::ApplyPatch { .. } => ToolCategory::ApplyPatch,
            Self::Hosted { .. } => ToolCategory::Hosted,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    #[serde(flatten)]
    pub payload: CallPayload,
}

impl ToolCallRequest {
    pub fn function(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            payload: CallPayload::Function {
                arguments: arguments.into(),
            },
        }
    }

    pub fn category(&self) -> ToolCategory {
        self.payload.category()
    }

    /// The arguments as text, for guardrails and approval prompts.
    pub fn arguments_text(&self) -> String {
        match &self.payload {
            CallPayload::Function { arguments } | CallPayload::Hosted { arguments, .. } => {
                arguments.clone()
            }
            CallPayload::Computer { action } => serde_json::to_string(action).unwrap_or_default(),
            CallPayload::Shell { action } => action.commands.join("\n"),
            CallPayload::ApplyPatch { operation } => {
                serde_json::to_string(operation).unwrap_or_default()
            }
        }
    }
}

/// How one shell command ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShellOutcome {
    Exit { exit_code: i32 },
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellCommandOutput {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub outcome: ShellOutcome,
}

/// The value a tool produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputValue {
    Text { text: String },
    Json { value: serde_json::Value },
    Image { data_url: String },
    Shell { outputs: Vec<ShellCommandOutput> },
}

impl OutputValue {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Render the value as the plain text fed back to the model or used as a
    /// final output.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Json { value } => match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            Self::Image { data_url } => data_url.clone(),
            Self::Shell { outputs } => outputs
                .iter()
                .map(|o| {
                    let mut text = o.stdout.clone();
                    if !o.stderr.is_empty() {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(&o.stderr);
                    }
                    text
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Failed,
}

/// The result recorded for a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    pub category: ToolCategory,
    pub output: OutputValue,
    pub status: ResultStatus,
}

impl ToolCallResult {
    pub fn completed(call: &ToolCallRequest, output: OutputValue) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            category: call.category(),
            output,
            status: ResultStatus::Completed,
        }
    }

    pub fn failed(call: &ToolCallRequest, output: OutputValue) -> Self {
        Self {
            status: ResultStatus::Failed,
            ..Self::completed(call, output)
        }
    }
}

/// An approval placeholder or decision for one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub call: ToolCallRequest,
    pub status: ApprovalStatus,

    /// Set when a nested agent run raised this approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<NestedOwner>,
}

/// The outer call whose nested run is paused, with the nested run's
/// serialized state so it can be resumed in a later process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedOwner {
    pub call: ToolCallRequest,
    pub state: serde_json::Value,
}

impl ApprovalRecord {
    pub fn pending(call: ToolCallRequest) -> Self {
        Self {
            call,
            status: ApprovalStatus::Pending,
            owner: None,
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.call.tool_name
    }

    pub fn call_id(&self) -> &str {
        &self.call.call_id
    }
}

/// A decision sent back to a server-managed tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostedApprovalResponse {
    pub request_id: String,
    pub approve: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStage {
    /// The model asked for the handoff.
    Requested,
    /// Control moved to the target agent.
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub call_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub stage: HandoffStage,
}

/// The kind tag of a [`RunItem`], used for instrumentation and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Message,
    Reasoning,
    ToolCall,
    ToolResult,
    Approval,
    HostedApprovalResponse,
    Handoff,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Reasoning => "reasoning",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Approval => "approval",
            Self::HostedApprovalResponse => "hosted_approval_response",
            Self::Handoff => "handoff",
        }
    }
}

/// One generated item, tagged with the agent that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunItem {
    Message {
        agent: String,
        message: Message,
    },
    Reasoning {
        agent: String,
        text: String,
    },
    ToolCall {
        agent: String,
        call: ToolCallRequest,
    },
    ToolResult {
        agent: String,
        result: ToolCallResult,
    },
    Approval {
        agent: String,
        record: ApprovalRecord,
    },
    HostedApprovalResponse {
        agent: String,
        response: HostedApprovalResponse,
    },
    Handoff {
        agent: String,
        record: HandoffRecord,
    },
}

impl RunItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Message { .. } => ItemKind::Message,
            Self::Reasoning { .. } => ItemKind::Reasoning,
            Self::ToolCall { .. } => ItemKind::ToolCall,
            Self::ToolResult { .. } => ItemKind::ToolResult,
            Self::Approval { .. } => ItemKind::Approval,
            Self::HostedApprovalResponse { .. } => ItemKind::HostedApprovalResponse,
            Self::Handoff { .. } => ItemKind::Handoff,
        }
    }

    pub fn agent(&self) -> &str {
        match self {
            Self::Message { agent, .. }
            | Self::Reasoning { agent, .. }
            | Self::ToolCall { agent, .. }
            | Self::ToolResult { agent, .. }
            | Self::Approval { agent, .. }
            | Self::HostedApprovalResponse { agent, .. }
            | Self::Handoff { agent, .. } => agent,
        }
    }

    /// Approval records are engine bookkeeping; everything else is part of
    /// the history the model sees.
    pub fn is_model_visible(&self) -> bool {
        !matches!(self, Self::Approval { .. })
    }

    /// Whether this item is the result for the `category` call `call_id`.
    /// Call ids are only unique within one category.
    pub fn is_result_for(&self, category: ToolCategory, call_id: &str) -> bool {
        match self {
            Self::ToolResult { result, .. } => {
                result.category == category && result.call_id == call_id
            }
            Self::HostedApprovalResponse { response, .. } => {
                category == ToolCategory::Hosted && response.request_id == call_id
            }
            _ => false,
        }
    }

    pub fn as_pending_approval(&self) -> Option<&ApprovalRecord> {
        match self {
            Self::Approval { record, .. } if record.status == ApprovalStatus::Pending => {
                Some(record)
            }
            _ => None,
        }
    }

    /// Text of an assistant message, if this is one.
    pub fn assistant_text(&self) -> Option<&str> {
        match self {
            Self::Message { message, .. } if message.role == crate::message::Role::Assistant => {
                Some(&message.content)
            }
            _ => None,
        }
    }
}
