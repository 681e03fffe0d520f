//! Provider trait — the abstraction over LLM backends.
//!
//! A provider turns a [`ModelRequest`] into a [`ModelResponse`]: an ordered
//! list of normalized output blocks. Wire formats are the adapter's concern;
//! the engine only sees these shapes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::item::{ComputerAction, PatchOperation, RunItem, ShellAction};

/// How the model should pick tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Required,
    None,
    /// Force a specific tool by name.
    Named(String),
}

impl ToolChoice {
    /// Whether this choice forces the model to call a tool.
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::Required | Self::Named(_))
    }
}

/// Per-agent model settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Everything the provider needs for one model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Name of the agent making the call
    pub agent: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Model-visible history
    pub input: Vec<RunItem>,

    /// Function tools plus handoffs, exposed as callable functions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// JSON schema the final output must satisfy, for structured agents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,

    #[serde(default)]
    pub settings: ModelSettings,
}

/// A content part of an output message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    OutputText { text: String },
    Refusal { refusal: String },
}

/// One block of raw model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputBlock {
    Message {
        content: Vec<ContentPart>,
    },
    Reasoning {
        text: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    ComputerCall {
        call_id: String,
        action: ComputerAction,
    },
    ShellCall {
        call_id: String,
        action: ShellAction,
    },
    ApplyPatchCall {
        call_id: String,
        operation: PatchOperation,
    },
    /// A server-managed tool asking whether it may run.
    HostedApprovalRequest {
        id: String,
        server_label: String,
        name: String,
        arguments: String,
    },
}

impl OutputBlock {
    /// Text of a message block: its output text parts, concatenated.
    pub fn message_text(&self) -> Option<String> {
        match self {
            Self::Message { content } => Some(
                content
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::OutputText { text } => Some(text.as_str()),
                        ContentPart::Refusal { .. } => None,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub output: Vec<OutputBlock>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl ModelResponse {
    pub fn new(output: Vec<OutputBlock>) -> Self {
        Self {
            output,
            usage: None,
            response_id: None,
        }
    }

    /// A response consisting of a single text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![OutputBlock::Message {
            content: vec![ContentPart::OutputText { text: text.into() }],
        }])
    }
}

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The runner calls `respond()`
/// without knowing which provider is being used.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn respond(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError>;
}
