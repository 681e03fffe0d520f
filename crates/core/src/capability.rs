//! Non-function capabilities: computer use, shell, file patching, and
//! server-managed (hosted) tools.
//!
//! Each local capability pairs an executor trait object with the same
//! [`ToolPolicy`] function tools use, so the dispatcher can run all of them
//! through one approval/guardrail/timeout skeleton.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::ToolError;
use crate::item::{ComputerAction, PatchOperation, ShellAction, ShellCommandOutput, ToolCallRequest};
use crate::tool::ToolPolicy;

pub const COMPUTER_TOOL_NAME: &str = "computer";
pub const SHELL_TOOL_NAME: &str = "shell";
pub const APPLY_PATCH_TOOL_NAME: &str = "apply_patch";

/// A screen the model can drive.
#[async_trait]
pub trait Computer: Send + Sync {
    async fn perform(&self, action: &ComputerAction) -> Result<(), ToolError>;

    /// Base64-encoded PNG of the current screen.
    async fn screenshot(&self) -> Result<String, ToolError>;
}

/// Runs shell command batches.
#[async_trait]
pub trait Shell: Send + Sync {
    async fn run(&self, action: &ShellAction) -> Result<Vec<ShellCommandOutput>, ToolError>;
}

/// Applies file-patch operations.
#[async_trait]
pub trait Editor: Send + Sync {
    async fn create_file(&self, path: &str, diff: &str) -> Result<Option<String>, ToolError>;

    async fn update_file(&self, path: &str, diff: &str) -> Result<Option<String>, ToolError>;

    async fn delete_file(&self, path: &str) -> Result<Option<String>, ToolError>;

    async fn apply(&self, operation: &PatchOperation) -> Result<Option<String>, ToolError> {
        match operation {
            PatchOperation::CreateFile { path, diff } => self.create_file(path, diff).await,
            PatchOperation::UpdateFile { path, diff } => self.update_file(path, diff).await,
            PatchOperation::DeleteFile { path } => self.delete_file(path).await,
        }
    }
}

#[derive(Clone)]
pub struct ComputerTool {
    pub computer: Arc<dyn Computer>,
    pub policy: ToolPolicy,
}

#[derive(Clone)]
pub struct ShellTool {
    pub shell: Arc<dyn Shell>,
    pub policy: ToolPolicy,
}

#[derive(Clone)]
pub struct ApplyPatchTool {
    pub editor: Arc<dyn Editor>,
    pub policy: ToolPolicy,
}

impl ComputerTool {
    pub fn new(computer: Arc<dyn Computer>) -> Self {
        Self {
            computer,
            policy: ToolPolicy::default(),
        }
    }
}

impl ShellTool {
    pub fn new(shell: Arc<dyn Shell>) -> Self {
        Self {
            shell,
            policy: ToolPolicy::default(),
        }
    }
}

impl ApplyPatchTool {
    pub fn new(editor: Arc<dyn Editor>) -> Self {
        Self {
            editor,
            policy: ToolPolicy::default(),
        }
    }
}

/// Decision returned by a synchronous hosted-approval callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedDecision {
    pub approve: bool,
    pub reason: Option<String>,
}

/// Decides hosted-tool approval requests on the spot, without pausing.
#[async_trait]
pub trait HostedApprovalCallback: Send + Sync {
    async fn decide(&self, ctx: &RunContext, request: &ToolCallRequest) -> HostedDecision;
}

/// A tool server whose tools run remotely. Only its approval requests pass
/// through the engine.
#[derive(Clone)]
pub struct HostedTool {
    pub server_label: String,
    pub on_approval: Option<Arc<dyn HostedApprovalCallback>>,
}

impl HostedTool {
    pub fn new(server_label: impl Into<String>) -> Self {
        Self {
            server_label: server_label.into(),
            on_approval: None,
        }
    }

    pub fn with_approval_callback(mut self, callback: Arc<dyn HostedApprovalCallback>) -> Self {
        self.on_approval = Some(callback);
        self
    }
}

impl std::fmt::Debug for HostedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedTool")
            .field("server_label", &self.server_label)
            .field("on_approval", &self.on_approval.is_some())
            .finish()
    }
}
