//! Workspace editor — applies file-patch operations under a root directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use runwright_core::capability::{APPLY_PATCH_TOOL_NAME, Editor};
use runwright_core::error::ToolError;
use tracing::debug;

use crate::diff;

/// Applies create/update/delete operations to files under `root`.
///
/// Paths are relative to the root; absolute paths and `..` components are
/// refused.
#[derive(Debug, Clone)]
pub struct WorkspaceEditor {
    root: PathBuf,
}

impl WorkspaceEditor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(ToolError::PermissionDenied {
                tool_name: APPLY_PATCH_TOOL_NAME.into(),
                reason: format!("Path '{path}' escapes the workspace"),
            });
        }
        Ok(self.root.join(relative))
    }
}

fn failed(reason: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: APPLY_PATCH_TOOL_NAME.into(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl Editor for WorkspaceEditor {
    async fn create_file(&self, path: &str, diff: &str) -> Result<Option<String>, ToolError> {
        let target = self.resolve(path)?;
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(failed(format!("File '{path}' already exists")));
        }
        let content = diff::parse_create(diff).map_err(failed)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(failed)?;
        }
        tokio::fs::write(&target, &content).await.map_err(failed)?;

        debug!(path, bytes = content.len(), "Created file");
        Ok(Some(format!("Created file: {path}")))
    }

    async fn update_file(&self, path: &str, diff: &str) -> Result<Option<String>, ToolError> {
        let target = self.resolve(path)?;
        let original = tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| failed(format!("Cannot read '{path}': {e}")))?;

        let updated = diff::apply_diff(path, &original, diff).map_err(failed)?;
        tokio::fs::write(&target, &updated).await.map_err(failed)?;

        debug!(path, "Updated file");
        Ok(Some(format!("Updated file: {path}")))
    }

    async fn delete_file(&self, path: &str) -> Result<Option<String>, ToolError> {
        let target = self.resolve(path)?;
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| failed(format!("Cannot delete '{path}': {e}")))?;

        debug!(path, "Deleted file");
        Ok(Some(format!("Deleted file: {path}")))
    }
}
