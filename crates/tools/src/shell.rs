//! Local shell executor — run command batches on the host.
//!
//! Supports command allowlisting, a working directory, per-command timeout
//! and output truncation.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use runwright_core::capability::{SHELL_TOOL_NAME, Shell};
use runwright_core::error::ToolError;
use runwright_core::item::{ShellAction, ShellCommandOutput, ShellOutcome};
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs each command of a batch through `sh -c` (`cmd /C` on Windows).
#[derive(Debug, Clone, Default)]
pub struct LocalShell {
    /// If non-empty, only these base commands are allowed.
    allowed_commands: Vec<String>,
    working_dir: Option<PathBuf>,
    default_timeout: Option<Duration>,
}

impl LocalShell {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        Self {
            allowed_commands,
            ..Self::default()
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Timeout for commands whose action does not set one.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true;
        }

        let base_cmd = command.split_whitespace().next().unwrap_or("").trim();
        self.allowed_commands.iter().any(|a| a == base_cmd)
    }

    async fn run_one(
        &self,
        command: &str,
        timeout: Option<Duration>,
        max_output_length: Option<usize>,
    ) -> Result<ShellCommandOutput, ToolError> {
        debug!(command = %command, "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        };
        cmd.kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(output) => output,
                Err(_) => {
                    warn!(command = %command, timeout_ms = limit.as_millis() as u64, "Command timed out");
                    return Ok(ShellCommandOutput {
                        command: command.to_string(),
                        stdout: String::new(),
                        stderr: String::new(),
                        outcome: ShellOutcome::Timeout,
                    });
                }
            },
            None => cmd.output().await,
        };

        let output = output.map_err(|e| ToolError::ExecutionFailed {
            tool_name: SHELL_TOOL_NAME.into(),
            reason: e.to_string(),
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            warn!(command = %command, exit_code, "Command failed");
        }

        Ok(ShellCommandOutput {
            command: command.to_string(),
            stdout: truncate(String::from_utf8_lossy(&output.stdout).into_owned(), max_output_length),
            stderr: truncate(String::from_utf8_lossy(&output.stderr).into_owned(), max_output_length),
            outcome: ShellOutcome::Exit { exit_code },
        })
    }
}

#[async_trait]
impl Shell for LocalShell {
    async fn run(&self, action: &ShellAction) -> Result<Vec<ShellCommandOutput>, ToolError> {
        if let Some(blocked) = action.commands.iter().find(|c| !self.is_command_allowed(c)) {
            return Err(ToolError::PermissionDenied {
                tool_name: SHELL_TOOL_NAME.into(),
                reason: format!(
                    "Command '{}' not in allowlist",
                    blocked.split_whitespace().next().unwrap_or("")
                ),
            });
        }

        let timeout = action
            .timeout_ms
            .map(Duration::from_millis)
            .or(self.default_timeout);

        let mut outputs = Vec::with_capacity(action.commands.len());
        for command in &action.commands {
            outputs.push(
                self.run_one(command, timeout, action.max_output_length)
                    .await?,
            );
        }
        Ok(outputs)
    }
}

/// Cut `text` to at most `max` bytes on a char boundary.
fn truncate(mut text: String, max: Option<usize>) -> String {
    if let Some(max) = max
        && text.len() > max
    {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(commands: &[&str]) -> ShellAction {
        ShellAction {
            commands: commands.iter().map(|c| c.to_string()).collect(),
            timeout_ms: None,
            max_output_length: None,
        }
    }

    #[test]
    fn allowlist_check() {
        let shell = LocalShell::new(vec!["ls".into(), "cat".into(), "git".into()]);
        assert!(shell.is_command_allowed("ls -la"));
        assert!(shell.is_command_allowed("git status"));
        assert!(!shell.is_command_allowed("rm -rf /"));
    }

    #[test]
    fn empty_allowlist_allows_all() {
        let shell = LocalShell::new(vec![]);
        assert!(shell.is_command_allowed("anything goes"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate("héllo".into(), Some(2)), "h");
        assert_eq!(truncate("hello".into(), Some(10)), "hello");
        assert_eq!(truncate("hello".into(), None), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_each_command_in_order() {
        let shell = LocalShell::new(vec![]);
        let outputs = shell.run(&action(&["echo one", "echo two >&2; exit 3"])).await.unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].stdout.trim(), "one");
        assert_eq!(outputs[0].outcome, ShellOutcome::Exit { exit_code: 0 });
        assert_eq!(outputs[1].stderr.trim(), "two");
        assert_eq!(outputs[1].outcome, ShellOutcome::Exit { exit_code: 3 });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let shell = LocalShell::new(vec![]);
        let mut slow = action(&["sleep 5"]);
        slow.timeout_ms = Some(50);
        let outputs = shell.run(&slow).await.unwrap();
        assert_eq!(outputs[0].outcome, ShellOutcome::Timeout);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_is_truncated() {
        let shell = LocalShell::new(vec![]);
        let mut long = action(&["printf 'abcdefgh'"]);
        long.max_output_length = Some(3);
        let outputs = shell.run(&long).await.unwrap();
        assert_eq!(outputs[0].stdout, "abc");
    }

    #[tokio::test]
    async fn blocked_command_fails_the_whole_batch() {
        let shell = LocalShell::new(vec!["echo".into()]);
        let result = shell.run(&action(&["echo ok", "rm -rf /"])).await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn working_dir_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let shell = LocalShell::new(vec![]).with_working_dir(dir.path());
        let outputs = shell.run(&action(&["pwd"])).await.unwrap();
        let reported = std::fs::canonicalize(outputs[0].stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }
}
