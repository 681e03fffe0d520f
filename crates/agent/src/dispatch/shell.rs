//! Shell command batches.

use runwright_core::error::EngineError;
use runwright_core::item::{OutputValue, ShellAction, ShellCommandOutput, ShellOutcome, ToolCallRequest};
use runwright_core::tool::ToolOutput;

use super::{DispatchOutcome, ToolDispatcher};

pub(super) async fn dispatch(
    dispatcher: &ToolDispatcher<'_>,
    call: &ToolCallRequest,
    action: &ShellAction,
) -> Result<DispatchOutcome, EngineError> {
    let Some(shell) = dispatcher.agent.shell.as_ref() else {
        return Ok(dispatcher.missing(call));
    };

    dispatcher
        .run_gated(
            call,
            &shell.policy,
            |message| rejected_output(action, &message),
            || async move {
                let outputs = shell.shell.run(action).await?;
                Ok(ToolOutput {
                    value: OutputValue::Shell { outputs },
                    nested: None,
                })
            },
        )
        .await
}

/// A rejected batch reads as if every command exited 1 with the message on
/// stderr.
fn rejected_output(action: &ShellAction, message: &str) -> OutputValue {
    let rejected = |command: &str| ShellCommandOutput {
        command: command.to_string(),
        stdout: String::new(),
        stderr: message.to_string(),
        outcome: ShellOutcome::Exit { exit_code: 1 },
    };
    let outputs = if action.commands.is_empty() {
        vec![rejected("")]
    } else {
        action.commands.iter().map(|c| rejected(c)).collect()
    };
    OutputValue::Shell { outputs }
}
