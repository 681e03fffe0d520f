//! Computer actions: perform the action, then report a screenshot.

use runwright_core::error::EngineError;
use runwright_core::item::{ComputerAction, OutputValue, ToolCallRequest};
use runwright_core::tool::ToolOutput;

use super::{DispatchOutcome, ToolDispatcher};

pub(super) async fn dispatch(
    dispatcher: &ToolDispatcher<'_>,
    call: &ToolCallRequest,
    action: &ComputerAction,
) -> Result<DispatchOutcome, EngineError> {
    let Some(computer) = dispatcher.agent.computer.as_ref() else {
        return Ok(dispatcher.missing(call));
    };

    dispatcher
        .run_gated(call, &computer.policy, OutputValue::text, || async move {
            computer.computer.perform(action).await?;
            let screenshot = computer.computer.screenshot().await?;
            Ok(ToolOutput {
                value: OutputValue::Image {
                    data_url: as_data_url(screenshot),
                },
                nested: None,
            })
        })
        .await
}

fn as_data_url(screenshot: String) -> String {
    if screenshot.starts_with("data:") {
        screenshot
    } else {
        format!("data:image/png;base64,{screenshot}")
    }
}
