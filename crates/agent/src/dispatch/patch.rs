//! File patch operations.

use runwright_core::error::EngineError;
use runwright_core::item::{OutputValue, PatchOperation, ToolCallRequest};
use runwright_core::tool::ToolOutput;

use super::{DispatchOutcome, ToolDispatcher};

pub(super) async fn dispatch(
    dispatcher: &ToolDispatcher<'_>,
    call: &ToolCallRequest,
    operation: &PatchOperation,
) -> Result<DispatchOutcome, EngineError> {
    let Some(apply_patch) = dispatcher.agent.apply_patch.as_ref() else {
        return Ok(dispatcher.missing(call));
    };

    dispatcher
        .run_gated(call, &apply_patch.policy, OutputValue::text, || async move {
            let message = apply_patch.editor.apply(operation).await?;
            Ok(ToolOutput::text(message.unwrap_or_default()))
        })
        .await
}
