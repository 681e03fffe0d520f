//! Function tools.

use std::sync::Arc;

use runwright_core::error::{EngineError, ToolError};
use runwright_core::item::{OutputValue, ToolCallRequest};
use runwright_core::tool::ToolContext;

use super::{DispatchOutcome, ToolDispatcher};

pub(super) async fn dispatch(
    dispatcher: &ToolDispatcher<'_>,
    call: &ToolCallRequest,
    arguments: &str,
    resume_state: Option<&serde_json::Value>,
) -> Result<DispatchOutcome, EngineError> {
    let Some(registered) = dispatcher.agent.tools.get(&call.tool_name) else {
        return Ok(dispatcher.missing(call));
    };
    let tool = Arc::clone(&registered.tool);

    dispatcher
        .run_gated(call, &registered.policy, OutputValue::text, || async move {
            let arguments = parse_arguments(arguments)?;
            let ctx = ToolContext {
                run: dispatcher.ctx,
                agent: &dispatcher.agent.name,
                call,
                resume_state,
            };
            tool.execute(&ctx, arguments).await
        })
        .await
}

/// Parse the model's raw argument string. An empty string means no
/// arguments.
fn parse_arguments(raw: &str) -> Result<serde_json::Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
