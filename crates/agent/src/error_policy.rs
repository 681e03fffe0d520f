//! Run error policy — lets a host turn selected fatal errors into a final
//! output.
//!
//! Only [`EngineError::MaxTurnsExceeded`] can be intercepted. Every other
//! fatal condition propagates unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use runwright_core::context::RunContext;
use runwright_core::error::EngineError;
use runwright_core::item::RunItem;
use runwright_core::message::Message;
use runwright_core::provider::ModelResponse;

use crate::agent::Agent;
use crate::resolver::validate_structured;
use crate::state::RunState;

/// What a handler sees about the failed run.
#[derive(Debug, Clone)]
pub struct RunErrorData {
    pub input: Vec<RunItem>,
    pub new_items: Vec<RunItem>,
    pub history: Vec<RunItem>,
    pub raw_responses: Vec<ModelResponse>,
    pub last_agent: String,
}

impl RunErrorData {
    fn from_state(state: &RunState) -> Self {
        Self {
            input: state.original_input.clone(),
            new_items: state.generated_items.clone(),
            history: state.history(),
            raw_responses: state.model_responses.clone(),
            last_agent: state.current_agent.clone(),
        }
    }
}

/// A handler's replacement for the failed run's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorHandlerResult {
    pub final_output: String,
    /// Append the output to history as an assistant message.
    pub include_in_history: bool,
}

impl ErrorHandlerResult {
    pub fn new(final_output: impl Into<String>) -> Self {
        Self {
            final_output: final_output.into(),
            include_in_history: true,
        }
    }

    pub fn without_history(mut self) -> Self {
        self.include_in_history = false;
        self
    }
}

/// Handles a run that used up its turn budget. `None` lets the error
/// propagate.
#[async_trait]
pub trait MaxTurnsHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &RunContext,
        error: &EngineError,
        data: &RunErrorData,
    ) -> Option<ErrorHandlerResult>;
}

struct FnMaxTurnsHandler<F>(F);

#[async_trait]
impl<F> MaxTurnsHandler for FnMaxTurnsHandler<F>
where
    F: Fn(&RunErrorData) -> Option<ErrorHandlerResult> + Send + Sync,
{
    async fn handle(
        &self,
        _ctx: &RunContext,
        _error: &EngineError,
        data: &RunErrorData,
    ) -> Option<ErrorHandlerResult> {
        (self.0)(data)
    }
}

/// Wrap a closure as a [`MaxTurnsHandler`].
pub fn max_turns_handler<F>(handler: F) -> Arc<dyn MaxTurnsHandler>
where
    F: Fn(&RunErrorData) -> Option<ErrorHandlerResult> + Send + Sync + 'static,
{
    Arc::new(FnMaxTurnsHandler(handler))
}

/// Registered run error handlers.
#[derive(Clone, Default)]
pub struct RunErrorHandlers {
    pub max_turns: Option<Arc<dyn MaxTurnsHandler>>,
}

impl RunErrorHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_turns(mut self, handler: Arc<dyn MaxTurnsHandler>) -> Self {
        self.max_turns = Some(handler);
        self
    }

    /// Try to recover from `error`. `Ok(Some(output))` means the run should
    /// finish with `output`; `Ok(None)` means the error stands.
    pub(crate) async fn recover(
        &self,
        agent: &Agent,
        state: &mut RunState,
        error: &EngineError,
    ) -> Result<Option<String>, EngineError> {
        if !matches!(error, EngineError::MaxTurnsExceeded { .. }) {
            return Ok(None);
        }
        let Some(handler) = &self.max_turns else {
            return Ok(None);
        };

        let data = RunErrorData::from_state(state);
        let Some(result) = handler.handle(&state.context, error, &data).await else {
            warn!(agent = %agent.name, "Max turns handler declined");
            return Ok(None);
        };

        if let Some(schema) = agent.output_schema() {
            validate_structured(agent, schema, &result.final_output).map_err(|e| {
                EngineError::UserError(format!("Error handler returned invalid final output: {e}"))
            })?;
        }
        if result.include_in_history {
            state.push(RunItem::Message {
                agent: agent.name.clone(),
                message: Message::from_error_handler(result.final_output.clone()),
            });
        }
        state.settle();
        info!(agent = %agent.name, "Max turns handler produced the final output");
        Ok(Some(result.final_output))
    }
}

impl std::fmt::Debug for RunErrorHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunErrorHandlers")
            .field("max_turns", &self.max_turns.is_some())
            .finish()
    }
}
