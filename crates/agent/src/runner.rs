//! The host loop — drives turns until a final output, a pause or an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use runwright_config::EngineConfig;
use runwright_core::context::RunContext;
use runwright_core::error::{EngineError, ToolError};
use runwright_core::event::{DomainEvent, InstrumentationSink};
use runwright_core::guardrail::GuardrailVerdict;
use runwright_core::item::{ApprovalRecord, RunItem, ToolCallRequest};
use runwright_core::provider::{ModelProvider, ModelRequest, ToolChoice};
use runwright_core::tool::{ErrorBehavior, TimeoutBehavior};

use crate::agent::Agent;
use crate::classifier::classify;
use crate::dispatch::DispatchSettings;
use crate::error::RunError;
use crate::error_policy::RunErrorHandlers;
use crate::resolver::TurnResolver;
use crate::resumer::InterruptionResumer;
use crate::state::{NextStep, RunState};

/// Default turn budget.
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// Options shared by every run of a [`Runner`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_turns: u32,
    pub dispatch: DispatchSettings,
    pub error_handlers: RunErrorHandlers,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            dispatch: DispatchSettings::default(),
            error_handlers: RunErrorHandlers::default(),
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        let fallback = config.tools.default_policy();
        Self {
            max_turns: config.max_turns,
            dispatch: DispatchSettings {
                parallel: config.parallel_tool_calls,
                rejection_message: config.tools.rejection_message.clone(),
                fallback_timeout: fallback
                    .timeout
                    .map(|limit| (limit, fallback.timeout_behavior)),
                fallback_error_behavior: fallback.error_behavior.unwrap_or_default(),
                ..DispatchSettings::default()
            },
            error_handlers: RunErrorHandlers::default(),
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.dispatch.parallel = parallel;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn InstrumentationSink>) -> Self {
        self.dispatch.sink = Some(sink);
        self
    }

    pub fn with_error_handlers(mut self, handlers: RunErrorHandlers) -> Self {
        self.error_handlers = handlers;
        self
    }

    pub fn with_rejection_formatter<F>(mut self, format: F) -> Self
    where
        F: Fn(&ToolCallRequest) -> String + Send + Sync + 'static,
    {
        self.dispatch.rejection_formatter = Some(Arc::new(format));
        self
    }

    pub fn with_error_formatter<F>(mut self, format: F) -> Self
    where
        F: Fn(&ToolCallRequest, &ToolError) -> String + Send + Sync + 'static,
    {
        self.dispatch.error_formatter = Some(Arc::new(format));
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration, behavior: TimeoutBehavior) -> Self {
        self.dispatch.fallback_timeout = Some((timeout, behavior));
        self
    }

    pub fn with_default_error_behavior(mut self, behavior: ErrorBehavior) -> Self {
        self.dispatch.fallback_error_behavior = behavior;
        self
    }
}

/// How a run ended, short of a fatal error.
#[derive(Debug)]
pub struct RunResult {
    pub final_output: Option<String>,
    pub last_agent: String,
    pub state: RunState,
    /// Records to decide before calling [`Runner::resume`].
    pub interruptions: Vec<ApprovalRecord>,
}

impl RunResult {
    pub fn is_interrupted(&self) -> bool {
        !self.interruptions.is_empty()
    }
}

pub struct Runner {
    provider: Arc<dyn ModelProvider>,
    options: RunOptions,
}

impl Runner {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Start a run from a text prompt.
    pub async fn run(
        &self,
        agent: &Arc<Agent>,
        input: &str,
        ctx: RunContext,
    ) -> Result<RunResult, RunError> {
        let items = RunState::user_input(&agent.name, input);
        self.run_items(agent, items, ctx).await
    }

    /// Start a run from prepared input items.
    pub async fn run_items(
        &self,
        agent: &Arc<Agent>,
        input: Vec<RunItem>,
        ctx: RunContext,
    ) -> Result<RunResult, RunError> {
        let state = RunState::new(&agent.name, input, ctx, self.options.max_turns);
        self.drive(agent, state).await
    }

    /// Continue a paused run. `root` must reach the state's current agent
    /// through handoffs.
    pub async fn resume(&self, root: &Arc<Agent>, state: RunState) -> Result<RunResult, RunError> {
        self.drive(root, state).await
    }

    async fn drive(&self, root: &Arc<Agent>, mut state: RunState) -> Result<RunResult, RunError> {
        let Some(mut agent) = root.find_agent(&state.current_agent) else {
            let reason = format!(
                "Agent '{}' is not reachable from '{}'",
                state.current_agent, root.name
            );
            return Err(self.fail(EngineError::UserError(reason), state));
        };
        info!(run_id = %state.id, agent = %agent.name, turn = state.current_turn, "Driving run");

        if state.is_interrupted() {
            let resumed = InterruptionResumer::new(&agent, &self.options.dispatch)
                .resume(&mut state)
                .await;
            if let Err(e) = resumed {
                return Err(self.fail(e, state));
            }
            self.emit_new_items(&mut state);
        }

        loop {
            let step = state.current_step.clone().unwrap_or(NextStep::RunAgain);
            match step {
                NextStep::FinalOutput { output } => {
                    let output = match self.check_final_output(&agent, &state.context, output).await {
                        Ok(output) => output,
                        Err(e) => return Err(self.fail(e, state)),
                    };
                    info!(run_id = %state.id, agent = %agent.name, turns = state.current_turn, "Run finished");
                    state.final_output = Some(output.clone());
                    state.current_step = Some(NextStep::FinalOutput {
                        output: output.clone(),
                    });
                    return Ok(RunResult {
                        final_output: Some(output),
                        last_agent: agent.name.clone(),
                        state,
                        interruptions: Vec::new(),
                    });
                }
                NextStep::Interruption { approvals } => {
                    info!(run_id = %state.id, agent = %agent.name, pending = approvals.len(), "Run paused");
                    return Ok(RunResult {
                        final_output: None,
                        last_agent: agent.name.clone(),
                        state,
                        interruptions: approvals,
                    });
                }
                NextStep::Handoff { new_agent } => {
                    let next = agent
                        .find_agent(&new_agent)
                        .or_else(|| root.find_agent(&new_agent));
                    let Some(next) = next else {
                        let reason = format!("Handoff target '{new_agent}' is unknown");
                        return Err(self.fail(EngineError::UserError(reason), state));
                    };
                    debug!(from = %agent.name, to = %next.name, "Switching agent");
                    state.current_agent = next.name.clone();
                    state.current_step = Some(NextStep::RunAgain);
                    agent = next;
                }
                NextStep::RunAgain => {
                    if state.current_turn >= state.max_turns {
                        let exceeded = EngineError::MaxTurnsExceeded {
                            max_turns: state.max_turns,
                        };
                        match self
                            .options
                            .error_handlers
                            .recover(&agent, &mut state, &exceeded)
                            .await
                        {
                            Ok(Some(output)) => {
                                state.current_step = Some(NextStep::FinalOutput { output });
                                self.emit_new_items(&mut state);
                                continue;
                            }
                            Ok(None) => return Err(self.fail(exceeded, state)),
                            Err(e) => return Err(self.fail(e, state)),
                        }
                    }
                    if let Err(e) = self.run_turn(&agent, &mut state).await {
                        return Err(self.fail(e, state));
                    }
                    self.emit_new_items(&mut state);
                }
            }
        }
    }

    async fn run_turn(&self, agent: &Agent, state: &mut RunState) -> Result<(), EngineError> {
        state.current_turn += 1;
        debug!(agent = %agent.name, turn = state.current_turn, "Starting turn");
        if let Some(sink) = &self.options.dispatch.sink {
            sink.record(DomainEvent::TurnStarted {
                agent: agent.name.clone(),
                turn: state.current_turn,
                timestamp: Utc::now(),
            });
        }

        let request = self.build_request(agent, state);
        let token = state.context.cancellation_token().clone();
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(EngineError::Cancelled),
            response = self.provider.respond(request) => response?,
        };
        state.model_responses.push(response.clone());

        let processed = classify(agent, &response);
        TurnResolver::new(agent, &self.options.dispatch)
            .resolve_turn(state, &processed)
            .await?;
        Ok(())
    }

    fn build_request(&self, agent: &Agent, state: &RunState) -> ModelRequest {
        let mut settings = agent.model_settings.clone();
        let forced = settings
            .tool_choice
            .as_ref()
            .is_some_and(ToolChoice::is_forced);
        if forced && agent.reset_tool_choice && state.tool_use.has_used_tools(&agent.name) {
            debug!(agent = %agent.name, "Resetting forced tool choice");
            settings.tool_choice = Some(ToolChoice::Auto);
        }
        if settings.parallel_tool_calls.is_none() {
            settings.parallel_tool_calls = Some(self.options.dispatch.parallel);
        }

        ModelRequest {
            agent: agent.name.clone(),
            instructions: agent.instructions.clone(),
            input: state.history(),
            tools: agent.tool_definitions(),
            output_schema: agent.output_schema().cloned(),
            settings,
        }
    }

    /// Run the agent's output guardrails over a final output.
    async fn check_final_output(
        &self,
        agent: &Agent,
        ctx: &RunContext,
        mut output: String,
    ) -> Result<String, EngineError> {
        for guardrail in &agent.output_guardrails {
            match guardrail.check(ctx, &agent.name, &output).await? {
                GuardrailVerdict::Allow => {}
                GuardrailVerdict::RejectContent(replacement) => {
                    info!(agent = %agent.name, guardrail = guardrail.name(), "Output guardrail replaced final output");
                    output = replacement;
                }
                GuardrailVerdict::Halt => {
                    return Err(EngineError::OutputGuardrailTripwire {
                        guardrail: guardrail.name().to_string(),
                        agent: agent.name.clone(),
                    });
                }
            }
        }
        Ok(output)
    }

    fn emit_new_items(&self, state: &mut RunState) {
        let fresh = state.take_unemitted();
        let Some(sink) = &self.options.dispatch.sink else {
            return;
        };
        for (index, item) in fresh {
            sink.record(DomainEvent::ItemGenerated {
                index,
                kind: item.kind(),
                item,
                timestamp: Utc::now(),
            });
        }
    }

    /// The persisted count stays at the last completed step.
    fn fail(&self, kind: EngineError, mut state: RunState) -> RunError {
        error!(run_id = %state.id, agent = %state.current_agent, kind = kind.kind(), error = %kind, "Run failed");
        self.emit_new_items(&mut state);
        RunError::new(kind, state)
    }
}
