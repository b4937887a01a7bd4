//! Reasoning loop
//!
//! Alternates a model call with at most one tool call per iteration until
//! the model answers directly, a tool call settles the task, or a bound is
//! hit. Every outcome is folded into an [`AgentResponse`]; nothing past
//! construction returns an error.

use chrono::Utc;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use reagent_bus::{AgentEvent, EventBus};
use reagent_config::{AgentConfig, Termination};
use reagent_provider::{
    ChatRequest, ChatResponse, Gateway, GatewayError, Message, ModelClient, RetryPolicy,
};

use crate::confirm::{AutoDeny, ConfirmationHandler};
use crate::context::ContextBuilder;
use crate::gate::ToolGate;
use crate::parser;
use crate::plugin::Plugin;
use crate::recorder::Recorder;
use crate::stats::{Stats, StatsAggregator};
use crate::tools::{ToolRegistry, Toolkit};
use crate::types::{
    AgentResponse, ExecutionContext, ExecutionHistory, Finish, ReasonCode, ResponseMetadata,
    ResponseType, StepStatus,
};
use crate::{AgentError, Result};

const CANCELLED: &str = "execution cancelled";

/// When a completed tool call ends the invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TerminationPolicy {
    /// The first completed tool call resolves the task
    #[default]
    SingleShot,
    /// Keep going until the model answers directly or marks an action `done`
    UntilDone,
}

impl From<Termination> for TerminationPolicy {
    fn from(termination: Termination) -> Self {
        match termination {
            Termination::SingleShot => Self::SingleShot,
            Termination::UntilDone => Self::UntilDone,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_iterations: u32,
    pub max_execution_time: Duration,
    pub streaming: bool,
    pub debug: bool,
    pub termination: TerminationPolicy,
    /// Finished histories kept in memory
    pub history_limit: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_execution_time: Duration::from_millis(300_000),
            streaming: false,
            debug: false,
            termination: TerminationPolicy::SingleShot,
            history_limit: 50,
        }
    }
}

struct Outcome {
    reason: ReasonCode,
    output: String,
    response_type: ResponseType,
    iterations: u32,
}

impl Outcome {
    fn error(output: impl Into<String>, iterations: u32) -> Self {
        Self {
            reason: ReasonCode::Error,
            output: output.into(),
            response_type: ResponseType::Error,
            iterations,
        }
    }

    fn cancelled(iterations: u32) -> Self {
        Self::error(CANCELLED, iterations)
    }
}

/// Output for a completed step: a structured `result` field if present,
/// otherwise the raw observation
pub fn unwrap_result(observation: &str) -> String {
    match serde_json::from_str::<Value>(observation) {
        Ok(Value::Object(map)) => match map.get("result") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => observation.to_string(),
        },
        _ => observation.to_string(),
    }
}

/// The agent execution engine
pub struct AgentLoop {
    gateway: Gateway,
    gate: ToolGate,
    toolkit: Arc<dyn Toolkit>,
    bus: EventBus,
    context: ContextBuilder,
    plugins: Vec<Arc<dyn Plugin>>,
    settings: LoopSettings,
    working_directory: PathBuf,
    stats: StatsAggregator,
    histories: Mutex<VecDeque<ExecutionHistory>>,
}

impl AgentLoop {
    pub fn builder() -> AgentLoopBuilder {
        AgentLoopBuilder::default()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn toolkit(&self) -> &Arc<dyn Toolkit> {
        &self.toolkit
    }

    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Retained histories, oldest first
    pub fn histories(&self) -> Vec<ExecutionHistory> {
        self.histories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn last_history(&self) -> Option<ExecutionHistory> {
        self.histories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    /// Run one invocation in the configured working directory
    pub async fn run(&self, input: &str, cancel: &CancellationToken) -> AgentResponse {
        let ctx = ExecutionContext::new(self.working_directory.clone());
        self.run_with_context(ctx, input, cancel).await
    }

    pub async fn run_with_context(
        &self,
        ctx: ExecutionContext,
        input: &str,
        cancel: &CancellationToken,
    ) -> AgentResponse {
        info!(execution_id = %ctx.execution_id, "◆ EXECUTION STARTED");
        self.bus.emit(&AgentEvent::ExecutionStart {
            execution_id: ctx.execution_id.clone(),
            input: input.to_string(),
        });
        for plugin in &self.plugins {
            if let Err(e) = plugin.before_execution(&ctx).await {
                self.plugin_failed(plugin.name(), "before_execution", e.as_ref());
            }
        }

        let mut recorder = Recorder::new(&ctx);
        let outcome = self.drive(&ctx, input, &mut recorder, cancel).await;

        let finish = Finish {
            output: outcome.output,
            reason: outcome.reason,
            log: recorder.log(),
        };
        let history = recorder.finish(finish.clone(), &ctx);
        self.stats.record(&history, finish.reason);

        let response = AgentResponse {
            execution_id: ctx.execution_id.clone(),
            content: finish.output.clone(),
            response_type: outcome.response_type,
            status: finish.reason,
            timestamp: Utc::now(),
            metadata: ResponseMetadata {
                total_steps: history.steps.len() as u32,
                total_time_ms: history.performance.total_time_ms,
                iterations: outcome.iterations,
                llm_calls: history.performance.llm_calls,
                tool_calls: history.performance.tool_calls,
            },
        };
        self.retain(history);

        info!(
            execution_id = %ctx.execution_id,
            reason = %finish.reason,
            iterations = outcome.iterations,
            total_time_ms = response.metadata.total_time_ms,
            "◆ EXECUTION FINISHED"
        );

        if finish.reason == ReasonCode::Error {
            self.bus.emit(&AgentEvent::Error {
                execution_id: ctx.execution_id.clone(),
                message: finish.output.clone(),
                total_time_ms: response.metadata.total_time_ms,
            });
            for plugin in &self.plugins {
                if let Err(e) = plugin.on_error(&ctx, &finish.output).await {
                    self.plugin_failed(plugin.name(), "on_error", e.as_ref());
                }
            }
        } else {
            self.bus.emit(&AgentEvent::ExecutionEnd {
                execution_id: ctx.execution_id.clone(),
                reason: finish.reason.as_str().to_string(),
                output: finish.output.clone(),
                total_time_ms: response.metadata.total_time_ms,
            });
        }

        for plugin in &self.plugins {
            if let Err(e) = plugin.after_execution(&ctx, &response).await {
                self.plugin_failed(plugin.name(), "after_execution", e.as_ref());
            }
        }

        response
    }

    async fn drive(
        &self,
        ctx: &ExecutionContext,
        input: &str,
        recorder: &mut Recorder,
        cancel: &CancellationToken,
    ) -> Outcome {
        let system_prompt = self
            .context
            .build_system_prompt(self.toolkit.as_ref(), ctx)
            .await;
        let mut transcript = vec![Message::user(input)];
        let mut iteration: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Outcome::cancelled(iteration);
            }
            let elapsed = ctx.elapsed();
            if iteration > 0 && elapsed > self.settings.max_execution_time {
                warn!(execution_id = %ctx.execution_id, "◆ EXECUTION TIMED OUT");
                return Outcome {
                    reason: ReasonCode::Timeout,
                    output: format!("execution timed out after {} ms", elapsed.as_millis()),
                    response_type: ResponseType::Error,
                    iterations: iteration,
                };
            }
            if iteration >= self.settings.max_iterations {
                warn!(execution_id = %ctx.execution_id, "◆ MAX ITERATIONS REACHED");
                return Outcome {
                    reason: ReasonCode::MaxIterations,
                    output: format!(
                        "stopped after {} iteration(s) without a final answer",
                        iteration
                    ),
                    response_type: ResponseType::Error,
                    iterations: iteration,
                };
            }
            iteration += 1;

            debug!(execution_id = %ctx.execution_id, iteration, "◆ THINKING");
            self.bus.emit(&AgentEvent::ThoughtStart {
                execution_id: ctx.execution_id.clone(),
                iteration,
            });

            let started = Instant::now();
            let request = ChatRequest::new(ContextBuilder::build_messages(
                &system_prompt,
                &transcript,
            ));
            let reply = self.think(ctx, iteration, request, cancel).await;
            recorder.record_llm_call();

            let response = match reply {
                Ok(response) => response,
                Err(e) => {
                    self.bus.emit(&AgentEvent::ThoughtEnd {
                        execution_id: ctx.execution_id.clone(),
                        iteration,
                        content: String::new(),
                        has_action: false,
                        thinking_time_ms: started.elapsed().as_millis() as u64,
                    });
                    if matches!(e, GatewayError::Cancelled) {
                        return Outcome::cancelled(iteration);
                    }
                    warn!(execution_id = %ctx.execution_id, "◆ MODEL CALL FAILED: {}", e);
                    return Outcome::error(e.to_string(), iteration);
                }
            };

            let mut thought = parser::parse(&response.content);
            thought.thinking_time_ms = started.elapsed().as_millis() as u64;
            self.bus.emit(&AgentEvent::ThoughtEnd {
                execution_id: ctx.execution_id.clone(),
                iteration,
                content: thought.content.clone(),
                has_action: thought.has_action(),
                thinking_time_ms: thought.thinking_time_ms,
            });
            recorder.record_thought(thought.clone());

            let action = match thought.planned_action {
                Some(action) => action,
                None => {
                    return Outcome {
                        reason: ReasonCode::Success,
                        output: thought.content,
                        response_type: ResponseType::Final,
                        iterations: iteration,
                    }
                }
            };

            let step = self.gate.invoke(&action, ctx, cancel).await;
            ContextBuilder::add_tool_exchange(
                &mut transcript,
                &thought.content,
                &step.observation,
            );
            recorder.record_step(step.clone());

            if step.status == StepStatus::Completed {
                if self.settings.termination == TerminationPolicy::SingleShot || action.done {
                    return Outcome {
                        reason: ReasonCode::Success,
                        output: unwrap_result(&step.observation),
                        response_type: ResponseType::Action,
                        iterations: iteration,
                    };
                }
                debug!(tool = %action.tool, "◆ STEP COMPLETED, CONTINUING");
                continue;
            }

            if cancel.is_cancelled() {
                return Outcome::cancelled(iteration);
            }
            return Outcome::error(step.error.unwrap_or(step.observation), iteration);
        }
    }

    async fn think(
        &self,
        ctx: &ExecutionContext,
        iteration: u32,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<ChatResponse, GatewayError> {
        if !self.settings.streaming {
            return self.gateway.chat(request, cancel).await;
        }

        let bus = &self.bus;
        let execution_id = ctx.execution_id.as_str();
        let on_chunk = move |chunk: &str| {
            bus.emit(&AgentEvent::StreamChunk {
                execution_id: execution_id.to_string(),
                iteration,
                chunk: chunk.to_string(),
            });
        };
        self.gateway.stream_chat(request, &on_chunk, cancel).await
    }

    fn retain(&self, history: ExecutionHistory) {
        if self.settings.history_limit == 0 {
            return;
        }
        let mut histories = self.histories.lock().unwrap_or_else(PoisonError::into_inner);
        histories.push_back(history);
        while histories.len() > self.settings.history_limit {
            histories.pop_front();
        }
    }

    fn plugin_failed(
        &self,
        plugin: &str,
        hook: &str,
        error: &(dyn std::error::Error + Send + Sync),
    ) {
        if self.settings.debug {
            warn!("◆ PLUGIN {} FAILED IN {}: {}", plugin, hook, error);
        }
    }
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("gateway", &self.gateway)
            .field("gate", &self.gate)
            .field("settings", &self.settings)
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

/// Assembles an [`AgentLoop`]; only the model client is mandatory
#[derive(Default)]
pub struct AgentLoopBuilder {
    client: Option<Arc<dyn ModelClient>>,
    toolkit: Option<Arc<dyn Toolkit>>,
    bus: Option<EventBus>,
    plugins: Vec<Arc<dyn Plugin>>,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
    require_confirmation: bool,
    settings: LoopSettings,
    retry: RetryPolicy,
    context: ContextBuilder,
    working_directory: Option<PathBuf>,
}

impl AgentLoopBuilder {
    pub fn client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn toolkit(mut self, toolkit: Arc<dyn Toolkit>) -> Self {
        self.toolkit = Some(toolkit);
        self
    }

    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Install a confirmation handler and require it for every tool call
    pub fn confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self.require_confirmation = true;
        self
    }

    /// Without an installed handler, required confirmations are denied
    pub fn require_confirmation(mut self, required: bool) -> Self {
        self.require_confirmation = required;
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.settings.max_iterations = max_iterations;
        self
    }

    pub fn max_execution_time(mut self, limit: Duration) -> Self {
        self.settings.max_execution_time = limit;
        self
    }

    pub fn streaming(mut self, enabled: bool) -> Self {
        self.settings.streaming = enabled;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.settings.debug = enabled;
        self
    }

    pub fn termination(mut self, policy: TerminationPolicy) -> Self {
        self.settings.termination = policy;
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.settings.history_limit = limit;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn context(mut self, context: ContextBuilder) -> Self {
        self.context = context;
        self
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Apply the `agent` section of the configuration
    pub fn from_config(mut self, config: &AgentConfig) -> Self {
        self.settings = LoopSettings {
            max_iterations: config.max_iterations,
            max_execution_time: Duration::from_millis(config.max_execution_time_ms),
            streaming: config.streaming_enabled,
            debug: config.debug_enabled,
            termination: config.termination.into(),
            history_limit: config.history_limit,
        };
        self.retry = RetryPolicy {
            max_retries: config.retry.max_retries,
            base_delay_ms: config.retry.base_delay_ms,
            max_delay_ms: config.retry.max_delay_ms,
            backoff_factor: config.retry.backoff_factor,
        };
        self.require_confirmation = config.tool_confirmation.enabled;
        self
    }

    pub fn build(self) -> Result<AgentLoop> {
        let client = self.client.ok_or(AgentError::MissingModelClient)?;
        if self.settings.max_iterations == 0 {
            return Err(AgentError::InvalidSettings(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        let bus = self
            .bus
            .unwrap_or_else(|| EventBus::new().with_debug(self.settings.debug));
        let toolkit: Arc<dyn Toolkit> = self
            .toolkit
            .unwrap_or_else(|| Arc::new(ToolRegistry::new()));

        let mut gate = ToolGate::new(Arc::clone(&toolkit), bus.clone());
        if self.require_confirmation {
            let handler = self.confirmation.unwrap_or_else(|| {
                warn!("◆ CONFIRMATION REQUIRED BUT NO HANDLER, TOOL CALLS WILL BE DENIED");
                Arc::new(AutoDeny)
            });
            gate = gate.with_confirmation(handler);
        }

        let working_directory = self
            .working_directory
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(AgentLoop {
            gateway: Gateway::new(client, self.retry),
            gate,
            toolkit,
            bus,
            context: self.context,
            plugins: self.plugins,
            settings: self.settings,
            working_directory,
            stats: StatsAggregator::new(),
            histories: Mutex::new(VecDeque::new()),
        })
    }
}
