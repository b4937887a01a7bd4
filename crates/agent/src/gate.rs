//! Tool gate
//!
//! The checked boundary between the loop and the toolkit. Every outcome,
//! including unknown tools, bad parameters, denials and cancellation, comes
//! back as a settled [`AgentStep`].

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use reagent_bus::{AgentEvent, EventBus};

use crate::confirm::{ConfirmationHandler, ConfirmationRequest};
use crate::tools::{ToolError, Toolkit};
use crate::types::{AgentStep, ExecutionContext, PlannedAction};

/// Render a tool result as observation text
pub fn render_observation(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[derive(Clone)]
pub struct ToolGate {
    toolkit: Arc<dyn Toolkit>,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
    bus: EventBus,
}

impl ToolGate {
    pub fn new(toolkit: Arc<dyn Toolkit>, bus: EventBus) -> Self {
        Self {
            toolkit,
            confirmation: None,
            bus,
        }
    }

    /// Require an operator decision before each tool call
    pub fn with_confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self
    }

    pub fn requires_confirmation(&self) -> bool {
        self.confirmation.is_some()
    }

    pub fn toolkit(&self) -> &Arc<dyn Toolkit> {
        &self.toolkit
    }

    pub async fn invoke(
        &self,
        action: &PlannedAction,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> AgentStep {
        self.bus.emit(&AgentEvent::ActionStart {
            execution_id: ctx.execution_id.clone(),
            tool: action.tool.clone(),
            params: action.params.clone(),
        });

        let step = self.settle(action, ctx, cancel).await;

        info!(
            execution_id = %ctx.execution_id,
            tool = %action.tool,
            status = %step.status,
            "◆ TOOL CALL SETTLED"
        );
        self.bus.emit(&AgentEvent::ActionEnd {
            execution_id: ctx.execution_id.clone(),
            tool: action.tool.clone(),
            status: step.status.as_str().to_string(),
            observation: step.observation.clone(),
            duration_ms: step.duration_ms(),
        });
        step
    }

    async fn settle(
        &self,
        action: &PlannedAction,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> AgentStep {
        let mut step = AgentStep::new(action.clone());

        if !self.toolkit.has_tool(&action.tool) {
            warn!("◆ UNKNOWN TOOL: {}", action.tool);
            step.fail(ToolError::NotFound(action.tool.clone()).to_string());
            return step;
        }

        let params = match self.toolkit.schema(&action.tool) {
            Some(schema) => match schema.validate(&action.tool, &action.params) {
                Ok(params) => params,
                Err(e) => {
                    debug!("◆ REJECTED PARAMS FOR {}: {}", action.tool, e);
                    step.fail(e.to_string());
                    return step;
                }
            },
            None => action.params.clone(),
        };

        if let Some(handler) = &self.confirmation {
            self.bus.emit(&AgentEvent::ToolConfirmation {
                execution_id: ctx.execution_id.clone(),
                tool: action.tool.clone(),
                params: params.clone(),
            });
            let request = ConfirmationRequest {
                execution_id: ctx.execution_id.clone(),
                tool: action.tool.clone(),
                params: params.clone(),
                reason: action.reason.clone(),
            };

            let decision = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                decision = handler.confirm(&request) => Some(decision),
            };
            match decision {
                Some(decision) if decision.is_approved() => {}
                Some(_) => {
                    info!("◆ OPERATOR DENIED {}", action.tool);
                    step.fail(ToolError::Denied.to_string());
                    return step;
                }
                None => {
                    step.fail(ToolError::Cancelled.to_string());
                    return step;
                }
            }
        }

        step.begin();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
            outcome = self.toolkit.execute_tool(&action.tool, params) => outcome,
        };

        match outcome {
            Ok(value) => {
                step.complete(render_observation(&value));
            }
            Err(e) => {
                debug!("◆ TOOL {} FAILED: {}", action.tool, e);
                step.fail(e.to_string());
            }
        }
        step
    }
}

impl std::fmt::Debug for ToolGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolGate")
            .field("requires_confirmation", &self.requires_confirmation())
            .finish()
    }
}
