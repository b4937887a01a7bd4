//! Execution hooks

use async_trait::async_trait;

use crate::types::{AgentResponse, ExecutionContext};

pub type PluginResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Optional hooks around an invocation; failures are logged, never fatal
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str {
        "plugin"
    }

    async fn before_execution(&self, _ctx: &ExecutionContext) -> PluginResult {
        Ok(())
    }

    async fn after_execution(
        &self,
        _ctx: &ExecutionContext,
        _response: &AgentResponse,
    ) -> PluginResult {
        Ok(())
    }

    /// Called for invocations that end with reason `error`
    async fn on_error(&self, _ctx: &ExecutionContext, _message: &str) -> PluginResult {
        Ok(())
    }
}
