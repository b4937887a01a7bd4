//! Agent execution engine
//!
//! The reasoning-action-observation loop and everything it drives: action
//! parsing, the tool gate, confirmation, recording and stats.

use thiserror::Error;

pub mod confirm;
pub mod context;
pub mod gate;
pub mod loop_agent;
pub mod parser;
pub mod plugin;
pub mod recorder;
pub mod stats;
pub mod tools;
pub mod types;

pub use confirm::{
    AutoApprove, AutoDeny, ChannelConfirmation, ConfirmationHandler, ConfirmationRequest,
    Decision, PendingConfirmation,
};
pub use context::ContextBuilder;
pub use gate::ToolGate;
pub use loop_agent::{AgentLoop, AgentLoopBuilder, LoopSettings, TerminationPolicy};
pub use plugin::{Plugin, PluginResult};
pub use stats::{Stats, StatsAggregator};
pub use tools::{ParamKind, ParamSchema, ParamSpec, ToolError, ToolRegistry, ToolTrait, Toolkit};
pub use types::{
    AgentResponse, AgentStep, AgentThought, ExecutionContext, ExecutionHistory, Finish,
    PlannedAction, ReasonCode, ResponseMetadata, ResponseType, StepStatus,
};

/// Setup errors; once built, the loop reports failures inside its responses
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("◆ NO MODEL CLIENT CONFIGURED")]
    MissingModelClient,

    #[error("◆ INVALID SETTINGS: {0}")]
    InvalidSettings(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
