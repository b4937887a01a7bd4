//! Execution data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

/// Identity and environment of one invocation
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub started_at: DateTime<Utc>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub working_directory: PathBuf,
    pub environment: HashMap<String, String>,
    clock: Instant,
}

impl ExecutionContext {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            session_id: None,
            user_id: None,
            working_directory: working_directory.into(),
            environment: HashMap::new(),
            clock: Instant::now(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Monotonic time since creation
    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }
}

/// A tool call proposed by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub tool: String,
    pub params: Value,
    pub reason: String,
    /// Marks the last action of a multi-step task
    #[serde(default)]
    pub done: bool,
}

impl PlannedAction {
    pub fn new(tool: impl Into<String>, params: Value) -> Self {
        Self {
            tool: tool.into(),
            params,
            reason: "unspecified".to_string(),
            done: false,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// One reasoning step's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentThought {
    pub content: String,
    pub reasoning: String,
    pub confidence: f64,
    pub thinking_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_action: Option<PlannedAction>,
}

impl AgentThought {
    pub fn has_action(&self) -> bool {
        self.planned_action.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Executing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one tool invocation attempt.
///
/// Status only moves forward; once `ended_at` is set the step is frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub action: PlannedAction,
    pub observation: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentStep {
    pub fn new(action: PlannedAction) -> Self {
        Self {
            action,
            observation: String::new(),
            status: StepStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        }
    }

    fn advance(&mut self, next: StepStatus) -> bool {
        if self.ended_at.is_some() || next.rank() <= self.status.rank() {
            return false;
        }
        self.status = next;
        true
    }

    /// Mark the toolkit call as started
    pub fn begin(&mut self) -> bool {
        if !self.advance(StepStatus::Executing) {
            return false;
        }
        self.started_at = Utc::now();
        true
    }

    pub fn complete(&mut self, observation: impl Into<String>) -> bool {
        if !self.advance(StepStatus::Completed) {
            return false;
        }
        self.observation = observation.into();
        self.ended_at = Some(Utc::now());
        true
    }

    /// Settle as failed; the observation carries the prefixed error
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if !self.advance(StepStatus::Failed) {
            return false;
        }
        let error = error.into();
        self.observation = format!("error: {}", error);
        self.error = Some(error);
        self.ended_at = Some(Utc::now());
        true
    }

    pub fn duration_ms(&self) -> u64 {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Performance {
    pub total_time_ms: u64,
    pub llm_calls: u32,
    pub tool_calls: u32,
}

/// Thoughts and steps of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHistory {
    pub execution_id: String,
    pub thoughts: Vec<AgentThought>,
    pub steps: Vec<AgentStep>,
    pub started_at: DateTime<Utc>,
    pub performance: Performance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<Finish>,
}

impl ExecutionHistory {
    pub fn new(execution_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            execution_id: execution_id.into(),
            thoughts: Vec::new(),
            steps: Vec::new(),
            started_at,
            performance: Performance::default(),
            finish: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finish.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Success,
    Error,
    Timeout,
    MaxIterations,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::MaxIterations => "max_iterations",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of the loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finish {
    pub output: String,
    pub reason: ReasonCode,
    pub log: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Direct answer from the model
    Final,
    /// Resolved from a tool observation
    Action,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub total_steps: u32,
    pub total_time_ms: u64,
    pub iterations: u32,
    pub llm_calls: u32,
    pub tool_calls: u32,
}

/// Envelope handed back to callers for every invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub execution_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    pub status: ReasonCode,
    pub timestamp: DateTime<Utc>,
    pub metadata: ResponseMetadata,
}

impl AgentResponse {
    pub fn is_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }
}
