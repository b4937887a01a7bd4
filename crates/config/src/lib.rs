//! Configuration management for reagent
//!
//! Loads and saves the engine's tunables: model endpoint, loop bounds,
//! retry policy and tool confirmation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, data_dir, ensure_dir, expand_tilde, workspace_path};

/// Environment variable consulted when no API key is stored in the file
pub const API_KEY_ENV: &str = "REAGENT_API_KEY";

/// Errors in configuration handling
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CONFIG I/O ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("CONFIG PARSE FAILED: {0}")]
    Json(#[from] serde_json::Error),

    #[error("INVALID CONFIG: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Model endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2048
}

/// Retry policy applied to every language-model call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

/// Human-in-the-loop approval before tools run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfirmationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Unanswered confirmations are denied after this long
    #[serde(default = "default_confirmation_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ToolConfirmationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: default_confirmation_timeout_ms(),
        }
    }
}

fn default_confirmation_timeout_ms() -> u64 {
    60_000
}

/// When a completed tool call ends the invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The first completed tool call resolves the invocation
    #[default]
    SingleShot,
    /// Observations are fed back until the model answers directly or marks an action done
    UntilDone,
}

/// Reasoning loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_execution_time_ms")]
    pub max_execution_time_ms: u64,
    #[serde(default)]
    pub streaming_enabled: bool,
    #[serde(default)]
    pub debug_enabled: bool,
    #[serde(default)]
    pub termination: Termination,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default)]
    pub tool_confirmation: ToolConfirmationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_execution_time_ms: default_max_execution_time_ms(),
            streaming_enabled: false,
            debug_enabled: false,
            termination: Termination::default(),
            history_limit: default_history_limit(),
            tool_confirmation: ToolConfirmationConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_max_iterations() -> u32 {
    10
}

fn default_max_execution_time_ms() -> u64 {
    300_000
}

fn default_history_limit() -> usize {
    50
}

fn default_workspace() -> String {
    "~/.reagent/workspace".to_string()
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default = "default_workspace")]
    pub workspace: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            agent: AgentConfig::default(),
            workspace: default_workspace(),
        }
    }
}

impl Config {
    /// Load from the default location
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    /// Load from specific location; a missing file yields defaults
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("◆ NO CONFIG AT {:?}, USING DEFAULTS", path);
            return Ok(Config::default());
        }

        debug!("◆ LOADING CONFIG FROM {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save to the default location
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("◆ WRITING CONFIG TO {:?}", path);

        if let Some(parent) = path.parent() {
            ensure_dir(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let agent = &self.agent;
        if agent.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_iterations must be at least 1".to_string(),
            ));
        }
        if agent.retry.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "agent.retry.backoff_factor must be >= 1.0, got {}",
                agent.retry.backoff_factor
            )));
        }
        if agent.retry.base_delay_ms > agent.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "agent.retry.base_delay_ms ({}) exceeds max_delay_ms ({})",
                agent.retry.base_delay_ms, agent.retry.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Workspace directory with `~` expanded
    pub fn workspace_path(&self) -> PathBuf {
        expand_tilde(&self.workspace)
    }

    /// API key from the file, falling back to `REAGENT_API_KEY`
    pub fn api_key(&self) -> Option<String> {
        if !self.provider.api_key.is_empty() {
            return Some(self.provider.api_key.clone());
        }

        std::env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty())
    }

    /// Whether a model endpoint can be reached
    pub fn has_api_key(&self) -> bool {
        self.api_key().is_some()
    }
}

/// Write a default config if none exists and create the workspace
pub async fn init() -> Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        warn!("◆ CONFIG ALREADY PRESENT AT {:?}", config_path);
    } else {
        let config = Config::default();
        config.save().await?;
        info!("◆ CONFIG WRITTEN TO {:?}", config_path);
    }

    let config = Config::load().await?;
    let workspace = config.workspace_path();
    ensure_dir(&workspace).await?;
    info!("◆ WORKSPACE READY AT {:?}", workspace);

    Ok(config)
}
