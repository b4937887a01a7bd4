//! Common test utilities for reagent integration tests
#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::{json, Value};
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// Isolated HOME with its own config directory and workspace
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub workspace_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let config_dir = temp_dir.path().join(".reagent");
        let workspace_dir = temp_dir.path().join("workspace");

        std::fs::create_dir_all(&config_dir)?;

        Ok(Self {
            temp_dir,
            config_dir,
            workspace_dir,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    pub fn workspace_file(&self, name: &str) -> PathBuf {
        self.workspace_dir.join(name)
    }

    /// Command with HOME pointed at the test environment
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_reagent"));
        cmd.env("HOME", self.temp_dir.path());
        cmd.env_remove("REAGENT_API_KEY");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Write a config whose provider points at `api_base`
    pub fn create_config(&self, api_key: &str, api_base: &str) -> anyhow::Result<()> {
        let config = json!({
            "provider": {
                "api_key": api_key,
                "api_base": api_base,
                "model": "test/model"
            },
            "agent": {
                "retry": { "max_retries": 0 }
            },
            "workspace": self.workspace_dir.to_string_lossy()
        });
        self.write_config(&config)
    }

    pub fn write_config(&self, config: &Value) -> anyhow::Result<()> {
        std::fs::write(self.config_file(), serde_json::to_string_pretty(config)?)?;
        Ok(())
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

/// Body of an OpenAI-style chat completion carrying `content`
pub fn completion(content: &str) -> String {
    json!({
        "model": "test/model",
        "choices": [{"message": {"role": "assistant", "content": content}}]
    })
    .to_string()
}

/// Server-sent-event body streaming `parts` as content deltas
pub fn stream_events(parts: &[&str]) -> String {
    let mut body = String::new();
    for part in parts {
        let event = json!({"choices": [{"delta": {"content": part}}]});
        body.push_str(&format!("data: {}\n\n", event));
    }
    body.push_str("data: [DONE]\n\n");
    body
}
