//! Shell command tool

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::path_utils::validate_workspace_path;
use super::{ParamKind, ParamSchema, Result, ToolError, ToolTrait};

const MAX_OUTPUT: usize = 10_000;

/// Runs `sh -c` inside the workspace
pub struct ExecTool {
    timeout: Duration,
    workspace: PathBuf,
}

impl ExecTool {
    pub fn new(timeout: Duration, workspace: PathBuf) -> Self {
        Self { timeout, workspace }
    }

    pub fn with_workspace(workspace: PathBuf) -> Self {
        Self::new(Duration::from_secs(60), workspace)
    }
}

#[derive(Deserialize)]
struct ExecArgs {
    command: String,
    working_dir: Option<String>,
}

fn truncate(mut output: String) -> String {
    if output.len() <= MAX_OUTPUT {
        return output;
    }
    let mut cut = MAX_OUTPUT;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    let remaining = output.len() - cut;
    output.truncate(cut);
    output.push_str(&format!("\n... output truncated, {} bytes omitted", remaining));
    output
}

#[async_trait]
impl ToolTrait for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }
    fn description(&self) -> &str {
        "Run a shell command in the workspace. A non-zero exit status is an error."
    }
    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .required("command", ParamKind::String, "Shell command")
            .optional("working_dir", ParamKind::String, "Directory inside the workspace")
    }
    async fn execute(&self, params: Value) -> Result<Value> {
        let args: ExecArgs = serde_json::from_value(params)
            .map_err(|e| ToolError::invalid(self.name(), e.to_string()))?;

        let working_dir = match args.working_dir {
            Some(dir) => validate_workspace_path(&dir, &self.workspace).await?,
            None => self.workspace.clone(),
        };

        debug!("◆ EXECUTING: {}", args.command);
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&args.command)
            .current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ToolError::Execution(format!(
                    "command timed out after {} ms",
                    self.timeout.as_millis()
                )))
            }
        };

        let mut parts = Vec::new();
        if !output.stdout.is_empty() {
            parts.push(String::from_utf8_lossy(&output.stdout).to_string());
        }
        if !output.stderr.is_empty() {
            parts.push(format!(
                "STDERR:\n{}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        let text = truncate(parts.join("\n"));

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return Err(ToolError::Execution(if text.is_empty() {
                format!("exit code {}", code)
            } else {
                format!("exit code {}: {}", code, text.trim_end())
            }));
        }

        Ok(Value::String(if text.is_empty() {
            "(no output)".to_string()
        } else {
            text
        }))
    }
}
