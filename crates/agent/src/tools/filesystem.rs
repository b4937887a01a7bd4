//! Workspace file tools

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::debug;

use super::path_utils::validate_workspace_path;
use super::{ParamKind, ParamSchema, Result, ToolError, ToolTrait};

fn args<T: for<'de> Deserialize<'de>>(tool: &str, params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| ToolError::invalid(tool, e.to_string()))
}

/// Reads a UTF-8 file
pub struct ReadFileTool {
    workspace: PathBuf,
}

impl ReadFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[async_trait]
impl ToolTrait for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read a text file from the workspace."
    }
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().required("path", ParamKind::String, "File path")
    }
    async fn execute(&self, params: Value) -> Result<Value> {
        let args: ReadFileArgs = args(self.name(), params)?;
        let path = validate_workspace_path(&args.path, &self.workspace).await?;

        debug!("◆ READING {:?}", path);
        if !path.exists() {
            return Err(ToolError::Execution(format!("file not found: {}", args.path)));
        }
        if !path.is_file() {
            return Err(ToolError::Execution(format!("not a file: {}", args.path)));
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Value::String(content))
    }
}

/// Writes a file, creating parent directories
pub struct WriteFileTool {
    workspace: PathBuf,
}

impl WriteFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[async_trait]
impl ToolTrait for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "Write text to a file in the workspace, creating directories as needed."
    }
    fn schema(&self) -> ParamSchema {
        ParamSchema::new()
            .required("path", ParamKind::String, "File path")
            .required("content", ParamKind::String, "Text to write")
    }
    async fn execute(&self, params: Value) -> Result<Value> {
        let args: WriteFileArgs = args(self.name(), params)?;
        let path = validate_workspace_path(&args.path, &self.workspace).await?;

        debug!("◆ WRITING {:?}", path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &args.content).await?;
        Ok(json!({
            "result": format!("wrote {} bytes to {}", args.content.len(), args.path),
            "bytes": args.content.len(),
        }))
    }
}

/// Lists a directory
pub struct ListDirTool {
    workspace: PathBuf,
}

impl ListDirTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[derive(Deserialize)]
struct ListDirArgs {
    path: String,
}

#[async_trait]
impl ToolTrait for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }
    fn description(&self) -> &str {
        "List the entries of a workspace directory."
    }
    fn schema(&self) -> ParamSchema {
        ParamSchema::new().with_default("path", ParamKind::String, json!("."), "Directory")
    }
    async fn execute(&self, params: Value) -> Result<Value> {
        let args: ListDirArgs = args(self.name(), params)?;
        let path = validate_workspace_path(&args.path, &self.workspace).await?;

        debug!("◆ LISTING {:?}", path);
        if !path.is_dir() {
            return Err(ToolError::Execution(format!(
                "not a directory: {}",
                args.path
            )));
        }
        let mut entries = tokio::fs::read_dir(&path).await?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let prefix = if entry.file_type().await?.is_dir() {
                "[DIR] "
            } else {
                "[FILE] "
            };
            items.push(format!("{}{}", prefix, name));
        }
        items.sort();
        if items.is_empty() {
            Ok(Value::String(format!("(empty) {}", args.path)))
        } else {
            Ok(Value::String(items.join("\n")))
        }
    }
}
