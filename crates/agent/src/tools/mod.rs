//! Toolkit contract, parameter schemas and the built-in tool registry

pub mod filesystem;
pub mod path_utils;
pub mod shell;
pub mod time;

pub use filesystem::{ListDirTool, ReadFileTool, WriteFileTool};
pub use shell::ExecTool;
pub use time::CurrentTimeTool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Tool failures; each becomes a failed step, never a loop error
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid params for {tool}: {message}")]
    InvalidParams { tool: String, message: String },

    #[error("path {path} is outside workspace {workspace}")]
    OutsideWorkspace { path: String, workspace: String },

    #[error("execution cancelled by operator")]
    Denied,

    #[error("execution cancelled")]
    Cancelled,

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Execution(String),
}

impl ToolError {
    pub fn invalid(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// JSON type a parameter must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

/// Ordered parameter contract of one tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    params: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required: true,
            default: None,
            description: description.to_string(),
        });
        self
    }

    pub fn optional(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required: false,
            default: None,
            description: description.to_string(),
        });
        self
    }

    pub fn with_default(
        mut self,
        name: &str,
        kind: ParamKind,
        default: Value,
        description: &str,
    ) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required: false,
            default: Some(default),
            description: description.to_string(),
        });
        self
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Check `params` against the schema and fill in defaults.
    ///
    /// Unknown keys pass through untouched.
    pub fn validate(&self, tool: &str, params: &Value) -> Result<Value> {
        let object = match params {
            Value::Object(map) => map,
            Value::Null => return self.validate(tool, &Value::Object(Map::new())),
            other => {
                return Err(ToolError::invalid(
                    tool,
                    format!("expected an object, got {}", json_type(other)),
                ))
            }
        };

        let mut checked = object.clone();
        for spec in &self.params {
            match object.get(&spec.name) {
                Some(Value::Null) | None => {
                    if let Some(default) = &spec.default {
                        checked.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        return Err(ToolError::invalid(
                            tool,
                            format!("missing required parameter '{}'", spec.name),
                        ));
                    } else {
                        checked.remove(&spec.name);
                    }
                }
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(ToolError::invalid(
                        tool,
                        format!(
                            "parameter '{}' must be {}, got {}",
                            spec.name,
                            spec.kind.as_str(),
                            json_type(value)
                        ),
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(Value::Object(checked))
    }

    /// Compact signature for prompts, e.g. `path: string, limit?: integer`
    pub fn signature(&self) -> String {
        self.params
            .iter()
            .map(|p| {
                let marker = if p.required { "" } else { "?" };
                format!("{}{}: {}", p.name, marker, p.kind.as_str())
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Collaborator the engine calls tools through
#[async_trait]
pub trait Toolkit: Send + Sync {
    fn has_tool(&self, name: &str) -> bool;

    /// Parameter contract checked before invocation, if the tool has one
    fn schema(&self, _name: &str) -> Option<ParamSchema> {
        None
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value>;

    /// Human-readable tool listing injected into the prompt
    fn list_tools(&self) -> String;
}

/// A single tool
#[async_trait]
pub trait ToolTrait: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> ParamSchema;
    async fn execute(&self, params: Value) -> Result<Value>;
}

type BoxedTool = Box<dyn ToolTrait + Send + Sync>;

/// Tool registry
pub struct ToolRegistry {
    tools: HashMap<String, BoxedTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: ToolTrait + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.tools.insert(name, Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&(dyn ToolTrait + Send + Sync)> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Toolkit for ToolRegistry {
    fn has_tool(&self, name: &str) -> bool {
        self.has(name)
    }

    fn schema(&self, name: &str) -> Option<ParamSchema> {
        self.get(name).map(|tool| tool.schema())
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(params).await
    }

    fn list_tools(&self) -> String {
        if self.tools.is_empty() {
            return "(no tools available)".to_string();
        }
        self.names()
            .iter()
            .filter_map(|name| self.get(name))
            .map(|tool| {
                format!(
                    "- {}({}): {}",
                    tool.name(),
                    tool.schema().signature(),
                    tool.description()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Register the built-in workspace-confined tools
pub fn register_default_tools(
    registry: &mut ToolRegistry,
    workspace: &Path,
    exec_timeout: Duration,
) {
    registry.register(ReadFileTool::new(workspace.to_path_buf()));
    registry.register(WriteFileTool::new(workspace.to_path_buf()));
    registry.register(ListDirTool::new(workspace.to_path_buf()));
    registry.register(ExecTool::new(exec_timeout, workspace.to_path_buf()));
    registry.register(CurrentTimeTool);
}
