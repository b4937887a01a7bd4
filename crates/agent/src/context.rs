//! Prompt assembly for the reasoning loop

use chrono::Local;
use std::path::Path;
use tracing::debug;

use reagent_provider::Message;

use crate::tools::Toolkit;
use crate::types::ExecutionContext;

/// Builds the system prompt and message list sent to the model
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    instructions: Option<String>,
}

impl ContextBuilder {
    /// Files read from the working directory and appended to the prompt
    const BOOTSTRAP_FILES: &'static [&'static str] = &["AGENT.md", "INSTRUCTIONS.md"];

    pub fn new() -> Self {
        Self::default()
    }

    /// Extra operator instructions placed after the tool listing
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub async fn build_system_prompt(
        &self,
        toolkit: &dyn Toolkit,
        ctx: &ExecutionContext,
    ) -> String {
        let mut parts = vec![self.identity(toolkit, ctx)];

        if let Some(instructions) = &self.instructions {
            parts.push(format!("# Instructions\n\n{}", instructions));
        }

        let bootstrap = Self::load_bootstrap_files(&ctx.working_directory).await;
        if !bootstrap.is_empty() {
            parts.push(bootstrap);
        }

        parts.join("\n\n---\n\n")
    }

    fn identity(&self, toolkit: &dyn Toolkit, ctx: &ExecutionContext) -> String {
        let now = Local::now().format("%Y-%m-%d %H:%M (%A)");

        format!(
            r#"# reagent

You solve tasks by reasoning step by step and calling tools when needed.

## Current Time
{}

## Working Directory
{}

## Tools
{}

## Response Format
To call a tool, reply with one JSON object:
{{"tool": "<name>", "params": {{...}}, "reason": "<why>", "done": <true if this is the last step>}}

Call at most one tool per reply. When no tool is needed, reply with the final
answer as plain text and no JSON."#,
            now,
            ctx.working_directory.display(),
            toolkit.list_tools()
        )
    }

    async fn load_bootstrap_files(dir: &Path) -> String {
        let mut parts = Vec::new();

        for filename in Self::BOOTSTRAP_FILES {
            let path = dir.join(filename);
            if !path.is_file() {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => parts.push(format!("## {}\n\n{}", filename, content.trim())),
                Err(e) => debug!("◆ SKIPPING {}: {}", filename, e),
            }
        }

        parts.join("\n\n")
    }

    /// System prompt followed by the running transcript
    pub fn build_messages(system_prompt: &str, transcript: &[Message]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(Message::system(system_prompt));
        messages.extend_from_slice(transcript);
        messages
    }

    /// Record a tool round trip in the transcript
    pub fn add_tool_exchange(transcript: &mut Vec<Message>, thought: &str, observation: &str) {
        transcript.push(Message::assistant(thought));
        transcript.push(Message::user(format!("tool result: {}", observation)));
    }
}
