//! Execution recorder
//!
//! Append-only log of the active invocation; finalized once with a [`Finish`].

use crate::types::{AgentStep, AgentThought, ExecutionContext, ExecutionHistory, Finish};

pub struct Recorder {
    history: ExecutionHistory,
    llm_calls: u32,
}

impl Recorder {
    pub fn new(ctx: &ExecutionContext) -> Self {
        Self {
            history: ExecutionHistory::new(ctx.execution_id.clone(), ctx.started_at),
            llm_calls: 0,
        }
    }

    pub fn record_thought(&mut self, thought: AgentThought) {
        self.history.thoughts.push(thought);
    }

    pub fn record_step(&mut self, step: AgentStep) {
        self.history.steps.push(step);
    }

    /// Count one gateway call, successful or not
    pub fn record_llm_call(&mut self) {
        self.llm_calls += 1;
    }

    /// One line per thought and step, in order
    pub fn log(&self) -> String {
        let mut lines = Vec::new();
        for (i, thought) in self.history.thoughts.iter().enumerate() {
            let summary = match &thought.planned_action {
                Some(action) => format!("action {} ({})", action.tool, action.reason),
                None => "answer".to_string(),
            };
            lines.push(format!(
                "thought {}: {} [confidence {:.2}, {} ms]",
                i + 1,
                summary,
                thought.confidence,
                thought.thinking_time_ms
            ));
            if let Some(step) = self.history.steps.get(i) {
                lines.push(format!(
                    "step {}: {} {} -> {}",
                    i + 1,
                    step.action.tool,
                    step.status,
                    step.observation
                ));
            }
        }
        lines.join("\n")
    }

    /// Close the history; `total_time_ms` comes from the context's clock
    pub fn finish(mut self, finish: Finish, ctx: &ExecutionContext) -> ExecutionHistory {
        self.history.performance.total_time_ms = ctx.elapsed().as_millis() as u64;
        self.history.performance.llm_calls = self.llm_calls;
        self.history.performance.tool_calls = self.history.steps.len() as u32;
        self.history.finish = Some(finish);
        self.history
    }
}
