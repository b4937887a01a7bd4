//! Running counters over finished executions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::types::{ExecutionHistory, ReasonCode};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub average_execution_time_ms: f64,
    pub tool_usage: HashMap<String, u64>,
    pub llm_calls: u64,
}

impl Stats {
    /// Fold one finished execution into the counters
    pub fn record(&mut self, history: &ExecutionHistory, reason: ReasonCode) {
        self.total_executions += 1;
        if reason.is_success() {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }

        let n = self.total_executions as f64;
        let sample = history.performance.total_time_ms as f64;
        self.average_execution_time_ms =
            (self.average_execution_time_ms * (n - 1.0) + sample) / n;

        for step in &history.steps {
            *self.tool_usage.entry(step.action.tool.clone()).or_insert(0) += 1;
        }
        self.llm_calls += history.thoughts.len() as u64;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.successful_executions as f64 / self.total_executions as f64
        }
    }
}

/// Shared [`Stats`] behind a lock
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<Stats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, history: &ExecutionHistory, reason: ReasonCode) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(history, reason);
    }

    pub fn snapshot(&self) -> Stats {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Stats::default();
    }
}
