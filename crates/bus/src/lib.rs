//! Lifecycle event bus
//!
//! Fan-out of execution events to loggers, memory writers or UIs. Listeners
//! run synchronously in registration order over a snapshot of the registry,
//! and a failing listener never changes the outcome of an execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Listener failures
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("LISTENER CHANNEL CLOSED")]
    Closed,

    #[error("LISTENER FAILED: {0}")]
    Failed(String),
}

/// Discriminant of an [`AgentEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ExecutionStart,
    ThoughtStart,
    StreamChunk,
    ThoughtEnd,
    ActionStart,
    ToolConfirmation,
    ActionEnd,
    ExecutionEnd,
    Error,
}

/// Event emitted during one invocation of the reasoning loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEvent {
    ExecutionStart {
        execution_id: String,
        input: String,
    },
    ThoughtStart {
        execution_id: String,
        iteration: u32,
    },
    /// Partial model output, only when streaming is enabled
    StreamChunk {
        execution_id: String,
        iteration: u32,
        chunk: String,
    },
    ThoughtEnd {
        execution_id: String,
        iteration: u32,
        content: String,
        has_action: bool,
        thinking_time_ms: u64,
    },
    ActionStart {
        execution_id: String,
        tool: String,
        params: Value,
    },
    ToolConfirmation {
        execution_id: String,
        tool: String,
        params: Value,
    },
    ActionEnd {
        execution_id: String,
        tool: String,
        status: String,
        observation: String,
        duration_ms: u64,
    },
    ExecutionEnd {
        execution_id: String,
        reason: String,
        output: String,
        total_time_ms: u64,
    },
    Error {
        execution_id: String,
        message: String,
        total_time_ms: u64,
    },
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ExecutionStart { .. } => EventKind::ExecutionStart,
            Self::ThoughtStart { .. } => EventKind::ThoughtStart,
            Self::StreamChunk { .. } => EventKind::StreamChunk,
            Self::ThoughtEnd { .. } => EventKind::ThoughtEnd,
            Self::ActionStart { .. } => EventKind::ActionStart,
            Self::ToolConfirmation { .. } => EventKind::ToolConfirmation,
            Self::ActionEnd { .. } => EventKind::ActionEnd,
            Self::ExecutionEnd { .. } => EventKind::ExecutionEnd,
            Self::Error { .. } => EventKind::Error,
        }
    }

    pub fn execution_id(&self) -> &str {
        match self {
            Self::ExecutionStart { execution_id, .. }
            | Self::ThoughtStart { execution_id, .. }
            | Self::StreamChunk { execution_id, .. }
            | Self::ThoughtEnd { execution_id, .. }
            | Self::ActionStart { execution_id, .. }
            | Self::ToolConfirmation { execution_id, .. }
            | Self::ActionEnd { execution_id, .. }
            | Self::ExecutionEnd { execution_id, .. }
            | Self::Error { execution_id, .. } => execution_id,
        }
    }

    /// Whether this event closes an invocation
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ExecutionEnd { .. } | Self::Error { .. })
    }
}

/// Receives events synchronously on the emitting task
pub trait EventListener: Send + Sync {
    fn name(&self) -> &str {
        "listener"
    }

    fn on_event(&self, event: &AgentEvent) -> Result<(), ListenerError>;
}

/// Adapter for closure listeners
pub struct FnListener<F> {
    name: String,
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&AgentEvent) -> Result<(), ListenerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&AgentEvent) -> Result<(), ListenerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &AgentEvent) -> Result<(), ListenerError> {
        (self.f)(event)
    }
}

pub type EventSender = mpsc::UnboundedSender<AgentEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<AgentEvent>;

/// Forwards every event into an unbounded channel
pub struct ChannelListener {
    sender: EventSender,
}

impl ChannelListener {
    pub fn new(sender: EventSender) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventListener for ChannelListener {
    fn name(&self) -> &str {
        "channel"
    }

    fn on_event(&self, event: &AgentEvent) -> Result<(), ListenerError> {
        self.sender
            .send(event.clone())
            .map_err(|_| ListenerError::Closed)
    }
}

/// Logs every event through `tracing` at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl EventListener for TracingListener {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_event(&self, event: &AgentEvent) -> Result<(), ListenerError> {
        match event {
            AgentEvent::StreamChunk { .. } => {
                trace!(execution_id = event.execution_id(), "◆ {:?}", event.kind())
            }
            AgentEvent::ActionStart { tool, .. } | AgentEvent::ToolConfirmation { tool, .. } => {
                debug!(execution_id = event.execution_id(), tool = %tool, "◆ {:?}", event.kind())
            }
            AgentEvent::ActionEnd { tool, status, .. } => {
                debug!(
                    execution_id = event.execution_id(),
                    tool = %tool,
                    status = %status,
                    "◆ ACTION_END"
                )
            }
            AgentEvent::ExecutionEnd { reason, .. } => {
                debug!(execution_id = event.execution_id(), reason = %reason, "◆ EXECUTION_END")
            }
            _ => debug!(execution_id = event.execution_id(), "◆ {:?}", event.kind()),
        }
        Ok(())
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    listener: Arc<dyn EventListener>,
}

/// Ordered listener registry
///
/// Cloning shares the registry. Registration and removal take a write lock,
/// emission iterates over a snapshot so listeners may (un)subscribe from
/// inside a callback without deadlocking.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Registration>>>,
    next_id: Arc<AtomicU64>,
    debug: bool,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log listener failures at warn level
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        trace!("◆ LISTENER {} SUBSCRIBED AS {:?}", listener.name(), id);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration { id, listener });
        id
    }

    pub fn subscribe_fn<F>(&self, name: impl Into<String>, f: F) -> ListenerId
    where
        F: Fn(&AgentEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnListener::new(name, f)))
    }

    /// Register a [`ChannelListener`] and hand back its receiving end
    pub fn subscribe_channel(&self) -> (ListenerId, EventReceiver) {
        let (listener, rx) = ChannelListener::channel();
        (self.subscribe(Arc::new(listener)), rx)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver `event` to every listener; returns how many failed
    pub fn emit(&self, event: &AgentEvent) -> usize {
        let snapshot: Vec<Arc<dyn EventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| Arc::clone(&r.listener))
            .collect();

        let mut failures = 0;
        for listener in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("listener panicked".to_string()),
            };
            if let Some(reason) = failure {
                failures += 1;
                if self.debug {
                    warn!(
                        listener = listener.name(),
                        event = ?event.kind(),
                        "◆ LISTENER FAILURE: {}",
                        reason
                    );
                }
            }
        }
        failures
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("debug", &self.debug)
            .finish()
    }
}
