//! Shared fakes for the agent integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reagent_agent::tools::{ParamKind, ParamSchema, ToolError, Toolkit};
use reagent_agent::{AgentResponse, ExecutionContext, Plugin, PluginResult};
use reagent_bus::{AgentEvent, EventBus, EventKind};
use reagent_provider::{ChatRequest, ChatResponse, ModelClient, ProviderError};

struct Reply {
    delay: Duration,
    result: Result<ChatResponse, ProviderError>,
}

/// Model client that plays back a fixed script of replies
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(self, content: &str) -> Self {
        self.push(Duration::ZERO, Ok(ChatResponse::text(content)))
    }

    pub fn say_after(self, delay: Duration, content: &str) -> Self {
        self.push(delay, Ok(ChatResponse::text(content)))
    }

    pub fn fail(self, error: ProviderError) -> Self {
        self.push(Duration::ZERO, Err(error))
    }

    fn push(self, delay: Duration, result: Result<ChatResponse, ProviderError>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply { delay, result });
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn chat(&self, request: ChatRequest) -> reagent_provider::Result<ChatResponse> {
        self.requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(reply) => {
                if !reply.delay.is_zero() {
                    tokio::time::sleep(reply.delay).await;
                }
                reply.result
            }
            None => Ok(ChatResponse::text("script exhausted")),
        }
    }

    fn default_model(&self) -> String {
        "scripted".to_string()
    }
}

/// Toolkit with a handful of canned tools:
/// `echo` returns its `text`, `ok` returns `{"result":"ok"}`,
/// `broken` fails with "disk full", `slow` sleeps for a minute
#[derive(Default)]
pub struct FakeToolkit {
    calls: Mutex<Vec<(String, Value)>>,
}

impl FakeToolkit {
    const TOOLS: &'static [&'static str] = &["broken", "echo", "ok", "slow"];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Toolkit for FakeToolkit {
    fn has_tool(&self, name: &str) -> bool {
        Self::TOOLS.contains(&name)
    }

    fn schema(&self, name: &str) -> Option<ParamSchema> {
        match name {
            "echo" => Some(ParamSchema::new().required("text", ParamKind::String, "text to echo")),
            _ => None,
        }
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), params.clone()));
        match name {
            "echo" => Ok(params["text"].clone()),
            "ok" => Ok(json!({"result": "ok"})),
            "broken" => Err(ToolError::Execution("disk full".to_string())),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!("finally"))
            }
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }

    fn list_tools(&self) -> String {
        Self::TOOLS
            .iter()
            .map(|name| format!("- {}", name))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Plugin that records which hooks ran and optionally fails each one
pub struct RecordingPlugin {
    pub calls: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingPlugin {
    pub fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail,
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn hit(&self, hook: String) -> PluginResult {
        self.calls.lock().unwrap().push(hook);
        if self.fail {
            Err("plugin exploded".into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        "recording"
    }

    async fn before_execution(&self, _ctx: &ExecutionContext) -> PluginResult {
        self.hit("before".to_string())
    }

    async fn after_execution(
        &self,
        _ctx: &ExecutionContext,
        response: &AgentResponse,
    ) -> PluginResult {
        self.hit(format!("after:{}", response.status))
    }

    async fn on_error(&self, _ctx: &ExecutionContext, message: &str) -> PluginResult {
        self.hit(format!("error:{}", message))
    }
}

/// Subscribe a listener that records every event
pub fn record_events(bus: &EventBus) -> Arc<Mutex<Vec<AgentEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    bus.subscribe_fn("recorder", move |event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });
    events
}

pub fn kinds(events: &Mutex<Vec<AgentEvent>>) -> Vec<EventKind> {
    events.lock().unwrap().iter().map(AgentEvent::kind).collect()
}
