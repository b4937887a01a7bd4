//! End-to-end tests for the reasoning loop

mod common;

use async_trait::async_trait;
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{kinds, record_events, FakeToolkit, RecordingPlugin, ScriptedClient};
use reagent_agent::{
    AgentError, AgentLoop, AgentLoopBuilder, AutoApprove, AutoDeny, ReasonCode, ResponseType,
    StepStatus, TerminationPolicy,
};
use reagent_bus::{AgentEvent, EventBus, EventKind};
use reagent_provider::{ChatRequest, ChatResponse, ModelClient, ProviderError, RetryPolicy};

mock! {
    pub Client {}

    #[async_trait]
    impl ModelClient for Client {
        async fn chat(&self, request: ChatRequest) -> reagent_provider::Result<ChatResponse>;
        fn default_model(&self) -> String;
        fn is_configured(&self) -> bool;
    }
}

fn agent(client: Arc<ScriptedClient>, toolkit: Arc<FakeToolkit>) -> AgentLoopBuilder {
    AgentLoop::builder()
        .client(client)
        .toolkit(toolkit)
        .retry_policy(RetryPolicy::none())
        .working_directory(std::env::temp_dir())
}

#[tokio::test]
async fn test_direct_answer_finishes_in_one_iteration() {
    let mut client = MockClient::new();
    client
        .expect_chat()
        .times(1)
        .returning(|_| Ok(ChatResponse::text("The answer is 42.")));

    let agent = AgentLoop::builder()
        .client(Arc::new(client))
        .working_directory(std::env::temp_dir())
        .build()
        .unwrap();

    let response = agent.run("what is the answer?", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::Success);
    assert_eq!(response.response_type, ResponseType::Final);
    assert_eq!(response.content, "The answer is 42.");
    assert_eq!(response.metadata.iterations, 1);
    assert_eq!(response.metadata.total_steps, 0);
    assert_eq!(response.metadata.llm_calls, 1);

    let history = agent.last_history().unwrap();
    assert_eq!(history.thoughts.len(), 1);
    assert!(history.steps.is_empty());
    assert_eq!(history.finish.unwrap().reason, ReasonCode::Success);
}

#[tokio::test]
async fn test_request_carries_system_prompt_and_input() {
    let client = Arc::new(ScriptedClient::new().say("hi"));
    let agent = agent(Arc::clone(&client), Arc::new(FakeToolkit::new()))
        .build()
        .unwrap();

    agent.run("hello there", &CancellationToken::new()).await;

    let requests = client.requests();
    assert_eq!(requests.len(), 1);
    let messages = &requests[0].messages;
    assert_eq!(messages[0].role, "system");
    assert!(messages[0].content.contains("- echo"));
    assert_eq!(messages[1].role, "user");
    assert_eq!(messages[1].content, "hello there");
}

#[tokio::test]
async fn test_structured_result_is_unwrapped() {
    let client = Arc::new(
        ScriptedClient::new()
            .say(r#"Let me check. {"tool": "ok", "params": {}, "reason": "inspect"}"#),
    );
    let toolkit = Arc::new(FakeToolkit::new());
    let agent = agent(client, Arc::clone(&toolkit)).build().unwrap();

    let response = agent.run("check", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::Success);
    assert_eq!(response.response_type, ResponseType::Action);
    assert_eq!(response.content, "ok");
    assert_eq!(response.metadata.total_steps, 1);
    assert_eq!(response.metadata.tool_calls, 1);
    assert_eq!(toolkit.calls().len(), 1);

    let history = agent.last_history().unwrap();
    assert_eq!(history.steps[0].status, StepStatus::Completed);
    assert_eq!(history.steps[0].observation, r#"{"result":"ok"}"#);
    assert_eq!(history.thoughts[0].reasoning, "Let me check.");
}

#[tokio::test]
async fn test_tool_failure_becomes_error_response() {
    let client = Arc::new(ScriptedClient::new().say(r#"{"tool":"broken","params":{}}"#));
    let agent = agent(client, Arc::new(FakeToolkit::new())).build().unwrap();

    let response = agent.run("break it", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::Error);
    assert!(response.is_error());
    assert!(response.content.contains("disk full"));

    let history = agent.last_history().unwrap();
    assert_eq!(history.steps.len(), 1);
    assert_eq!(history.steps[0].status, StepStatus::Failed);
    assert_eq!(history.steps[0].error.as_deref(), Some("disk full"));
}

#[tokio::test]
async fn test_unknown_tool_is_failed_step() {
    let client = Arc::new(ScriptedClient::new().say(r#"{"tool":"nope","params":{}}"#));
    let toolkit = Arc::new(FakeToolkit::new());
    let agent = agent(client, Arc::clone(&toolkit)).build().unwrap();

    let response = agent.run("x", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::Error);
    assert_eq!(response.content, "tool not found: nope");
    assert!(toolkit.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_params_never_reach_tool() {
    let client = Arc::new(ScriptedClient::new().say(r#"{"tool":"echo","params":{"text":5}}"#));
    let toolkit = Arc::new(FakeToolkit::new());
    let agent = agent(client, Arc::clone(&toolkit)).build().unwrap();

    let response = agent.run("x", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::Error);
    assert!(
        response.content.contains("parameter 'text' must be string"),
        "unexpected content: {}",
        response.content
    );
    assert!(toolkit.calls().is_empty());
}

#[tokio::test]
async fn test_max_iterations_bound() {
    let client = Arc::new(
        ScriptedClient::new()
            .say(r#"{"tool":"echo","params":{"text":"one"}}"#)
            .say(r#"{"tool":"echo","params":{"text":"two"}}"#),
    );
    let agent = agent(Arc::clone(&client), Arc::new(FakeToolkit::new()))
        .termination(TerminationPolicy::UntilDone)
        .max_iterations(1)
        .build()
        .unwrap();

    let response = agent.run("loop", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::MaxIterations);
    assert_eq!(
        response.content,
        "stopped after 1 iteration(s) without a final answer"
    );
    assert_eq!(response.metadata.iterations, 1);
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn test_zero_max_iterations_is_rejected() {
    let result = AgentLoop::builder()
        .client(Arc::new(ScriptedClient::new()))
        .max_iterations(0)
        .build();

    assert!(matches!(result, Err(AgentError::InvalidSettings(_))));
}

#[tokio::test]
async fn test_missing_client_is_rejected() {
    let result = AgentLoop::builder()
        .toolkit(Arc::new(FakeToolkit::new()))
        .build();

    assert!(matches!(result, Err(AgentError::MissingModelClient)));
}

#[tokio::test]
async fn test_until_done_feeds_observations_back() {
    let client = Arc::new(
        ScriptedClient::new()
            .say(r#"{"tool":"echo","params":{"text":"first"}}"#)
            .say(r#"{"tool":"echo","params":{"text":"second"},"done":true}"#),
    );
    let agent = agent(Arc::clone(&client), Arc::new(FakeToolkit::new()))
        .termination(TerminationPolicy::UntilDone)
        .build()
        .unwrap();

    let response = agent.run("twice", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::Success);
    assert_eq!(response.content, "second");
    assert_eq!(response.metadata.iterations, 2);
    assert_eq!(response.metadata.total_steps, 2);

    let second = &client.requests()[1].messages;
    let last = second.last().unwrap();
    assert_eq!(last.role, "user");
    assert_eq!(last.content, "tool result: first");
}

#[tokio::test]
async fn test_until_done_ends_on_direct_answer() {
    let client = Arc::new(
        ScriptedClient::new()
            .say(r#"{"tool":"echo","params":{"text":"data"}}"#)
            .say("All done, the data was echoed."),
    );
    let agent = agent(client, Arc::new(FakeToolkit::new()))
        .termination(TerminationPolicy::UntilDone)
        .build()
        .unwrap();

    let response = agent.run("go", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::Success);
    assert_eq!(response.response_type, ResponseType::Final);
    assert_eq!(response.content, "All done, the data was echoed.");
}

#[tokio::test]
async fn test_confirmation_denied() {
    let client = Arc::new(ScriptedClient::new().say(r#"{"tool":"ok","params":{}}"#));
    let toolkit = Arc::new(FakeToolkit::new());
    let agent = agent(client, Arc::clone(&toolkit))
        .confirmation(Arc::new(AutoDeny))
        .build()
        .unwrap();

    let response = agent.run("try", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::Error);
    assert!(response.content.contains("cancelled"));
    assert!(toolkit.calls().is_empty());
    let history = agent.last_history().unwrap();
    assert_eq!(history.steps[0].status, StepStatus::Failed);
}

#[tokio::test]
async fn test_required_confirmation_without_handler_denies() {
    let client = Arc::new(ScriptedClient::new().say(r#"{"tool":"ok","params":{}}"#));
    let toolkit = Arc::new(FakeToolkit::new());
    let agent = agent(client, Arc::clone(&toolkit))
        .require_confirmation(true)
        .build()
        .unwrap();

    let response = agent.run("try", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::Error);
    assert!(toolkit.calls().is_empty());
}

#[tokio::test]
async fn test_event_order_with_confirmation() {
    let bus = EventBus::new();
    let events = record_events(&bus);
    let client = Arc::new(ScriptedClient::new().say(r#"{"tool":"ok","params":{}}"#));
    let agent = agent(client, Arc::new(FakeToolkit::new()))
        .bus(bus)
        .confirmation(Arc::new(AutoApprove))
        .build()
        .unwrap();

    let response = agent.run("go", &CancellationToken::new()).await;

    assert_eq!(
        kinds(&events),
        vec![
            EventKind::ExecutionStart,
            EventKind::ThoughtStart,
            EventKind::ThoughtEnd,
            EventKind::ActionStart,
            EventKind::ToolConfirmation,
            EventKind::ActionEnd,
            EventKind::ExecutionEnd,
        ]
    );
    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .all(|event| event.execution_id() == response.execution_id));
    match &events[5] {
        AgentEvent::ActionEnd { tool, status, .. } => {
            assert_eq!(tool, "ok");
            assert_eq!(status, "completed");
        }
        other => panic!("expected ACTION_END, got {:?}", other),
    }
    match &events[6] {
        AgentEvent::ExecutionEnd { reason, output, .. } => {
            assert_eq!(reason, "success");
            assert_eq!(output, "ok");
        }
        other => panic!("expected EXECUTION_END, got {:?}", other),
    }
}

#[tokio::test]
async fn test_error_event_replaces_execution_end() {
    let bus = EventBus::new();
    let events = record_events(&bus);
    let client = Arc::new(ScriptedClient::new().say(r#"{"tool":"broken","params":{}}"#));
    let agent = agent(client, Arc::new(FakeToolkit::new()))
        .bus(bus)
        .build()
        .unwrap();

    agent.run("go", &CancellationToken::new()).await;

    let kinds = kinds(&events);
    assert_eq!(kinds.last(), Some(&EventKind::Error));
    assert!(!kinds.contains(&EventKind::ExecutionEnd));
}

#[tokio::test]
async fn test_streaming_emits_chunks() {
    let bus = EventBus::new();
    let events = record_events(&bus);
    let client = Arc::new(ScriptedClient::new().say("streamed answer"));
    let agent = agent(client, Arc::new(FakeToolkit::new()))
        .bus(bus)
        .streaming(true)
        .build()
        .unwrap();

    let response = agent.run("stream", &CancellationToken::new()).await;
    assert_eq!(response.content, "streamed answer");

    let chunks: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            AgentEvent::StreamChunk { chunk, iteration, .. } => {
                assert_eq!(*iteration, 1);
                Some(chunk.clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec!["streamed answer"]);
}

#[tokio::test]
async fn test_model_failure_becomes_error_response() {
    let client =
        Arc::new(ScriptedClient::new().fail(ProviderError::Unauthorized("bad key".into())));
    let agent = agent(client, Arc::new(FakeToolkit::new())).build().unwrap();

    let response = agent.run("x", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::Error);
    assert_eq!(response.response_type, ResponseType::Error);
    assert!(response.content.contains("UNAUTHORIZED: bad key"));
}

#[tokio::test]
async fn test_model_failure_still_closes_thought() {
    let bus = EventBus::new();
    let events = record_events(&bus);
    let client =
        Arc::new(ScriptedClient::new().fail(ProviderError::Unauthorized("bad key".into())));
    let agent = agent(client, Arc::new(FakeToolkit::new()))
        .bus(bus)
        .build()
        .unwrap();

    agent.run("x", &CancellationToken::new()).await;

    assert_eq!(
        kinds(&events),
        vec![
            EventKind::ExecutionStart,
            EventKind::ThoughtStart,
            EventKind::ThoughtEnd,
            EventKind::Error,
        ]
    );
    match &events.lock().unwrap()[2] {
        AgentEvent::ThoughtEnd {
            iteration,
            content,
            has_action,
            ..
        } => {
            assert_eq!(*iteration, 1);
            assert!(content.is_empty());
            assert!(!has_action);
        }
        other => panic!("expected THOUGHT_END, got {:?}", other),
    };
}

#[tokio::test]
async fn test_empty_input_is_rejected_by_gateway() {
    let client = Arc::new(ScriptedClient::new());
    let agent = agent(Arc::clone(&client), Arc::new(FakeToolkit::new()))
        .build()
        .unwrap();

    let response = agent.run("", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::Error);
    assert!(response.content.contains("INVALID MODEL REQUEST"));
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let client = Arc::new(ScriptedClient::new().say("never"));
    let agent = agent(Arc::clone(&client), Arc::new(FakeToolkit::new()))
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let response = agent.run("x", &cancel).await;

    assert_eq!(response.status, ReasonCode::Error);
    assert_eq!(response.content, "execution cancelled");
    assert_eq!(client.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_during_tool_call() {
    let client = Arc::new(ScriptedClient::new().say(r#"{"tool":"slow","params":{}}"#));
    let agent = agent(client, Arc::new(FakeToolkit::new())).build().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let (response, _) = tokio::join!(agent.run("wait", &cancel), async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    assert_eq!(response.status, ReasonCode::Error);
    assert_eq!(response.content, "execution cancelled");
    let history = agent.last_history().unwrap();
    assert_eq!(history.steps[0].status, StepStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_between_iterations() {
    let client = Arc::new(
        ScriptedClient::new()
            .say_after(
                Duration::from_secs(2),
                r#"{"tool":"echo","params":{"text":"a"}}"#,
            )
            .say("unreachable"),
    );
    let agent = agent(Arc::clone(&client), Arc::new(FakeToolkit::new()))
        .termination(TerminationPolicy::UntilDone)
        .max_execution_time(Duration::from_secs(1))
        .build()
        .unwrap();

    let response = agent.run("slow", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::Timeout);
    assert!(response.content.starts_with("execution timed out after"));
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn test_plugins_run_and_failures_are_ignored() {
    let healthy = RecordingPlugin::new(false);
    let failing = RecordingPlugin::new(true);
    let client = Arc::new(ScriptedClient::new().say("fine"));
    let agent = agent(client, Arc::new(FakeToolkit::new()))
        .plugin(healthy.clone())
        .plugin(failing.clone())
        .debug(true)
        .build()
        .unwrap();

    let response = agent.run("x", &CancellationToken::new()).await;

    assert_eq!(response.status, ReasonCode::Success);
    assert_eq!(healthy.calls(), vec!["before", "after:success"]);
    assert_eq!(failing.calls(), vec!["before", "after:success"]);
}

#[tokio::test]
async fn test_plugin_on_error_runs_before_after() {
    let plugin = RecordingPlugin::new(false);
    let client = Arc::new(ScriptedClient::new().say(r#"{"tool":"broken","params":{}}"#));
    let agent = agent(client, Arc::new(FakeToolkit::new()))
        .plugin(plugin.clone())
        .build()
        .unwrap();

    agent.run("x", &CancellationToken::new()).await;

    assert_eq!(
        plugin.calls(),
        vec!["before", "error:disk full", "after:error"]
    );
}

#[tokio::test]
async fn test_history_limit() {
    let client = Arc::new(ScriptedClient::new().say("a").say("b").say("c"));
    let agent = agent(client, Arc::new(FakeToolkit::new()))
        .history_limit(2)
        .build()
        .unwrap();
    let cancel = CancellationToken::new();

    agent.run("1", &cancel).await;
    agent.run("2", &cancel).await;
    let third = agent.run("3", &cancel).await;

    let histories = agent.histories();
    assert_eq!(histories.len(), 2);
    assert_eq!(histories[1].execution_id, third.execution_id);
    assert_eq!(
        histories[0].finish.as_ref().map(|f| f.output.as_str()),
        Some("b")
    );
}

#[tokio::test(start_paused = true)]
async fn test_stats_accumulate() {
    let client = Arc::new(
        ScriptedClient::new()
            .say_after(Duration::from_millis(100), r#"{"tool":"ok","params":{}}"#)
            .say_after(Duration::from_millis(300), r#"{"tool":"broken","params":{}}"#),
    );
    let agent = agent(client, Arc::new(FakeToolkit::new())).build().unwrap();
    let cancel = CancellationToken::new();

    agent.run("1", &cancel).await;
    agent.run("2", &cancel).await;

    let stats = agent.stats();
    assert_eq!(stats.total_executions, 2);
    assert_eq!(stats.successful_executions, 1);
    assert_eq!(stats.failed_executions, 1);
    assert_eq!(stats.llm_calls, 2);
    assert_eq!(stats.tool_usage.get("ok"), Some(&1));
    assert_eq!(stats.tool_usage.get("broken"), Some(&1));
    assert!((stats.average_execution_time_ms - 200.0).abs() < 5.0);
    assert!((stats.success_rate() - 0.5).abs() < f64::EPSILON);

    agent.reset_stats();
    assert_eq!(agent.stats().total_executions, 0);
}
