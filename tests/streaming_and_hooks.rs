//! Streamed runs, lifecycle hook ordering and trace export.

use agent_relay::handoff::SimpleHandoff;
use agent_relay::hooks::AgentHooks;
use agent_relay::model::ScriptedProvider;
use agent_relay::tool::{FunctionTool, Tool};
use agent_relay::tracing::{InMemoryExporter, SpanType};
use agent_relay::{Agent, ModelResponse, Result, RunConfig, RunEvent, Runner, ToolCall};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::sync::Arc;

#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl AgentHooks for Journal {
    async fn on_start(&self, agent: &Agent) -> Result<()> {
        self.entries.lock().push(format!("start {}", agent.name()));
        Ok(())
    }

    async fn on_end(&self, agent: &Agent, output: &str, _structured: Option<&Value>) -> Result<()> {
        self.entries
            .lock()
            .push(format!("end {} {}", agent.name(), output));
        Ok(())
    }

    async fn on_handoff(&self, next: &Agent, previous: &Agent) -> Result<()> {
        self.entries
            .lock()
            .push(format!("handoff {} -> {}", previous.name(), next.name()));
        Ok(())
    }

    async fn on_tool_start(&self, agent: &Agent, tool: &dyn Tool) -> Result<()> {
        self.entries
            .lock()
            .push(format!("tool_start {} {}", agent.name(), tool.name()));
        Ok(())
    }

    async fn on_tool_end(&self, agent: &Agent, tool: &dyn Tool, result: &str) -> Result<()> {
        self.entries
            .lock()
            .push(format!("tool_end {} {} {}", agent.name(), tool.name(), result));
        Ok(())
    }
}

fn script() -> Vec<ModelResponse> {
    vec![
        ModelResponse::new_tool_calls(vec![ToolCall::new("t1", "echo", r#"{"input":"ping"}"#)]),
        ModelResponse::new_tool_calls(vec![ToolCall::new("h1", "transfer_to_closer", "{}")]),
        ModelResponse::new_message("all done"),
    ]
}

fn agents(journal: &Arc<Journal>) -> Agent {
    let closer = Agent::simple("Closer", "Wrap up.").with_hooks(journal.clone());
    Agent::simple("Opener", "Start things.")
        .with_tool(Arc::new(FunctionTool::simple("echo", "Echo", |s| s)))
        .with_handoff(Arc::new(SimpleHandoff::new(closer, "")))
        .with_hooks(journal.clone())
}

#[tokio::test]
async fn test_hooks_fire_in_lifecycle_order() {
    let journal = Arc::new(Journal::default());
    let provider = Arc::new(ScriptedProvider::new(script()));

    Runner::run(
        agents(&journal),
        "hello",
        RunConfig::default().with_provider(provider),
    )
    .await
    .unwrap();

    assert_eq!(
        journal.entries(),
        vec![
            "start Opener",
            "tool_start Opener echo",
            "tool_end Opener echo ping",
            "handoff Opener -> Closer",
            "start Closer",
            "end Closer all done",
        ]
    );
}

#[tokio::test]
async fn test_streamed_run_reports_progress() {
    let journal = Arc::new(Journal::default());
    let provider = Arc::new(ScriptedProvider::new(script()));

    let events: Vec<RunEvent> = Runner::run_streamed(
        agents(&journal),
        "hello",
        RunConfig::default().with_provider(provider),
    )
    .collect()
    .await;

    let summary: Vec<String> = events
        .iter()
        .map(|event| match event {
            RunEvent::TurnStarted { turn, agent } => format!("turn {turn} {agent}"),
            RunEvent::MessageDelta { delta } => format!("delta {delta}"),
            RunEvent::ToolCalled { call, .. } => format!("call {}", call.name),
            RunEvent::ToolOutput { tool, output, .. } => format!("output {tool} {output}"),
            RunEvent::Handoff { from, to } => format!("handoff {from} -> {to}"),
            RunEvent::Completed(result) => format!("completed {}", result.final_output),
            RunEvent::Failed(err) => format!("failed {err}"),
        })
        .collect();

    assert_eq!(
        summary,
        vec![
            "turn 1 Opener",
            "call echo",
            "output echo ping",
            "turn 2 Opener",
            "handoff Opener -> Closer",
            "turn 3 Closer",
            "delta all done",
            "completed all done",
        ]
    );
}

#[tokio::test]
async fn test_streamed_failure_is_the_last_event() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));

    let events: Vec<RunEvent> = Runner::run_streamed(
        Agent::simple("A", "a"),
        "hello",
        RunConfig::default().with_provider(provider),
    )
    .collect()
    .await;

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], RunEvent::TurnStarted { turn: 1, .. }));
    match &events[1] {
        RunEvent::Failed(err) => {
            assert_eq!(err.to_string(), "Model behavior error: no scripted response left")
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_trace_covers_every_step() {
    let journal = Arc::new(Journal::default());
    let provider = Arc::new(ScriptedProvider::new(script()));
    let exporter = Arc::new(InMemoryExporter::new());

    let result = Runner::run(
        agents(&journal),
        "hello",
        RunConfig::default()
            .with_provider(provider)
            .with_exporter(exporter.clone()),
    )
    .await
    .unwrap();

    let spans = exporter.last_spans();
    assert!(spans.iter().all(|s| !s.is_open()));
    assert!(spans.iter().all(|s| s.trace_id == result.trace_id));

    let labels: Vec<&str> = spans.iter().map(|s| s.span_type.label()).collect();
    assert_eq!(
        labels,
        vec![
            "run",
            "turn",
            "generation",
            "tool",
            "turn",
            "generation",
            "handoff",
            "turn",
            "generation",
        ]
    );

    let handoff = spans
        .iter()
        .find(|s| matches!(s.span_type, SpanType::Handoff { .. }))
        .unwrap();
    assert_eq!(
        handoff.span_type,
        SpanType::Handoff {
            from: "Opener".to_string(),
            to: "Closer".to_string()
        }
    );
    // the tool span nests under the first turn
    assert_eq!(spans[3].parent_id.as_ref(), Some(&spans[1].id));
}

#[tokio::test]
async fn test_failed_run_marks_spans() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let exporter = Arc::new(InMemoryExporter::new());

    let _ = Runner::run(
        Agent::simple("A", "a"),
        "hello",
        RunConfig::default()
            .with_provider(provider)
            .with_exporter(exporter.clone()),
    )
    .await
    .unwrap_err();

    let spans = exporter.last_spans();
    assert_eq!(spans.len(), 3);
    assert!(spans.iter().all(|s| s.error.is_some()));
    assert!(spans.iter().all(|s| !s.is_open()));
}
