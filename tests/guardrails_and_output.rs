//! Input/output guardrails and structured outputs, seen through whole runs.

use agent_relay::guardrail::{
    FnGuardrail, GuardrailResult, MaxLengthGuardrail, PatternBlockGuardrail, RegexRedactGuardrail,
};
use agent_relay::hooks::AgentHooks;
use agent_relay::model::ScriptedProvider;
use agent_relay::{
    structured_output, Agent, AgentsError, ModelResponse, OutputType, Result, RunConfig, Runner,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

#[structured_output]
#[derive(Debug, PartialEq)]
struct Verdict {
    label: String,
    score: f64,
}

fn config(provider: &Arc<ScriptedProvider>) -> RunConfig {
    RunConfig::default().with_provider(provider.clone())
}

#[tokio::test]
async fn test_input_guardrail_blocks_before_any_model_call() {
    let provider = Arc::new(ScriptedProvider::new(vec![ModelResponse::new_message("hi")]));
    let agent = Agent::simple("A", "a").with_input_guardrail(Arc::new(MaxLengthGuardrail::new(10)));

    let err = Runner::run(agent, "this input is far too long", config(&provider))
        .await
        .unwrap_err();

    match &err.error {
        AgentsError::GuardrailTripwire { guardrail, message } => {
            assert_eq!(guardrail, "MaxLength_10");
            assert!(message.contains("10"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(provider.call_count(), 0);
    assert_eq!(err.turns, 0);
}

#[tokio::test]
async fn test_input_guardrails_run_in_order() {
    let provider = Arc::new(ScriptedProvider::new(vec![ModelResponse::new_message("hi")]));
    let agent = Agent::simple("A", "a")
        .with_input_guardrail(Arc::new(FnGuardrail::new("first", |_| {
            Ok(GuardrailResult::block("first says no"))
        })))
        .with_input_guardrail(Arc::new(FnGuardrail::new("second", |_| {
            Ok(GuardrailResult::block("second says no"))
        })));

    let err = Runner::run(agent, "hello", config(&provider)).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "Guardrail tripwire triggered by 'first': first says no"
    );
}

#[tokio::test]
async fn test_output_rewrites_chain() {
    let provider = Arc::new(ScriptedProvider::new(vec![ModelResponse::new_message(
        "Call me at 555-1234.",
    )]));
    let agent = Agent::simple("A", "a")
        .with_output_guardrail(Arc::new(
            RegexRedactGuardrail::new("phone", r"\d{3}-\d{4}", "[redacted]").unwrap(),
        ))
        .with_output_guardrail(Arc::new(FnGuardrail::new("shout", |text| {
            Ok(GuardrailResult::rewrite(text.to_uppercase()))
        })));

    let result = Runner::run(agent, "number?", config(&provider)).await.unwrap();

    assert_eq!(result.final_output, "CALL ME AT [REDACTED].");
    // history keeps what the model actually said
    assert_eq!(result.history[1].content, "Call me at 555-1234.");
}

#[tokio::test]
async fn test_output_guardrail_blocks() {
    let provider = Arc::new(ScriptedProvider::new(vec![ModelResponse::new_message(
        "the password is hunter2",
    )]));
    let agent = Agent::simple("A", "a").with_output_guardrail(Arc::new(PatternBlockGuardrail::new(
        "secrets",
        vec!["password".to_string()],
    )));

    let err = Runner::run(agent, "tell me", config(&provider)).await.unwrap_err();

    assert!(matches!(err.error, AgentsError::GuardrailTripwire { ref guardrail, .. } if guardrail == "secrets"));
    assert_eq!(err.turns, 1);
    assert_eq!(err.history.len(), 2);
}

#[tokio::test]
async fn test_structured_output_round_trip() {
    let provider = Arc::new(ScriptedProvider::new(vec![ModelResponse::new_message(
        r#"{"label": "positive", "score": 0.9}"#,
    )]));
    let agent = Agent::simple("Classifier", "Classify the sentiment.")
        .with_output_type(OutputType::of::<Verdict>());

    let result = Runner::run(agent, "I love it", config(&provider)).await.unwrap();

    let verdict: Verdict = result.structured_as().unwrap().unwrap();
    assert_eq!(
        verdict,
        Verdict {
            label: "positive".to_string(),
            score: 0.9
        }
    );

    // the system message asks for the schema
    let system = &provider.requests()[0].messages[0].content;
    assert!(system.starts_with("Classify the sentiment."));
    assert!(system.contains("Respond only with JSON matching this schema"));
    assert!(system.contains("\"label\""));
}

#[tokio::test]
async fn test_rewrite_leaves_structured_value_alone() {
    let provider = Arc::new(ScriptedProvider::new(vec![ModelResponse::new_message(
        r#"{"answer": "42"}"#,
    )]));
    let agent = Agent::simple("A", "a")
        .with_output_type(OutputType::json_schema(
            "Answer",
            json!({
                "type": "object",
                "properties": {"answer": {"type": "string"}},
                "required": ["answer"]
            }),
        ))
        .with_output_guardrail(Arc::new(FnGuardrail::new("wrap", |_| {
            Ok(GuardrailResult::rewrite("redacted"))
        })));

    let result = Runner::run(agent, "q", config(&provider)).await.unwrap();

    assert_eq!(result.final_output, "redacted");
    assert_eq!(result.structured_output, Some(json!({"answer": "42"})));
}

#[tokio::test]
async fn test_invalid_structured_output() {
    let provider = Arc::new(ScriptedProvider::new(vec![ModelResponse::new_message(
        "definitely not json",
    )]));
    let agent = Agent::simple("Classifier", "Classify").with_output_type(OutputType::of::<Verdict>());

    let err = Runner::run(agent, "I love it", config(&provider)).await.unwrap_err();

    assert!(matches!(err.error, AgentsError::InvalidOutputFormat { .. }));
    assert_eq!(err.history.len(), 2);
}

#[tokio::test]
async fn test_schema_violation_in_structured_output() {
    let provider = Arc::new(ScriptedProvider::new(vec![ModelResponse::new_message(
        r#"{"score": 3}"#,
    )]));
    let agent = Agent::simple("A", "a").with_output_type(OutputType::json_schema(
        "Answer",
        json!({"type": "object", "required": ["answer"]}),
    ));

    let err = Runner::run(agent, "q", config(&provider)).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "Invalid output format: missing required field: answer"
    );
}

#[derive(Default)]
struct EndCapture {
    ends: Mutex<Vec<(String, Option<Value>)>>,
}

#[async_trait]
impl AgentHooks for EndCapture {
    async fn on_end(&self, _agent: &Agent, output: &str, structured: Option<&Value>) -> Result<()> {
        self.ends
            .lock()
            .push((output.to_string(), structured.cloned()));
        Ok(())
    }
}

#[tokio::test]
async fn test_on_end_receives_structured_value() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ModelResponse::new_message(r#"{"label": "negative", "score": 0.1}"#),
        ModelResponse::new_message("plain answer"),
    ]));
    let hooks = Arc::new(EndCapture::default());

    let typed = Agent::simple("Classifier", "Classify")
        .with_output_type(OutputType::of::<Verdict>())
        .with_hooks(hooks.clone());
    Runner::run(typed, "meh", config(&provider)).await.unwrap();

    let plain = Agent::simple("Plain", "Answer").with_hooks(hooks.clone());
    Runner::run(plain, "q", config(&provider)).await.unwrap();

    assert_eq!(
        *hooks.ends.lock(),
        vec![
            (
                r#"{"label": "negative", "score": 0.1}"#.to_string(),
                Some(json!({"label": "negative", "score": 0.1}))
            ),
            ("plain answer".to_string(), None),
        ]
    );
}
