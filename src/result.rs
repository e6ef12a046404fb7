//! Result types for agent execution

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::agent::Agent;
use crate::error::Result;
use crate::items::Message;
use crate::tracing::TraceId;
use crate::usage::{Usage, UsageStats};

/// The result of a successful run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The final answer, after output guardrail rewrites.
    pub final_output: String,

    /// The final answer parsed into the agent's output type, if it declares one.
    /// Guardrail rewrites do not affect it.
    pub structured_output: Option<Value>,

    /// The agent that produced the final answer.
    pub last_agent: Arc<Agent>,

    /// Every non-system message of the run, in order.
    pub history: Vec<Message>,

    pub usage: Usage,

    pub usage_stats: UsageStats,

    /// Completed model calls.
    pub turns: usize,

    pub trace_id: TraceId,
}

impl RunResult {
    pub fn last_agent_name(&self) -> &str {
        self.last_agent.name()
    }

    /// Deserializes the structured output; `None` when the agent declared no output type.
    pub fn structured_as<T: DeserializeOwned>(&self) -> Option<Result<T>> {
        self.structured_output
            .clone()
            .map(|value| serde_json::from_value(value).map_err(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        answer: String,
    }

    fn result(structured: Option<Value>) -> RunResult {
        RunResult {
            final_output: "done".to_string(),
            structured_output: structured,
            last_agent: Arc::new(Agent::simple("Finisher", "finish")),
            history: vec![Message::user("go"), Message::assistant("done")],
            usage: Usage::new(10, 5),
            usage_stats: UsageStats::new(),
            turns: 1,
            trace_id: "trace".to_string(),
        }
    }

    #[test]
    fn test_structured_as() {
        let res = result(Some(json!({"answer": "42"})));
        let answer: Answer = res.structured_as().unwrap().unwrap();
        assert_eq!(answer, Answer { answer: "42".to_string() });
        assert_eq!(res.last_agent_name(), "Finisher");

        assert!(result(None).structured_as::<Answer>().is_none());
        assert!(result(Some(json!({"other": 1})))
            .structured_as::<Answer>()
            .unwrap()
            .is_err());
    }
}
