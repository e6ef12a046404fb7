//! # Agent (orientation)
//!
//! An `Agent` is a named bundle of instructions, tools, transfer targets and
//! guardrails that can be the current participant of a run. Agents are
//! immutable by convention: they are built with `with_*` setters, shared as
//! `Arc<Agent>`, and derived from one another with [`Agent::clone_with`].
//! Cloning copies the tool, handoff and guardrail lists, so changing a clone
//! never affects the original.

use futures::future::{BoxFuture, FutureExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::{AgentsError, Result};
use crate::guardrail::{InputGuardrail, OutputGuardrail};
use crate::handoff::Handoff;
use crate::hooks::{AgentHooks, NoopHooks};
use crate::items::Message;
use crate::model::ModelSettings;
use crate::schema;
use crate::tool::Tool;

type InstructionsFn = Arc<dyn Fn(&Agent) -> Result<String> + Send + Sync>;
type AsyncInstructionsFn = Arc<dyn Fn(&Agent) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// The system instructions of an agent, fixed or computed at the start of each turn.
#[derive(Clone)]
pub enum Instructions {
    Static(String),
    Dynamic(InstructionsFn),
    DynamicAsync(AsyncInstructionsFn),
}

impl Instructions {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&Agent) -> Result<String> + Send + Sync + 'static,
    {
        Instructions::Dynamic(Arc::new(f))
    }

    pub fn dynamic_async<F, Fut>(f: F) -> Self
    where
        F: Fn(&Agent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Instructions::DynamicAsync(Arc::new(move |agent: &Agent| f(agent).boxed()))
    }
}

impl From<&str> for Instructions {
    fn from(s: &str) -> Self {
        Instructions::Static(s.to_string())
    }
}

impl From<String> for Instructions {
    fn from(s: String) -> Self {
        Instructions::Static(s)
    }
}

impl fmt::Debug for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instructions::Static(s) => f.debug_tuple("Static").field(s).finish(),
            Instructions::Dynamic(_) => f.write_str("Dynamic(..)"),
            Instructions::DynamicAsync(_) => f.write_str("DynamicAsync(..)"),
        }
    }
}

type OutputParser = Arc<dyn Fn(&str) -> Result<Value> + Send + Sync>;

/// A strict shape the final answer of an agent must satisfy.
///
/// The parsed value ends up in `RunResult::structured_output`.
#[derive(Clone)]
pub struct OutputType {
    name: String,
    schema: Value,
    parser: OutputParser,
}

fn invalid_output(message: impl fmt::Display) -> AgentsError {
    AgentsError::InvalidOutputFormat {
        message: message.to_string(),
    }
}

impl OutputType {
    /// JSON matching `schema`, checked with the minimal schema validator.
    pub fn json_schema(name: impl Into<String>, schema: Value) -> Self {
        let check = schema.clone();
        Self {
            name: name.into(),
            schema,
            parser: Arc::new(move |text: &str| {
                let value: Value = serde_json::from_str(text.trim()).map_err(invalid_output)?;
                schema::validate_value(&value, &check).map_err(invalid_output)?;
                Ok(value)
            }),
        }
    }

    /// JSON that deserializes into `T`; the schema is generated from `T`.
    pub fn of<T>() -> Self
    where
        T: JsonSchema + DeserializeOwned + Serialize + 'static,
    {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .unwrap_or_else(|_| serde_json::json!({"type": "object"}));
        Self {
            name: T::schema_name(),
            schema,
            parser: Arc::new(|text: &str| {
                let typed: T = serde_json::from_str(text.trim()).map_err(invalid_output)?;
                Ok(serde_json::to_value(typed)?)
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Parses a final answer; failures are [`AgentsError::InvalidOutputFormat`].
    pub fn parse(&self, text: &str) -> Result<Value> {
        (self.parser)(text)
    }
}

impl fmt::Debug for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputType")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

/// Defines the complete configuration for an [`Agent`].
#[derive(Clone)]
pub struct AgentConfig {
    /// The name of the agent, used for identification, logs and default
    /// transfer tool names.
    pub name: String,

    pub instructions: Instructions,

    /// Describes the agent when it is a transfer target or wrapped as a tool.
    pub handoff_description: Option<String>,

    /// Overrides the run-level model identifier.
    pub model: Option<String>,

    /// Merged over the run-level settings.
    pub model_settings: ModelSettings,

    pub tools: Vec<Arc<dyn Tool>>,

    pub handoffs: Vec<Arc<dyn Handoff>>,

    pub input_guardrails: Vec<Arc<dyn InputGuardrail>>,

    pub output_guardrails: Vec<Arc<dyn OutputGuardrail>>,

    pub output_type: Option<OutputType>,

    pub hooks: Arc<dyn AgentHooks>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Assistant".to_string(),
            instructions: Instructions::Static("You are a helpful assistant.".to_string()),
            handoff_description: None,
            model: None,
            model_settings: ModelSettings::default(),
            tools: vec![],
            handoffs: vec![],
            input_guardrails: vec![],
            output_guardrails: vec![],
            output_type: None,
            hooks: Arc::new(NoopHooks),
        }
    }
}

/// Fields replaced by [`Agent::clone_with`]; `None` keeps the original value.
#[derive(Default)]
pub struct AgentOverrides {
    pub name: Option<String>,
    pub instructions: Option<Instructions>,
    pub handoff_description: Option<String>,
    pub model: Option<String>,
    pub model_settings: Option<ModelSettings>,
    pub tools: Option<Vec<Arc<dyn Tool>>>,
    pub handoffs: Option<Vec<Arc<dyn Handoff>>>,
    pub input_guardrails: Option<Vec<Arc<dyn InputGuardrail>>>,
    pub output_guardrails: Option<Vec<Arc<dyn OutputGuardrail>>>,
    pub output_type: Option<OutputType>,
    pub hooks: Option<Arc<dyn AgentHooks>>,
}

/// A participant of a run.
///
/// ```rust
/// use agent_relay::{Agent, tool::FunctionTool};
/// use std::sync::Arc;
///
/// let weather_tool = Arc::new(FunctionTool::simple(
///     "get_weather",
///     "Gets the current weather for a specified location.",
///     |location: String| format!("It is sunny in {}.", location),
/// ));
///
/// let weather_agent = Agent::simple("WeatherBot", "I provide weather updates.")
///     .with_model("gpt-4o-mini")
///     .with_tool(weather_tool);
///
/// assert_eq!(weather_agent.config.model.as_deref(), Some("gpt-4o-mini"));
/// assert_eq!(weather_agent.tools().len(), 1);
/// assert_eq!(weather_agent.description(), "Agent WeatherBot");
/// ```
#[derive(Clone)]
pub struct Agent {
    pub config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Creates an agent with a name and static instructions; everything else is default.
    pub fn simple(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self::new(AgentConfig {
            name: name.into(),
            instructions: Instructions::Static(instructions.into()),
            ..Default::default()
        })
    }

    pub fn with_instructions(mut self, instructions: impl Into<Instructions>) -> Self {
        self.config.instructions = instructions.into();
        self
    }

    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.config.handoff_description = Some(description.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn with_model_settings(mut self, settings: ModelSettings) -> Self {
        self.config.model_settings = settings;
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.config.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.config.tools.extend(tools);
        self
    }

    pub fn with_handoff(mut self, handoff: Arc<dyn Handoff>) -> Self {
        self.config.handoffs.push(handoff);
        self
    }

    pub fn with_handoffs(mut self, handoffs: Vec<Arc<dyn Handoff>>) -> Self {
        self.config.handoffs.extend(handoffs);
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: Arc<dyn InputGuardrail>) -> Self {
        self.config.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: Arc<dyn OutputGuardrail>) -> Self {
        self.config.output_guardrails.push(guardrail);
        self
    }

    pub fn with_output_type(mut self, output_type: OutputType) -> Self {
        self.config.output_type = Some(output_type);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.config.hooks = hooks;
        self
    }

    /// Copies this agent, replacing the fields set in `overrides`.
    pub fn clone_with(&self, overrides: AgentOverrides) -> Agent {
        let base = self.config.clone();
        Agent::new(AgentConfig {
            name: overrides.name.unwrap_or(base.name),
            instructions: overrides.instructions.unwrap_or(base.instructions),
            handoff_description: overrides.handoff_description.or(base.handoff_description),
            model: overrides.model.or(base.model),
            model_settings: overrides.model_settings.unwrap_or(base.model_settings),
            tools: overrides.tools.unwrap_or(base.tools),
            handoffs: overrides.handoffs.unwrap_or(base.handoffs),
            input_guardrails: overrides.input_guardrails.unwrap_or(base.input_guardrails),
            output_guardrails: overrides.output_guardrails.unwrap_or(base.output_guardrails),
            output_type: overrides.output_type.or(base.output_type),
            hooks: overrides.hooks.unwrap_or(base.hooks),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The handoff description, or `Agent {name}` when none is set.
    pub fn description(&self) -> String {
        match &self.config.handoff_description {
            Some(desc) if !desc.is_empty() => desc.clone(),
            _ => format!("Agent {}", self.config.name),
        }
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.config.tools
    }

    pub fn handoffs(&self) -> &[Arc<dyn Handoff>] {
        &self.config.handoffs
    }

    pub fn input_guardrails(&self) -> &[Arc<dyn InputGuardrail>] {
        &self.config.input_guardrails
    }

    pub fn output_guardrails(&self) -> &[Arc<dyn OutputGuardrail>] {
        &self.config.output_guardrails
    }

    pub fn output_type(&self) -> Option<&OutputType> {
        self.config.output_type.as_ref()
    }

    pub fn hooks(&self) -> &Arc<dyn AgentHooks> {
        &self.config.hooks
    }

    /// Computes the instructions for the current turn.
    pub async fn resolve_instructions(&self) -> Result<String> {
        let text = match &self.config.instructions {
            Instructions::Static(s) => s.clone(),
            Instructions::Dynamic(f) => f(self)?,
            Instructions::DynamicAsync(f) => f(self).await?,
        };
        if text.trim().is_empty() {
            return Err(AgentsError::MissingInstructions {
                agent: self.config.name.clone(),
            });
        }
        Ok(text)
    }

    /// The system message sent first on every turn of this agent.
    pub async fn build_system_message(&self) -> Result<Message> {
        let mut content = self.resolve_instructions().await?;
        if let Some(output_type) = &self.config.output_type {
            content.push_str(&format!(
                "\n\nRespond only with JSON matching this schema:\n{}",
                output_type.schema()
            ));
        }
        Ok(Message::system(content))
    }
}

impl From<AgentConfig> for Agent {
    fn from(config: AgentConfig) -> Self {
        Agent::new(config)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.config.name)
            .field("model", &self.config.model)
            .field("tools_count", &self.config.tools.len())
            .field("handoffs_count", &self.config.handoffs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrail::MaxLengthGuardrail;
    use crate::handoff::SimpleHandoff;
    use crate::tool::FunctionTool;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_agent_builder() {
        let tool = Arc::new(FunctionTool::simple("test_tool", "A test tool", |s: String| {
            s.to_uppercase()
        }));
        let billing = Agent::simple("Billing", "Handles billing");

        let agent = Agent::simple("Builder", "Test instructions")
            .with_model("gpt-4o-mini")
            .with_tool(tool)
            .with_handoff(Arc::new(SimpleHandoff::new(billing, "billing")))
            .with_input_guardrail(Arc::new(MaxLengthGuardrail::new(100)));

        assert_eq!(agent.config.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(agent.tools().len(), 1);
        assert_eq!(agent.handoffs().len(), 1);
        assert_eq!(agent.input_guardrails().len(), 1);
    }

    #[test]
    fn test_description_fallback() {
        let agent = Agent::simple("Triage", "Routes");
        assert_eq!(agent.description(), "Agent Triage");

        let agent = agent.with_handoff_description("Routes requests");
        assert_eq!(agent.description(), "Routes requests");
    }

    #[test]
    fn test_clone_with_copies_lists() {
        let original = Agent::simple("Original", "Original instructions").with_tool(Arc::new(
            FunctionTool::simple("a", "a", |s: String| s),
        ));

        let mut clone = original.clone_with(AgentOverrides {
            name: Some("Copy".to_string()),
            ..Default::default()
        });
        clone
            .config
            .tools
            .push(Arc::new(FunctionTool::simple("b", "b", |s: String| s)));

        assert_eq!(clone.name(), "Copy");
        assert_eq!(clone.tools().len(), 2);
        assert_eq!(original.tools().len(), 1);
        assert_eq!(original.name(), "Original");
    }

    #[tokio::test]
    async fn test_resolve_instructions() {
        let agent = Agent::simple("Static", "Be brief");
        assert_eq!(agent.resolve_instructions().await.unwrap(), "Be brief");

        let agent = Agent::simple("Dynamic", "").with_instructions(Instructions::dynamic(|a| {
            Ok(format!("You are {}.", a.name()))
        }));
        assert_eq!(agent.resolve_instructions().await.unwrap(), "You are Dynamic.");

        let agent = Agent::simple("Async", "").with_instructions(Instructions::dynamic_async(
            |a: &Agent| {
                let name = a.name().to_string();
                async move { Ok(format!("{name} speaks async")) }
            },
        ));
        assert_eq!(agent.resolve_instructions().await.unwrap(), "Async speaks async");
    }

    #[tokio::test]
    async fn test_empty_instructions_fail() {
        let err = Agent::simple("Silent", "  ")
            .resolve_instructions()
            .await
            .unwrap_err();
        assert!(matches!(err, AgentsError::MissingInstructions { agent } if agent == "Silent"));

        let agent = Agent::simple("Computed", "x")
            .with_instructions(Instructions::dynamic(|_| Ok(String::new())));
        assert!(agent.resolve_instructions().await.is_err());
    }

    #[test]
    fn test_json_schema_output_type() {
        let output = OutputType::json_schema(
            "answer",
            json!({
                "type": "object",
                "properties": {"answer": {"type": "string"}},
                "required": ["answer"]
            }),
        );

        assert_eq!(output.parse(r#"{"answer":"42"}"#).unwrap(), json!({"answer": "42"}));
        assert!(matches!(
            output.parse(r#"{"answer":42}"#).unwrap_err(),
            AgentsError::InvalidOutputFormat { .. }
        ));
        assert!(matches!(
            output.parse("not json").unwrap_err(),
            AgentsError::InvalidOutputFormat { .. }
        ));
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
    struct Forecast {
        city: String,
        high: i32,
    }

    #[tokio::test]
    async fn test_typed_output_type() {
        let output = OutputType::of::<Forecast>();
        assert_eq!(output.name(), "Forecast");

        let value = output.parse(r#"{"city":"Oslo","high":12}"#).unwrap();
        assert_eq!(value, json!({"city": "Oslo", "high": 12}));
        assert!(output.parse(r#"{"city":"Oslo"}"#).is_err());

        let agent = Agent::simple("Forecaster", "Forecast").with_output_type(output);
        let msg = agent.build_system_message().await.unwrap();
        assert!(msg.content.starts_with("Forecast"));
        assert!(msg.content.contains("\"high\""));
    }

    #[test]
    fn test_agent_debug_format() {
        let agent = Agent::simple("Debug", "Debug agent");
        let debug_str = format!("{:?}", agent);

        assert!(debug_str.contains("Debug"));
        assert!(debug_str.contains("tools_count"));
    }
}
