//! Tool system for agents
//!
//! A tool is a named, described unit the model can ask to invoke. Its
//! parameter schema is only ever read by the completion service; the runner
//! hands the raw argument payload to [`Tool::invoke`] unchanged.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use crate::agent::Agent;
use crate::error::{AgentsError, Result};
use crate::runner::{RunConfig, Runner};

/// The tool-shaped entry advertised to the completion service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Trait for all tools that can be used by agents
#[async_trait]
pub trait Tool: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema describing the arguments the tool accepts.
    fn parameters_schema(&self) -> Value;

    /// Invokes the tool with the raw JSON argument payload.
    ///
    /// A returned error aborts the whole run.
    async fn invoke(&self, arguments: &str) -> Result<String>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A tool backed by a closure over parsed JSON arguments.
///
/// String results are returned as-is; any other JSON value is serialized.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters_schema: Value,
    function: ToolFn,
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters_schema", &self.parameters_schema)
            .finish()
    }
}

impl FunctionTool {
    /// Creates a tool from a synchronous function.
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
        function: F,
    ) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        let function = Arc::new(function);
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema,
            function: Arc::new(move |args| {
                let result = function(args);
                async move { result }.boxed()
            }),
        }
    }

    /// Creates a tool from an async function.
    pub fn new_async<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
        function: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema,
            function: Arc::new(move |args| function(args).boxed()),
        }
    }

    /// Creates a tool taking a single `input` string and returning a string.
    pub fn simple<F>(name: &str, description: &str, function: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        Self::new(name, description, input_schema("Input to the function"), move |args| {
            let input = args
                .get("input")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(Value::String(function(input)))
        })
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters_schema.clone()
    }

    async fn invoke(&self, arguments: &str) -> Result<String> {
        let args = if arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(arguments)
                .map_err(|e| AgentsError::tool(&self.name, format!("invalid arguments: {e}")))?
        };
        let output = (self.function)(args).await?;
        Ok(match output {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

/// Builds a tool whose arguments are deserialized into `A`, with the
/// parameter schema generated from `A` by schemars.
pub fn typed_tool<A, R, H, Fut>(
    name: impl Into<String>,
    description: impl Into<String>,
    handler: H,
) -> FunctionTool
where
    A: DeserializeOwned + JsonSchema + Send + 'static,
    R: Serialize + Send + 'static,
    H: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let name = name.into();
    let schema = schemars::schema_for!(A);
    let parameters = serde_json::to_value(schema.schema).unwrap_or_else(|_| json!({"type": "object"}));
    let handler = Arc::new(handler);
    let tool_name = name.clone();
    FunctionTool::new_async(name, description, parameters, move |raw: Value| {
        let handler = handler.clone();
        let tool_name = tool_name.clone();
        async move {
            let args: A = serde_json::from_value(raw)
                .map_err(|e| AgentsError::tool(&tool_name, format!("invalid arguments: {e}")))?;
            let out = handler(args).await?;
            Ok(serde_json::to_value(out)?)
        }
    })
}

fn input_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "input": {
                "type": "string",
                "description": description
            }
        },
        "required": ["input"]
    })
}

/// Exposes an agent as a tool: the model passes `{"input": "..."}` and gets
/// the nested run's final output back.
#[derive(Debug, Clone)]
pub struct AgentTool {
    agent: Arc<Agent>,
    name: String,
    description: String,
    config: RunConfig,
}

impl AgentTool {
    pub fn new(agent: impl Into<Arc<Agent>>, config: RunConfig) -> Self {
        let agent = agent.into();
        Self {
            name: agent.name().to_lowercase().replace(' ', "_"),
            description: agent.description(),
            agent,
            config,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Deserialize)]
struct AgentToolArgs {
    input: String,
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        input_schema("The input to send to the agent")
    }

    async fn invoke(&self, arguments: &str) -> Result<String> {
        let args: AgentToolArgs = serde_json::from_str(arguments)
            .map_err(|e| AgentsError::tool(&self.name, format!("invalid arguments: {e}")))?;
        let result = Runner::run(self.agent.clone(), args.input, self.config.clone())
            .await
            .map_err(|e| AgentsError::tool(&self.name, e))?;
        Ok(result.final_output)
    }
}

/// Creates a [`FunctionTool::simple`] tool.
#[macro_export]
macro_rules! function_tool {
    ($name:expr, $description:expr, $func:expr) => {
        $crate::tool::FunctionTool::simple($name, $description, $func)
    };
}
