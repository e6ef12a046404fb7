//! Model abstraction for completion services
//!
//! The runner only needs one request/response round trip per turn:
//! [`ModelProvider::complete`]. Streaming is optional; the default
//! [`ModelProvider::stream`] replays a complete response as a single chunk.

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs, Stop,
    },
    Client,
};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{AgentsError, Result};
use crate::items::{Message, ModelResponse, Role, StreamChunk, ToolCall};
use crate::tool::ToolSpec;
use crate::usage::Usage;

/// Generation settings. Unset fields are left to the completion service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

impl ModelSettings {
    /// Returns these settings with every field set in `overrides` replaced.
    pub fn merge(&self, overrides: &ModelSettings) -> ModelSettings {
        ModelSettings {
            temperature: overrides.temperature.or(self.temperature),
            top_p: overrides.top_p.or(self.top_p),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            frequency_penalty: overrides.frequency_penalty.or(self.frequency_penalty),
            presence_penalty: overrides.presence_penalty.or(self.presence_penalty),
            stop: overrides.stop.clone().or_else(|| self.stop.clone()),
            seed: overrides.seed.or(self.seed),
        }
    }
}

/// Everything a completion service gets for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub model: String,
    /// System message first, then the conversation.
    pub messages: Vec<Message>,
    /// Declared tools followed by the transfer targets.
    pub tools: Vec<ToolSpec>,
    pub settings: ModelSettings,
}

/// Trait for model providers
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Produces one assistant response and the usage it cost.
    async fn complete(&self, request: ModelRequest) -> Result<(ModelResponse, Usage)>;

    /// Produces the response as incremental chunks. The last chunk carries
    /// the finish reason and, when known, the usage.
    async fn stream(&self, request: ModelRequest) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let (response, usage) = self.complete(request).await?;
        let chunk = StreamChunk {
            delta: response.content.unwrap_or_default(),
            tool_calls: response.tool_calls,
            finish_reason: response.finish_reason.or_else(|| Some("stop".to_string())),
            usage: Some(usage),
        };
        Ok(stream::iter(vec![Ok(chunk)]).boxed())
    }

    fn name(&self) -> &str {
        "provider"
    }
}

/// OpenAI chat-completions provider using async-openai
pub struct OpenAIProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAIProvider {
    /// Uses the default client (API key from `OPENAI_API_KEY`).
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client<OpenAIConfig>) -> Self {
        Self { client }
    }

    fn convert_message(msg: &Message) -> Result<ChatCompletionRequestMessage> {
        Ok(match msg.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(msg.content.clone())
                .build()?
                .into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.clone())
                .build()?
                .into(),
            Role::Assistant => {
                let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                if !msg.content.is_empty() {
                    builder.content(msg.content.clone());
                }
                let calls = msg.requested_calls();
                if !calls.is_empty() {
                    builder.tool_calls(
                        calls
                            .iter()
                            .map(|tc| ChatCompletionMessageToolCall {
                                id: tc.id.clone(),
                                r#type: ChatCompletionToolType::Function,
                                function: FunctionCall {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect::<Vec<_>>(),
                    );
                }
                builder.build()?.into()
            }
            Role::Tool => ChatCompletionRequestToolMessageArgs::default()
                .content(msg.content.clone())
                .tool_call_id(msg.tool_call_id.clone().unwrap_or_default())
                .build()?
                .into(),
        })
    }

    fn convert_tools(tools: &[ToolSpec]) -> Result<Vec<ChatCompletionTool>> {
        tools
            .iter()
            .map(|tool| {
                Ok(ChatCompletionToolArgs::default()
                    .r#type(ChatCompletionToolType::Function)
                    .function(
                        FunctionObjectArgs::default()
                            .name(tool.name.clone())
                            .description(tool.description.clone())
                            .parameters(tool.parameters.clone())
                            .build()?,
                    )
                    .build()?)
            })
            .collect()
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    async fn complete(&self, request: ModelRequest) -> Result<(ModelResponse, Usage)> {
        let messages = request
            .messages
            .iter()
            .map(Self::convert_message)
            .collect::<Result<Vec<_>>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&request.model).messages(messages);

        if !request.tools.is_empty() {
            args.tools(Self::convert_tools(&request.tools)?);
        }

        let settings = &request.settings;
        if let Some(temp) = settings.temperature {
            args.temperature(temp);
        }
        if let Some(top_p) = settings.top_p {
            args.top_p(top_p);
        }
        if let Some(max) = settings.max_tokens {
            args.max_completion_tokens(max);
        }
        if let Some(penalty) = settings.frequency_penalty {
            args.frequency_penalty(penalty);
        }
        if let Some(penalty) = settings.presence_penalty {
            args.presence_penalty(penalty);
        }
        if let Some(stop) = &settings.stop {
            args.stop(Stop::StringArray(stop.clone()));
        }
        if let Some(seed) = settings.seed {
            args.seed(seed);
        }

        let response = self.client.chat().create(args.build()?).await?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| AgentsError::ModelBehaviorError {
                message: "No choices in response".to_string(),
            })?;

        let tool_calls = choice
            .message
            .tool_calls
            .iter()
            .flatten()
            .map(|tc| ToolCall::new(tc.id.clone(), tc.function.name.clone(), tc.function.arguments.clone()))
            .collect();

        let model_response = ModelResponse {
            id: response.id.clone(),
            content: choice.message.content.clone(),
            tool_calls,
            finish_reason: choice.finish_reason.as_ref().map(|r| format!("{:?}", r).to_lowercase()),
            created_at: chrono::Utc::now(),
        };

        let usage = match &response.usage {
            Some(usage) => Usage::with_total(
                usage.prompt_tokens as usize,
                usage.completion_tokens as usize,
                usage.total_tokens as usize,
            ),
            None => Usage::empty(),
        };

        Ok((model_response, usage))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// One scripted reaction of a [`ScriptedProvider`].
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    Respond(ModelResponse),
    Fail(String),
}

/// A deterministic provider that replays queued responses.
///
/// Every request is recorded, so callers can inspect exactly what the runner
/// sent on each turn. Used by the test-suite and the benches.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    last: Mutex<Option<ScriptedTurn>>,
    requests: Mutex<Vec<ModelRequest>>,
    usage: Usage,
    repeat_last: bool,
    latency: Option<Duration>,
}

impl ScriptedProvider {
    /// Replays `responses` in order, each reporting 10 prompt and 5 completion tokens.
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self::from_turns(responses.into_iter().map(ScriptedTurn::Respond).collect())
    }

    pub fn from_turns(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            usage: Usage::new(10, 5),
            repeat_last: false,
            latency: None,
        }
    }

    /// Usage reported for every turn.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Keeps replaying the last response once the queue is drained.
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Waits this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_turn(&self) -> Option<ScriptedTurn> {
        let next = self.turns.lock().pop_front();
        match next {
            Some(turn) => {
                *self.last.lock() = Some(turn.clone());
                Some(turn)
            }
            None if self.repeat_last => self.last.lock().clone(),
            None => None,
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, request: ModelRequest) -> Result<(ModelResponse, Usage)> {
        self.requests.lock().push(request);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.next_turn() {
            Some(ScriptedTurn::Respond(response)) => Ok((response, self.usage.clone())),
            Some(ScriptedTurn::Fail(message)) => Err(AgentsError::ModelBehaviorError { message }),
            None => Err(AgentsError::ModelBehaviorError {
                message: "no scripted response left".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
