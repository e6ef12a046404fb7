//! Error types for agent runs

use thiserror::Error;

use crate::items::Message;
use crate::usage::Usage;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, AgentsError>;

/// Main error type for agent runs.
///
/// Every variant is terminal: the runner never retries on its own. The only
/// failure that is recovered inside a run is an unknown tool name, which is
/// reported back to the model as a tool message and never surfaces here.
#[derive(Debug, Error)]
pub enum AgentsError {
    /// The agent has no instructions and none could be computed
    #[error("Agent '{agent}' has no instructions")]
    MissingInstructions { agent: String },

    /// The run configuration did not carry a model provider
    #[error("A model provider is required to run an agent")]
    ModelProviderRequired,

    /// An input or output guardrail disallowed the text
    #[error("Guardrail tripwire triggered by '{guardrail}': {message}")]
    GuardrailTripwire { guardrail: String, message: String },

    /// A transfer's argument payload failed schema validation
    #[error("Invalid handoff input for '{handoff}': {message}")]
    InvalidHandoffInput { handoff: String, message: String },

    /// A final answer could not be parsed into the agent's output type
    #[error("Invalid output format: {message}")]
    InvalidOutputFormat { message: String },

    /// No final output was reached within the turn budget
    #[error("Maximum turns exceeded: {max_turns}")]
    MaxTurnsExceeded { max_turns: usize },

    /// A tool invocation failed
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecutionError { tool: String, message: String },

    /// A lifecycle hook failed
    #[error("Hook '{hook}' failed: {message}")]
    HookError { hook: String, message: String },

    /// A transfer callback or input filter failed
    #[error("Handoff error: {message}")]
    HandoffError { message: String },

    /// The completion service returned something the runner cannot use
    #[error("Model behavior error: {message}")]
    ModelBehaviorError { message: String },

    /// The run was cancelled through its cancellation token
    #[error("Run cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Error from the OpenAI API
    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML configuration parse error
    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl AgentsError {
    /// Builds a [`AgentsError::ToolExecutionError`].
    pub fn tool(tool: impl Into<String>, message: impl ToString) -> Self {
        Self::ToolExecutionError {
            tool: tool.into(),
            message: message.to_string(),
        }
    }

    /// Builds a [`AgentsError::HookError`].
    pub fn hook(hook: impl Into<String>, message: impl ToString) -> Self {
        Self::HookError {
            hook: hook.into(),
            message: message.to_string(),
        }
    }
}

/// The failure of a whole run.
///
/// Carries the underlying [`AgentsError`] together with whatever the run had
/// produced before failing: the conversation so far (without the system
/// message), the usage consumed and the agent that was current at the time.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunError {
    #[source]
    pub error: AgentsError,
    pub history: Vec<Message>,
    pub usage: Usage,
    pub last_agent: Option<String>,
    pub turns: usize,
}

impl RunError {
    /// Wraps an error raised before any turn ran.
    pub fn early(error: AgentsError) -> Self {
        Self {
            error,
            history: Vec::new(),
            usage: Usage::empty(),
            last_agent: None,
            turns: 0,
        }
    }

    /// Returns the underlying error.
    pub fn kind(&self) -> &AgentsError {
        &self.error
    }

    pub fn into_inner(self) -> AgentsError {
        self.error
    }
}

impl From<RunError> for AgentsError {
    fn from(err: RunError) -> Self {
        err.error
    }
}
