//! Runner configuration
//!
//! [`RunnerSettings`] is the serializable part of a run configuration. It
//! can be loaded from the environment or a TOML file and turned into a
//! `RunConfig` with `RunConfig::from_settings`. The model provider is not
//! serializable; a process-wide default can be installed once at startup
//! with [`set_default_provider`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::error::{AgentsError, Result};
use crate::model::{ModelProvider, ModelSettings};

/// Turn budget used when none (or a non-positive one) is configured.
pub const DEFAULT_MAX_TURNS: usize = 10;

/// Model used when neither the agent nor the run names one.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Serializable runner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub default_model: String,

    /// Values ≤ 0 fall back to [`DEFAULT_MAX_TURNS`].
    pub max_turns: i64,

    /// Delay before every turn but the first.
    pub step_delay_ms: Option<u64>,

    /// Enables the anti-loop registry with this minimum interval.
    pub handoff_min_interval_ms: Option<u64>,

    /// Dump the message buffer at debug level before each model call.
    pub log_messages: bool,

    pub model_settings: ModelSettings,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            max_turns: DEFAULT_MAX_TURNS as i64,
            step_delay_ms: None,
            handoff_min_interval_ms: None,
            log_messages: false,
            model_settings: ModelSettings::default(),
        }
    }
}

impl RunnerSettings {
    pub fn step_delay(&self) -> Option<Duration> {
        self.step_delay_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn handoff_min_interval(&self) -> Option<Duration> {
        self.handoff_min_interval_ms.map(Duration::from_millis)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// Resolves a configured turn budget.
pub fn effective_max_turns(max_turns: i64) -> usize {
    if max_turns <= 0 {
        DEFAULT_MAX_TURNS
    } else {
        max_turns as usize
    }
}

/// Load configuration from environment variables
///
/// Reads `AGENT_RELAY_MODEL`, `AGENT_RELAY_MAX_TURNS` and
/// `AGENT_RELAY_STEP_DELAY_MS`; unset or unparsable values keep their defaults.
pub fn from_env() -> RunnerSettings {
    from_lookup(|key| std::env::var(key).ok())
}

/// Builds settings from an arbitrary variable lookup.
pub fn from_lookup<F>(lookup: F) -> RunnerSettings
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = RunnerSettings::default();

    if let Some(model) = lookup("AGENT_RELAY_MODEL").filter(|m| !m.is_empty()) {
        settings.default_model = model;
    }

    if let Some(turns) = lookup("AGENT_RELAY_MAX_TURNS").and_then(|t| t.parse::<i64>().ok()) {
        settings.max_turns = turns;
    }

    if let Some(delay) = lookup("AGENT_RELAY_STEP_DELAY_MS").and_then(|d| d.parse::<u64>().ok()) {
        settings.step_delay_ms = Some(delay);
    }

    settings
}

/// Load configuration from a TOML file
pub fn from_file(path: impl AsRef<Path>) -> Result<RunnerSettings> {
    let contents = std::fs::read_to_string(path)?;
    RunnerSettings::from_toml_str(&contents)
}

static DEFAULT_PROVIDER: OnceLock<Arc<dyn ModelProvider>> = OnceLock::new();

/// Installs the process-wide model provider. Can only be done once.
pub fn set_default_provider(provider: Arc<dyn ModelProvider>) -> Result<()> {
    DEFAULT_PROVIDER
        .set(provider)
        .map_err(|_| AgentsError::ConfigError {
            message: "default model provider is already set".to_string(),
        })
}

pub fn default_provider() -> Option<Arc<dyn ModelProvider>> {
    DEFAULT_PROVIDER.get().cloned()
}
