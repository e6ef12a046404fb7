//! # Agent handoffs
//!
//! A handoff transfers control of a run from the current agent to another,
//! more specialized one. It is advertised to the model as a tool-shaped entry
//! (see [`Handoff::tool_spec`]); when the model calls it, the runner asks the
//! handoff whether to go through with the transfer via
//! [`Handoff::should_handoff`], validates the call's arguments against
//! [`Handoff::input_schema`] and makes the target the current agent.
//!
//! The variants differ only in how they decide:
//!
//! | Variant | Decides yes when |
//! |---|---|
//! | [`SimpleHandoff`] | always; the model's choice to call it is the decision |
//! | [`FunctionHandoff`] | a caller-supplied predicate returns true |
//! | [`PatternHandoff`] | a regular expression matches |
//! | [`KeywordHandoff`] | any keyword occurs, ignoring case |
//! | [`LanguageHandoff`] | the text is detected to be in a given language |
//! | [`FilteredHandoff`] | the wrapped handoff says yes; also transforms the carried history |
//!
//! ```rust
//! use agent_relay::handoff::{Handoff, KeywordHandoff};
//! use agent_relay::Agent;
//!
//! let billing = Agent::simple("Billing Agent", "You handle invoices and refunds.");
//! let handoff = KeywordHandoff::new(billing, "Billing questions", vec!["invoice", "refund"]);
//!
//! assert_eq!(handoff.tool_name(), "transfer_to_billing_agent");
//! assert!(handoff.should_handoff("I need a REFUND").unwrap());
//! assert!(!handoff.should_handoff("What's the weather?").unwrap());
//! ```
//!
//! [`HandoffRegistry`] is an optional anti-loop guard shared between runs: it
//! suppresses a transfer that fired too recently in the same direction, or
//! whose reverse fired within twice that interval.

use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use whatlang::Lang;

use crate::agent::Agent;
use crate::error::{AgentsError, Result};
use crate::items::Message;
use crate::tool::ToolSpec;

/// The conversation carried across a transfer.
///
/// `input_history` is what the run started with (the caller's input),
/// `pre_handoff_items` is everything produced by earlier turns and
/// `new_items` holds the transfer call itself and its acknowledgement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandoffInputData {
    pub input_history: Vec<Message>,
    pub pre_handoff_items: Vec<Message>,
    pub new_items: Vec<Message>,
    /// `handoff_input`, `source_agent` and `target_agent`.
    pub metadata: Map<String, Value>,
}

impl HandoffInputData {
    /// The raw argument payload of the transfer call.
    pub fn handoff_input(&self) -> Option<&str> {
        self.metadata.get("handoff_input").and_then(Value::as_str)
    }

    pub fn into_messages(self) -> Vec<Message> {
        let mut messages = self.input_history;
        messages.extend(self.pre_handoff_items);
        messages.extend(self.new_items);
        messages
    }
}

/// Transforms the conversation carried across a transfer.
pub type HandoffInputFilter =
    Arc<dyn Fn(HandoffInputData) -> Result<HandoffInputData> + Send + Sync>;

/// Called with the carried conversation and the raw arguments when a transfer is taken.
pub type OnHandoffFn = Arc<dyn Fn(&HandoffInputData, &str) -> Result<()> + Send + Sync>;

/// Builds the default transfer tool name: `transfer_to_` plus the lowercased
/// name with spaces replaced by underscores.
pub fn default_tool_name(agent_name: &str) -> String {
    format!("transfer_to_{}", agent_name.replace(' ', "_").to_lowercase())
}

pub fn default_tool_description(agent_name: &str, description: &str) -> String {
    let mut desc = format!("Handoff to the {} agent to handle the request.", agent_name);
    if !description.is_empty() {
        desc.push(' ');
        desc.push_str(description);
    }
    desc
}

/// A potential transfer of control to another agent.
pub trait Handoff: Send + Sync + fmt::Debug {
    /// Name of the variant, e.g. `keyword_handoff`.
    fn kind(&self) -> String;

    fn target(&self) -> &Arc<Agent>;

    fn description(&self) -> &str;

    /// Decides on the raw argument payload of the transfer call.
    fn should_handoff(&self, input: &str) -> Result<bool>;

    fn tool_name(&self) -> String;

    fn tool_description(&self) -> String;

    /// Schema the transfer arguments must satisfy; `None` accepts anything.
    fn input_schema(&self) -> Option<&Value>;

    fn on_handoff(&self, data: &HandoffInputData, input: &str) -> Result<()>;

    fn filter_input(&self, data: HandoffInputData) -> Result<HandoffInputData> {
        Ok(data)
    }

    fn last_fired(&self) -> Option<Instant>;

    fn mark_fired(&self);

    fn tool_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.tool_name(),
            description: self.tool_description(),
            parameters: self
                .input_schema()
                .cloned()
                .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
        }
    }
}

/// State shared by every decision variant.
#[derive(Clone)]
pub struct HandoffBase {
    target: Arc<Agent>,
    description: String,
    tool_name: Option<String>,
    tool_description: Option<String>,
    input_schema: Option<Value>,
    on_handoff: Option<OnHandoffFn>,
    last_fired: Arc<Mutex<Option<Instant>>>,
}

impl HandoffBase {
    fn new(target: impl Into<Arc<Agent>>, description: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            description: description.into(),
            tool_name: None,
            tool_description: None,
            input_schema: None,
            on_handoff: None,
            last_fired: Arc::new(Mutex::new(None)),
        }
    }

    fn tool_name(&self) -> String {
        self.tool_name
            .clone()
            .unwrap_or_else(|| default_tool_name(self.target.name()))
    }

    fn tool_description(&self) -> String {
        self.tool_description
            .clone()
            .unwrap_or_else(|| default_tool_description(self.target.name(), &self.description))
    }

    fn on_handoff(&self, data: &HandoffInputData, input: &str) -> Result<()> {
        match &self.on_handoff {
            Some(callback) => callback(data, input),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for HandoffBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffBase")
            .field("target", &self.target.name())
            .field("description", &self.description)
            .field("tool_name", &self.tool_name)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

// Builder setters and the metadata half of `Handoff`, shared by every variant
// that stores a `base: HandoffBase`.
macro_rules! handoff_common {
    ($ty:ident) => {
        impl $ty {
            /// Overrides the advertised tool name.
            pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
                self.base.tool_name = Some(name.into());
                self
            }

            pub fn with_tool_description(mut self, description: impl Into<String>) -> Self {
                self.base.tool_description = Some(description.into());
                self
            }

            /// Requires the transfer arguments to satisfy `schema`.
            pub fn with_input_schema(mut self, schema: Value) -> Self {
                self.base.input_schema = Some(schema);
                self
            }

            pub fn with_on_handoff<F>(mut self, callback: F) -> Self
            where
                F: Fn(&HandoffInputData, &str) -> Result<()> + Send + Sync + 'static,
            {
                self.base.on_handoff = Some(Arc::new(callback));
                self
            }
        }
    };
}

macro_rules! delegate_to_base {
    () => {
        fn target(&self) -> &Arc<Agent> {
            &self.base.target
        }

        fn description(&self) -> &str {
            &self.base.description
        }

        fn tool_name(&self) -> String {
            self.base.tool_name()
        }

        fn tool_description(&self) -> String {
            self.base.tool_description()
        }

        fn input_schema(&self) -> Option<&Value> {
            self.base.input_schema.as_ref()
        }

        fn on_handoff(&self, data: &HandoffInputData, input: &str) -> Result<()> {
            self.base.on_handoff(data, input)
        }

        fn last_fired(&self) -> Option<Instant> {
            *self.base.last_fired.lock()
        }

        fn mark_fired(&self) {
            *self.base.last_fired.lock() = Some(Instant::now());
        }
    };
}

/// Always transfers when the model calls it.
#[derive(Debug, Clone)]
pub struct SimpleHandoff {
    base: HandoffBase,
}

impl SimpleHandoff {
    pub fn new(target: impl Into<Arc<Agent>>, description: impl Into<String>) -> Self {
        Self {
            base: HandoffBase::new(target, description),
        }
    }
}

handoff_common!(SimpleHandoff);

impl Handoff for SimpleHandoff {
    fn kind(&self) -> String {
        "simple_handoff".to_string()
    }

    fn should_handoff(&self, _input: &str) -> Result<bool> {
        Ok(true)
    }

    delegate_to_base!();
}

type PredicateFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Transfers when a predicate over the raw input returns true.
#[derive(Clone)]
pub struct FunctionHandoff {
    base: HandoffBase,
    predicate: PredicateFn,
}

impl FunctionHandoff {
    pub fn new<F>(target: impl Into<Arc<Agent>>, description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            base: HandoffBase::new(target, description),
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for FunctionHandoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionHandoff")
            .field("base", &self.base)
            .finish()
    }
}

handoff_common!(FunctionHandoff);

impl Handoff for FunctionHandoff {
    fn kind(&self) -> String {
        "function_handoff".to_string()
    }

    fn should_handoff(&self, input: &str) -> Result<bool> {
        Ok((self.predicate)(input))
    }

    delegate_to_base!();
}

/// Transfers when a regular expression matches the raw input.
#[derive(Debug, Clone)]
pub struct PatternHandoff {
    base: HandoffBase,
    pattern: Regex,
}

impl PatternHandoff {
    pub fn new(
        target: impl Into<Arc<Agent>>,
        description: impl Into<String>,
        pattern: &str,
    ) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| AgentsError::ConfigError {
            message: format!("invalid handoff pattern: {e}"),
        })?;
        Ok(Self::from_regex(target, description, pattern))
    }

    pub fn from_regex(
        target: impl Into<Arc<Agent>>,
        description: impl Into<String>,
        pattern: Regex,
    ) -> Self {
        Self {
            base: HandoffBase::new(target, description),
            pattern,
        }
    }
}

handoff_common!(PatternHandoff);

impl Handoff for PatternHandoff {
    fn kind(&self) -> String {
        "pattern_handoff".to_string()
    }

    fn should_handoff(&self, input: &str) -> Result<bool> {
        Ok(self.pattern.is_match(input))
    }

    delegate_to_base!();
}

/// Transfers when any keyword occurs in the raw input, ignoring case.
#[derive(Debug, Clone)]
pub struct KeywordHandoff {
    base: HandoffBase,
    keywords: Vec<String>,
}

impl KeywordHandoff {
    pub fn new<S: AsRef<str>>(
        target: impl Into<Arc<Agent>>,
        description: impl Into<String>,
        keywords: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            base: HandoffBase::new(target, description),
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
        }
    }
}

handoff_common!(KeywordHandoff);

impl Handoff for KeywordHandoff {
    fn kind(&self) -> String {
        "keyword_handoff".to_string()
    }

    fn should_handoff(&self, input: &str) -> Result<bool> {
        let lower = input.to_lowercase();
        Ok(self.keywords.iter().any(|k| lower.contains(k.as_str())))
    }

    delegate_to_base!();
}

const SPANISH_MARKERS: [char; 8] = ['¿', '¡', 'ñ', 'ó', 'á', 'é', 'í', 'ú'];
const SPANISH_WORDS: [&str; 9] = [
    "hola", "como", "estas", "gracias", "buenos", "dias", "adios", "por favor", "ayuda",
];

/// Transfers when the raw input is detected to be in a target language.
///
/// Spanish gets a cheap check on accented characters and common words before
/// falling back to statistical detection, which must be more than 50%
/// confident.
#[derive(Debug, Clone)]
pub struct LanguageHandoff {
    base: HandoffBase,
    code: String,
    lang: Lang,
}

impl LanguageHandoff {
    /// `code` is one of `es`, `fr`, `de`, `it`, `ja`; anything else targets English.
    pub fn new(
        target: impl Into<Arc<Agent>>,
        description: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        let code = code.into();
        let lang = match code.as_str() {
            "es" => Lang::Spa,
            "fr" => Lang::Fra,
            "de" => Lang::Deu,
            "it" => Lang::Ita,
            "ja" => Lang::Jpn,
            _ => Lang::Eng,
        };
        let mut base = HandoffBase::new(target, description);
        let language = language_name(&code);
        base.tool_name = Some(default_tool_name(&format!(
            "{}_{}",
            language,
            base.target.name()
        )));
        base.tool_description = Some(format!(
            "Handoff to the {} agent to handle {} language requests.",
            base.target.name(),
            language
        ));
        Self { base, code, lang }
    }

    pub fn language_code(&self) -> &str {
        &self.code
    }

    fn looks_spanish(input: &str) -> bool {
        if input.contains(SPANISH_MARKERS) {
            return true;
        }
        let lower = input.to_lowercase();
        SPANISH_WORDS.iter().any(|w| lower.contains(w))
    }
}

fn language_name(code: &str) -> &str {
    match code {
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "ja" => "Japanese",
        other => other,
    }
}

handoff_common!(LanguageHandoff);

impl Handoff for LanguageHandoff {
    fn kind(&self) -> String {
        "language_handoff".to_string()
    }

    fn should_handoff(&self, input: &str) -> Result<bool> {
        if input.is_empty() {
            return Ok(false);
        }
        if self.code == "es" && Self::looks_spanish(input) {
            return Ok(true);
        }
        Ok(whatlang::detect(input)
            .map(|info| info.lang() == self.lang && info.confidence() > 0.5)
            .unwrap_or(false))
    }

    delegate_to_base!();
}

/// Wraps another handoff and replaces how it transforms the carried history.
///
/// Everything but [`Handoff::filter_input`] and [`Handoff::kind`] is
/// delegated to the wrapped handoff.
#[derive(Clone)]
pub struct FilteredHandoff {
    inner: Arc<dyn Handoff>,
    filter: HandoffInputFilter,
}

impl FilteredHandoff {
    pub fn new<F>(inner: Arc<dyn Handoff>, filter: F) -> Self
    where
        F: Fn(HandoffInputData) -> Result<HandoffInputData> + Send + Sync + 'static,
    {
        Self {
            inner,
            filter: Arc::new(filter),
        }
    }
}

impl fmt::Debug for FilteredHandoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteredHandoff")
            .field("inner", &self.inner)
            .finish()
    }
}

impl Handoff for FilteredHandoff {
    fn kind(&self) -> String {
        format!("filtered_{}", self.inner.kind())
    }

    fn target(&self) -> &Arc<Agent> {
        self.inner.target()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn should_handoff(&self, input: &str) -> Result<bool> {
        self.inner.should_handoff(input)
    }

    fn tool_name(&self) -> String {
        self.inner.tool_name()
    }

    fn tool_description(&self) -> String {
        self.inner.tool_description()
    }

    fn input_schema(&self) -> Option<&Value> {
        self.inner.input_schema()
    }

    fn on_handoff(&self, data: &HandoffInputData, input: &str) -> Result<()> {
        self.inner.on_handoff(data, input)
    }

    fn filter_input(&self, data: HandoffInputData) -> Result<HandoffInputData> {
        (self.filter)(data)
    }

    fn last_fired(&self) -> Option<Instant> {
        self.inner.last_fired()
    }

    fn mark_fired(&self) {
        self.inner.mark_fired()
    }
}

/// Why the registry refused a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoffSuppressed {
    #[error("too soon to handoff from {from} to {to} again")]
    TooSoon { from: String, to: String },

    #[error("potential handoff loop detected between {from} and {to}")]
    Loop { from: String, to: String },
}

/// Anti-loop guard keyed by ordered agent-name pair.
///
/// The check and the record happen under one lock, so two concurrent
/// attempts for the same pair cannot both pass.
#[derive(Debug)]
pub struct HandoffRegistry {
    recent: Mutex<HashMap<(String, String), Instant>>,
    min_interval: Duration,
}

impl HandoffRegistry {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            recent: Mutex::new(HashMap::new()),
            min_interval,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Checks a transfer from `from` to `to` without recording it.
    pub fn check(&self, from: &str, to: &str) -> std::result::Result<(), HandoffSuppressed> {
        let recent = self.recent.lock();
        self.suppression(&recent, from, to, Instant::now())
    }

    /// Checks a transfer from `from` to `to` and records it when allowed.
    pub fn can_handoff(&self, from: &str, to: &str) -> std::result::Result<(), HandoffSuppressed> {
        let mut recent = self.recent.lock();
        let now = Instant::now();
        self.suppression(&recent, from, to, now)?;
        recent.insert((from.to_string(), to.to_string()), now);
        Ok(())
    }

    fn suppression(
        &self,
        recent: &HashMap<(String, String), Instant>,
        from: &str,
        to: &str,
        now: Instant,
    ) -> std::result::Result<(), HandoffSuppressed> {
        let key = (from.to_string(), to.to_string());
        if let Some(last) = recent.get(&key) {
            if now.duration_since(*last) < self.min_interval {
                return Err(HandoffSuppressed::TooSoon {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }

        let reverse = (to.to_string(), from.to_string());
        if let Some(last) = recent.get(&reverse) {
            if now.duration_since(*last) < self.min_interval * 2 {
                return Err(HandoffSuppressed::Loop {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }
        Ok(())
    }
}
