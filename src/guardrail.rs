//! # Guardrails (orientation)
//!
//! Guardrails are ordered, short-circuiting checks on the text going into and
//! coming out of a run. Input guardrails see the raw user input once, before
//! the first turn; if one disallows it the model is never called. Output
//! guardrails see the candidate final output and may rewrite it: each check
//! receives the text as left by the previous one.
//!
//! Checks run in list order. The first disallowed result aborts the run with
//! [`AgentsError::GuardrailTripwire`] carrying that check's message.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AgentsError, Result};

/// Represents the outcome of a guardrail check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub allowed: bool,
    pub message: Option<String>,
    /// Replacement text for the checks after this one. Ignored for input guardrails.
    pub rewrite: Option<String>,
}

impl GuardrailResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            message: None,
            rewrite: None,
        }
    }

    pub fn block(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: Some(message.into()),
            rewrite: None,
        }
    }

    pub fn rewrite(text: impl Into<String>) -> Self {
        Self {
            allowed: true,
            message: None,
            rewrite: Some(text.into()),
        }
    }
}

/// Validates user input before the first turn.
#[async_trait]
pub trait InputGuardrail: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self, input: &str) -> Result<GuardrailResult>;
}

/// Validates, and optionally rewrites, a candidate final output.
#[async_trait]
pub trait OutputGuardrail: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self, output: &str) -> Result<GuardrailResult>;
}

fn tripwire(name: &str, result: GuardrailResult) -> AgentsError {
    AgentsError::GuardrailTripwire {
        guardrail: name.to_string(),
        message: result.message.unwrap_or_else(|| name.to_string()),
    }
}

/// Executes guardrail lists in order.
pub struct GuardrailRunner;

impl GuardrailRunner {
    pub async fn check_input(guards: &[Arc<dyn InputGuardrail>], input: &str) -> Result<()> {
        for g in guards {
            let res = g.check(input).await?;
            if !res.allowed {
                return Err(tripwire(g.name(), res));
            }
        }
        Ok(())
    }

    /// Returns the output as rewritten by the guardrails.
    pub async fn check_output(guards: &[Arc<dyn OutputGuardrail>], output: &str) -> Result<String> {
        let mut out = output.to_string();
        for g in guards {
            let res = g.check(&out).await?;
            if !res.allowed {
                return Err(tripwire(g.name(), res));
            }
            if let Some(rewritten) = res.rewrite {
                out = rewritten;
            }
        }
        Ok(out)
    }
}

/// Blocks text longer than a maximum number of characters.
#[derive(Debug, Clone)]
pub struct MaxLengthGuardrail {
    name: String,
    max_length: usize,
}

impl MaxLengthGuardrail {
    pub fn new(max_length: usize) -> Self {
        Self {
            name: format!("MaxLength_{}", max_length),
            max_length,
        }
    }

    fn evaluate(&self, text: &str, what: &str) -> GuardrailResult {
        if text.chars().count() > self.max_length {
            GuardrailResult::block(format!(
                "{} exceeds maximum length of {} characters",
                what, self.max_length
            ))
        } else {
            GuardrailResult::allow()
        }
    }
}

#[async_trait]
impl InputGuardrail for MaxLengthGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, input: &str) -> Result<GuardrailResult> {
        Ok(self.evaluate(input, "Input"))
    }
}

#[async_trait]
impl OutputGuardrail for MaxLengthGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, output: &str) -> Result<GuardrailResult> {
        Ok(self.evaluate(output, "Output"))
    }
}

/// Blocks text containing any of a set of patterns (case-insensitive).
///
/// ```rust
/// use agent_relay::guardrail::{InputGuardrail, PatternBlockGuardrail};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let filter = PatternBlockGuardrail::new("ProfanityFilter", vec!["darn".to_string()]);
///
/// assert!(filter.check("What a wonderful day!").await?.allowed);
///
/// let result = filter.check("Oh, DARN it!").await?;
/// assert!(!result.allowed);
/// assert!(result.message.unwrap().contains("darn"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PatternBlockGuardrail {
    name: String,
    patterns: Vec<String>,
}

impl PatternBlockGuardrail {
    pub fn new(name: impl Into<String>, patterns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            patterns,
        }
    }

    fn evaluate(&self, text: &str, what: &str) -> GuardrailResult {
        let lower = text.to_lowercase();
        match self
            .patterns
            .iter()
            .find(|p| lower.contains(&p.to_lowercase()))
        {
            Some(pattern) => {
                GuardrailResult::block(format!("{} contains blocked pattern: {}", what, pattern))
            }
            None => GuardrailResult::allow(),
        }
    }
}

#[async_trait]
impl InputGuardrail for PatternBlockGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, input: &str) -> Result<GuardrailResult> {
        Ok(self.evaluate(input, "Input"))
    }
}

#[async_trait]
impl OutputGuardrail for PatternBlockGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, output: &str) -> Result<GuardrailResult> {
        Ok(self.evaluate(output, "Output"))
    }
}

/// Replaces every regex match in the output.
#[derive(Debug, Clone)]
pub struct RegexRedactGuardrail {
    name: String,
    pattern: Regex,
    replacement: String,
}

impl RegexRedactGuardrail {
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        replacement: impl Into<String>,
    ) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| AgentsError::ConfigError {
            message: format!("invalid redaction pattern: {e}"),
        })?;
        Ok(Self {
            name: name.into(),
            pattern,
            replacement: replacement.into(),
        })
    }
}

#[async_trait]
impl OutputGuardrail for RegexRedactGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, output: &str) -> Result<GuardrailResult> {
        if !self.pattern.is_match(output) {
            return Ok(GuardrailResult::allow());
        }
        let redacted = self
            .pattern
            .replace_all(output, self.replacement.as_str())
            .into_owned();
        Ok(GuardrailResult::rewrite(redacted))
    }
}

type CheckFn = Arc<dyn Fn(&str) -> Result<GuardrailResult> + Send + Sync>;

/// A guardrail backed by a closure; usable on either side.
#[derive(Clone)]
pub struct FnGuardrail {
    name: String,
    check: CheckFn,
}

impl FnGuardrail {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&str) -> Result<GuardrailResult> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }
}

impl std::fmt::Debug for FnGuardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnGuardrail").field("name", &self.name).finish()
    }
}

#[async_trait]
impl InputGuardrail for FnGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, input: &str) -> Result<GuardrailResult> {
        (self.check)(input)
    }
}

#[async_trait]
impl OutputGuardrail for FnGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, output: &str) -> Result<GuardrailResult> {
        (self.check)(output)
    }
}
