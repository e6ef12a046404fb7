//! # Token usage accounting
//!
//! Every completion call reports a [`Usage`]; the runner sums them into a
//! run-wide total and a [`UsageStats`] breakdown by model and by agent. Totals
//! only ever grow during a run.
//!
//! ```rust
//! use agent_relay::usage::{Usage, UsageStats};
//!
//! let mut stats = UsageStats::new();
//! stats.record("gpt-4o", "Triage", Usage::new(100, 50));
//! stats.record("gpt-4o", "Billing", Usage::new(100, 50));
//! stats.record("gpt-4o-mini", "Billing", Usage::new(100, 50));
//!
//! assert_eq!(stats.total.total_tokens, 450);
//! assert_eq!(stats.by_agent["Billing"].request_count, 2);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

/// Token counters for one or more completion calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// Tokens in the prompts sent.
    pub prompt_tokens: usize,

    /// Tokens in the generated completions.
    pub completion_tokens: usize,

    /// Total tokens as reported by the completion service.
    pub total_tokens: usize,

    /// Number of completion calls these counters cover.
    pub request_count: usize,
}

impl Usage {
    /// Usage for a single call whose total is prompt plus completion.
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self::with_total(
            prompt_tokens,
            completion_tokens,
            prompt_tokens + completion_tokens,
        )
    }

    /// Usage for a single call with an upstream-reported total.
    ///
    /// Some services count tokens (cached or reasoning tokens, for instance)
    /// that are neither prompt nor completion, so the total is taken as given.
    pub fn with_total(prompt_tokens: usize, completion_tokens: usize, total_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
            request_count: 1,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn add_usage(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.request_count += other.request_count;
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.request_count == 0
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self.add_usage(&other);
        self
    }
}

impl AddAssign<&Usage> for Usage {
    fn add_assign(&mut self, other: &Usage) {
        self.add_usage(other);
    }
}

/// Run-wide usage with breakdowns by model and by agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageStats {
    pub total: Usage,
    pub by_model: BTreeMap<String, Usage>,
    pub by_agent: BTreeMap<String, Usage>,
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one call's usage against the total and both breakdowns.
    pub fn record(&mut self, model: &str, agent: &str, usage: Usage) {
        self.total += &usage;
        *self.by_model.entry(model.to_string()).or_default() += &usage;
        *self.by_agent.entry(agent.to_string()).or_default() += &usage;
    }

    /// Human-readable report, one line per model and per agent.
    pub fn summary(&self) -> String {
        let mut report = format!(
            "Usage: {} tokens ({} prompt, {} completion) over {} requests\n",
            self.total.total_tokens,
            self.total.prompt_tokens,
            self.total.completion_tokens,
            self.total.request_count,
        );
        for (model, usage) in &self.by_model {
            report.push_str(&format!("  model {}: {} tokens\n", model, usage.total_tokens));
        }
        for (agent, usage) in &self.by_agent {
            report.push_str(&format!(
                "  agent {}: {} tokens, {} requests\n",
                agent, usage.total_tokens, usage.request_count
            ));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_usage_creation() {
        let usage = Usage::new(100, 50);
        assert_eq!(usage.total_tokens, 150);
        assert_eq!(usage.request_count, 1);

        let reported = Usage::with_total(100, 50, 170);
        assert_eq!(reported.total_tokens, 170);
    }

    #[test]
    fn test_three_turns_accumulate() {
        let mut total = Usage::empty();
        for _ in 0..3 {
            total += &Usage::new(100, 50);
        }
        assert_eq!(
            total,
            Usage {
                prompt_tokens: 300,
                completion_tokens: 150,
                total_tokens: 450,
                request_count: 3,
            }
        );
    }

    #[test]
    fn test_usage_add_operator() {
        let combined = Usage::new(100, 50) + Usage::new(200, 100);
        assert_eq!(combined.total_tokens, 450);
        assert_eq!(combined.request_count, 2);
    }

    #[test]
    fn test_usage_stats_breakdown() {
        let mut stats = UsageStats::new();
        stats.record("gpt-4o", "Agent1", Usage::new(100, 50));
        stats.record("gpt-4o", "Agent2", Usage::new(200, 100));
        stats.record("gpt-4o-mini", "Agent1", Usage::new(300, 150));

        assert_eq!(stats.total.total_tokens, 900);
        assert_eq!(stats.total.request_count, 3);
        assert_eq!(stats.by_model["gpt-4o"].total_tokens, 450);
        assert_eq!(stats.by_agent["Agent1"].total_tokens, 600);
    }

    #[test]
    fn test_usage_stats_summary() {
        let mut stats = UsageStats::new();
        stats.record("gpt-4o", "TestAgent", Usage::new(1000, 500));

        let summary = stats.summary();
        assert!(summary.contains("1500 tokens"));
        assert!(summary.contains("model gpt-4o"));
        assert!(summary.contains("agent TestAgent: 1500 tokens, 1 requests"));
    }

    #[test]
    fn test_empty_usage() {
        assert!(Usage::empty().is_empty());
        assert!(!Usage::new(1, 0).is_empty());
    }
}
