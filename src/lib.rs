//! # agent-relay
//!
//! A turn-based execution engine for LLM agents. An [`Agent`] bundles
//! instructions, tools, handoffs to other agents and guardrails; the
//! [`Runner`] drives it against a model provider until it produces a final
//! answer.
//!
//! ## Core Concepts
//!
//! - **Agent**: instructions plus the tools, handoffs and guardrails it may use
//! - **Tools**: functions the model can call, with JSON schemas derived from typed arguments
//! - **Handoffs**: transfer tools that move the conversation to another agent, optionally
//!   gated by a keyword, pattern, language or predicate
//! - **Guardrails**: checks on the run's input and on the final output, which may block or rewrite it
//! - **Runner**: the bounded turn loop, with cancellation, usage accounting and tracing
//!
//! ## Getting Started
//!
//! Set your OpenAI API key in the `OPENAI_API_KEY` environment variable.
//!
//! ```rust,no_run
//! use agent_relay::handoff::KeywordHandoff;
//! use agent_relay::model::OpenAIProvider;
//! use agent_relay::tool::typed_tool;
//! use agent_relay::{tool_args, Agent, RunConfig, Runner};
//! use std::sync::Arc;
//!
//! #[tool_args]
//! struct AddArgs {
//!     a: f64,
//!     b: f64,
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let add = typed_tool("add", "Add two numbers", |args: AddArgs| async move {
//!     Ok(serde_json::json!({ "sum": args.a + args.b }))
//! });
//!
//! let billing = Agent::simple("Billing", "You answer billing questions.");
//! let triage = Agent::simple("Triage", "You are a helpful math assistant.")
//!     .with_tool(Arc::new(add))
//!     .with_handoff(Arc::new(KeywordHandoff::new(billing, "Billing questions", ["invoice", "refund"])));
//!
//! let config = RunConfig::default().with_provider(Arc::new(OpenAIProvider::new()));
//! let result = Runner::run(triage, "What is 2 + 2?", config).await?;
//!
//! println!("{}: {}", result.last_agent_name(), result.final_output);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod guardrail;
pub mod handoff;
pub mod hooks;
pub mod items;
pub mod model;
pub mod result;
pub mod runner;
pub mod schema;
pub mod tool;
pub mod tool_service;
pub mod tracing;
pub mod usage;

// Public re-exports for convenience
pub use agent::{Agent, AgentConfig, Instructions, OutputType};
pub use error::{AgentsError, Result, RunError};
pub use handoff::{Handoff, HandoffRegistry};
pub use hooks::AgentHooks;
pub use items::{Message, ModelResponse, Role, ToolCall};
pub use model::{ModelProvider, ModelSettings};
pub use result::RunResult;
pub use runner::{RunConfig, RunEvent, Runner};
pub use tool::{FunctionTool, Tool};
pub use usage::Usage;

pub use agent_relay_derive::{structured_output, tool_args};

// Re-export Tower traits that users need
pub use tower::{Service, ServiceExt};
