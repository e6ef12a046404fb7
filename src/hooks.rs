//! Agent lifecycle hooks.
//!
//! Hooks are attached to an [`Agent`] and called by the runner at fixed
//! points of a run. Every method defaults to a no-op; a hook that returns an
//! error aborts the run.
//!
//! | Hook | Called |
//! |---|---|
//! | `on_start` | before the first turn, and on the target agent after a handoff |
//! | `on_end` | after the output guardrails accepted the final output; `structured` is set when the agent declares an output type |
//! | `on_handoff` | on the target agent, when control is transferred to it |
//! | `on_tool_start` / `on_tool_end` | around each tool invocation |

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::Agent;
use crate::error::{AgentsError, Result};
use crate::tool::Tool;

#[async_trait]
pub trait AgentHooks: Send + Sync {
    async fn on_start(&self, _agent: &Agent) -> Result<()> {
        Ok(())
    }

    async fn on_end(
        &self,
        _agent: &Agent,
        _output: &str,
        _structured: Option<&Value>,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_handoff(&self, _next: &Agent, _previous: &Agent) -> Result<()> {
        Ok(())
    }

    async fn on_tool_start(&self, _agent: &Agent, _tool: &dyn Tool) -> Result<()> {
        Ok(())
    }

    async fn on_tool_end(&self, _agent: &Agent, _tool: &dyn Tool, _result: &str) -> Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl AgentHooks for NoopHooks {}

/// Tags a hook failure with the hook's name, leaving hook errors as they are.
pub(crate) fn hook_failed(hook: &'static str) -> impl FnOnce(AgentsError) -> AgentsError {
    move |err| match err {
        err @ AgentsError::HookError { .. } => err,
        other => AgentsError::hook(hook, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::FunctionTool;

    struct FailingStart;

    #[async_trait]
    impl AgentHooks for FailingStart {
        async fn on_start(&self, agent: &Agent) -> Result<()> {
            Err(AgentsError::Other(format!("{} refused to start", agent.name())))
        }
    }

    #[tokio::test]
    async fn test_noop_hooks_succeed() {
        let agent = Agent::simple("A", "be helpful");
        let tool = FunctionTool::simple("echo", "echo", |s| s);
        assert!(NoopHooks.on_start(&agent).await.is_ok());
        assert!(NoopHooks.on_end(&agent, "out", None).await.is_ok());
        assert!(NoopHooks.on_handoff(&agent, &agent).await.is_ok());
        assert!(NoopHooks.on_tool_start(&agent, &tool).await.is_ok());
        assert!(NoopHooks.on_tool_end(&agent, &tool, "r").await.is_ok());
    }

    #[tokio::test]
    async fn test_hook_failure_is_tagged() {
        let agent = Agent::simple("A", "be helpful");
        let err = FailingStart
            .on_start(&agent)
            .await
            .map_err(hook_failed("on_start"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Hook 'on_start' failed: A refused to start");

        let already = AgentsError::hook("custom", "x");
        let err = hook_failed("on_end")(already);
        assert!(matches!(err, AgentsError::HookError { hook, .. } if hook == "custom"));
    }
}
