//! Tool dispatch as Tower services.
//!
//! Each declared tool of the current agent is wrapped in a [`ToolService`]
//! that runs the agent's tool hooks around the invocation and records a tool
//! span. [`ToolRouter`] is the dispatch table: it routes a
//! [`ToolInvocation`] by name and falls back to a service that answers with
//! a "not found" tool message instead of failing, so the model can recover.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::util::BoxCloneService;
use tower::Service;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::error::AgentsError;
use crate::hooks::hook_failed;
use crate::items::{Message, ToolCall};
use crate::tool::Tool;
use crate::tracing::{SharedTracingContext, SpanGuard, SpanType};

/// A request to run one tool.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl From<&ToolCall> for ToolInvocation {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }
    }
}

/// What a tool invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub id: String,
    pub name: String,
    pub content: String,
    /// False when no tool with that name was declared.
    pub found: bool,
}

impl ToolOutput {
    pub fn not_found(invocation: &ToolInvocation) -> Self {
        Self {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            content: format!("Error: tool '{}' not found", invocation.name),
            found: false,
        }
    }

    pub fn into_message(self) -> Message {
        Message::tool(self.content, self.id)
    }
}

type BoxFut<T> = Pin<Box<dyn Future<Output = Result<T, AgentsError>> + Send>>;
type ToolSvc = BoxCloneService<ToolInvocation, ToolOutput, AgentsError>;

/// Runs one tool for one agent, with hooks and a tool span.
#[derive(Clone)]
pub struct ToolService {
    agent: Arc<Agent>,
    tool: Arc<dyn Tool>,
    trace: SharedTracingContext,
}

impl ToolService {
    pub fn new(agent: Arc<Agent>, tool: Arc<dyn Tool>, trace: SharedTracingContext) -> Self {
        Self { agent, tool, trace }
    }
}

impl Service<ToolInvocation> for ToolService {
    type Response = ToolOutput;
    type Error = AgentsError;
    type Future = BoxFut<ToolOutput>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ToolInvocation) -> Self::Future {
        let agent = self.agent.clone();
        let tool = self.tool.clone();
        let trace = self.trace.clone();
        Box::pin(async move {
            let span = SpanGuard::start(
                &trace,
                SpanType::Tool {
                    tool: req.name.clone(),
                },
            );
            span.set_attribute("input", req.arguments.clone());

            let hooks = agent.hooks();
            let outcome = async {
                hooks
                    .on_tool_start(&agent, tool.as_ref())
                    .await
                    .map_err(hook_failed("on_tool_start"))?;
                debug!(tool = %req.name, call_id = %req.id, "Invoking tool");
                let content = tool.invoke(&req.arguments).await.map_err(|err| match err {
                    err @ AgentsError::ToolExecutionError { .. } => err,
                    other => AgentsError::tool(&req.name, other),
                })?;
                hooks
                    .on_tool_end(&agent, tool.as_ref(), &content)
                    .await
                    .map_err(hook_failed("on_tool_end"))?;
                Ok::<_, AgentsError>(content)
            }
            .await;

            match outcome {
                Ok(content) => {
                    span.set_attribute("output", content.clone());
                    span.complete();
                    Ok(ToolOutput {
                        id: req.id,
                        name: req.name,
                        content,
                        found: true,
                    })
                }
                Err(err) => {
                    span.fail(&err);
                    Err(err)
                }
            }
        })
    }
}

/// Name-keyed dispatch table over an agent's tools.
#[derive(Clone)]
pub struct ToolRouter {
    name_to_index: HashMap<String, usize>,
    services: Vec<ToolSvc>, // index 0 is the unknown-tool fallback
}

impl ToolRouter {
    pub fn for_agent(agent: &Arc<Agent>, trace: &SharedTracingContext) -> Self {
        let unknown = BoxCloneService::new(tower::service_fn(|inv: ToolInvocation| async move {
            warn!(tool = %inv.name, "Model requested an unknown tool");
            Ok::<_, AgentsError>(ToolOutput::not_found(&inv))
        }));

        let mut services: Vec<ToolSvc> = vec![unknown];
        let mut name_to_index = HashMap::new();
        for tool in agent.tools() {
            // first declaration wins on duplicate names
            if name_to_index.contains_key(tool.name()) {
                continue;
            }
            name_to_index.insert(tool.name().to_string(), services.len());
            services.push(BoxCloneService::new(ToolService::new(
                agent.clone(),
                tool.clone(),
                trace.clone(),
            )));
        }

        Self {
            name_to_index,
            services,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }
}

impl Service<ToolInvocation> for ToolRouter {
    type Response = ToolOutput;
    type Error = AgentsError;
    type Future = BoxFut<ToolOutput>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // readiness is checked per selected service inside `call`
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ToolInvocation) -> Self::Future {
        let idx = self
            .name_to_index
            .get(req.name.as_str())
            .copied()
            .unwrap_or(0);
        self.services[idx].call(req)
    }
}
