//! # Runner (orientation)
//!
//! The `Runner` drives one agent run: a bounded loop that calls the model
//! once per turn and acts on the response.
//!
//! - A response with tool calls is not final, whatever text comes with it.
//!   The first call naming one of the current agent's handoffs is offered
//!   to that handoff; if it accepts, control moves to its target and every
//!   other call of the response is dropped. Otherwise each call is dispatched
//!   in order through the agent's [`ToolRouter`], and the produced tool
//!   messages are appended before the next turn.
//! - A response without tool calls is the candidate final answer. It is
//!   parsed into the agent's output type (if any), run through the output
//!   guardrails and returned.
//!
//! The conversation kept by the run holds no system message. Each request
//! is built as the current agent's system message followed by the
//! conversation, so after a handoff the target's instructions replace the
//! previous agent's and everything else is carried over.
//!
//! A run fails with a [`RunError`] carrying the conversation as it stood
//! when the failure happened.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::Agent;
use crate::config::{self, effective_max_turns, RunnerSettings, DEFAULT_MAX_TURNS, DEFAULT_MODEL};
use crate::error::{AgentsError, Result, RunError};
use crate::guardrail::GuardrailRunner;
use crate::handoff::{Handoff, HandoffInputData, HandoffInputFilter, HandoffRegistry};
use crate::hooks::hook_failed;
use crate::items::{Message, ModelResponse, Role, ToolCall};
use crate::model::{ModelProvider, ModelRequest, ModelSettings};
use crate::result::RunResult;
use crate::schema;
use crate::tool::ToolSpec;
use crate::tool_service::{ToolInvocation, ToolRouter};
use crate::tracing::{SharedTracingContext, SpanGuard, SpanType, TraceExporter, TracingContext};
use crate::usage::{Usage, UsageStats};

fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => {
            let mut out = s[..idx].to_string();
            out.push('…');
            out
        }
        None => s.to_string(),
    }
}

fn format_messages_for_log(messages: &[Message]) -> String {
    let mut lines = Vec::new();
    for (idx, m) in messages.iter().enumerate() {
        match m.role {
            Role::User => {
                lines.push(format!("{:02} USER     | {}", idx, truncate_for_log(&m.content, 160)));
            }
            Role::System => {
                lines.push(format!("{:02} SYSTEM   | {}", idx, truncate_for_log(&m.content, 160)));
            }
            Role::Assistant => {
                let calls = m.requested_calls();
                if calls.is_empty() {
                    lines.push(format!(
                        "{:02} ASSIST   | {}",
                        idx,
                        truncate_for_log(&m.content, 160)
                    ));
                } else {
                    let calls: Vec<String> = calls
                        .iter()
                        .map(|tc| format!("id={}, name={}", tc.id, tc.name))
                        .collect();
                    lines.push(format!(
                        "{:02} ASSIST   | tool_calls=[{}] content=\"{}\"",
                        idx,
                        calls.join(", "),
                        truncate_for_log(&m.content, 120)
                    ));
                }
            }
            Role::Tool => {
                let tcid = m
                    .tool_call_id
                    .as_deref()
                    .unwrap_or("<missing tool_call_id>");
                lines.push(format!(
                    "{:02} TOOL     | tool_call_id={} payload={}",
                    idx,
                    tcid,
                    truncate_for_log(&m.content, 120)
                ));
            }
        }
    }
    lines.join("\n")
}

/// Notified with `(target, source, raw_arguments)` whenever a handoff is taken.
pub type HandoffCallback = Arc<dyn Fn(&str, &str, &str) -> Result<()> + Send + Sync>;

/// Configuration for an agent run.
///
/// ```rust
/// use agent_relay::items::ModelResponse;
/// use agent_relay::model::ScriptedProvider;
/// use agent_relay::runner::RunConfig;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let provider = Arc::new(ScriptedProvider::new(vec![ModelResponse::new_message("hi")]));
/// let config = RunConfig::default()
///     .with_provider(provider)
///     .with_max_turns(5)
///     .with_step_delay(Duration::from_millis(50));
///
/// assert_eq!(config.max_turns, 5);
/// assert!(config.provider.is_some());
/// ```
#[derive(Clone)]
pub struct RunConfig {
    /// Model used when the agent does not name one. Defaults to `gpt-4o`.
    pub model: Option<String>,

    /// The completion service. Falls back to the process-wide default
    /// (see [`config::set_default_provider`]); a run without either fails
    /// with [`AgentsError::ModelProviderRequired`].
    pub provider: Option<Arc<dyn ModelProvider>>,

    /// Completed model calls allowed before the run fails. Values ≤ 0 mean
    /// the default of 10.
    pub max_turns: i64,

    /// Delay before every turn except the first.
    pub step_delay: Option<Duration>,

    pub handoff_callback: Option<HandoffCallback>,

    /// Applied to the carried conversation after the handoff's own filter.
    pub handoff_input_filter: Option<HandoffInputFilter>,

    /// Anti-loop guard; may be shared by concurrent runs.
    pub handoff_registry: Option<Arc<HandoffRegistry>>,

    /// Run-level settings; the agent's settings are merged over them.
    pub model_settings: ModelSettings,

    /// Cancels the current model call, tool invocation or step delay and
    /// fails the run with [`AgentsError::Cancelled`].
    pub cancellation: Option<CancellationToken>,

    /// Receives the trace when the run ends.
    pub exporter: Option<Arc<dyn TraceExporter>>,

    /// Dumps each request's messages at debug level under `agent_relay::messages`.
    pub log_messages: bool,
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .field("max_turns", &self.max_turns)
            .field("step_delay", &self.step_delay)
            .field("handoff_callback", &self.handoff_callback.is_some())
            .field("handoff_input_filter", &self.handoff_input_filter.is_some())
            .field("handoff_registry", &self.handoff_registry.is_some())
            .field("model_settings", &self.model_settings)
            .field("cancellation", &self.cancellation.is_some())
            .field("exporter", &self.exporter.is_some())
            .finish()
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider: None,
            max_turns: DEFAULT_MAX_TURNS as i64,
            step_delay: None,
            handoff_callback: None,
            handoff_input_filter: None,
            handoff_registry: None,
            model_settings: ModelSettings::default(),
            cancellation: None,
            exporter: None,
            log_messages: false,
        }
    }
}

impl RunConfig {
    pub fn from_settings(settings: &RunnerSettings) -> Self {
        Self {
            model: Some(settings.default_model.clone()),
            max_turns: settings.max_turns,
            step_delay: settings.step_delay(),
            handoff_registry: settings
                .handoff_min_interval()
                .map(|min| Arc::new(HandoffRegistry::new(min))),
            model_settings: settings.model_settings.clone(),
            log_messages: settings.log_messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_max_turns(mut self, max_turns: i64) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    pub fn with_handoff_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.handoff_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_handoff_input_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(HandoffInputData) -> Result<HandoffInputData> + Send + Sync + 'static,
    {
        self.handoff_input_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_handoff_registry(mut self, registry: Arc<HandoffRegistry>) -> Self {
        self.handoff_registry = Some(registry);
        self
    }

    pub fn with_model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = settings;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn TraceExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn with_message_logging(mut self, enabled: bool) -> Self {
        self.log_messages = enabled;
        self
    }
}

/// Progress of a streamed run, in order.
#[derive(Debug)]
pub enum RunEvent {
    TurnStarted { turn: usize, agent: String },
    /// Text produced by the model so far in this turn.
    MessageDelta { delta: String },
    ToolCalled { agent: String, call: ToolCall },
    ToolOutput { agent: String, call_id: String, tool: String, output: String },
    Handoff { from: String, to: String },
    Completed(Box<RunResult>),
    Failed(Box<RunError>),
}

type EventSender = mpsc::UnboundedSender<RunEvent>;

fn emit(events: Option<&EventSender>, event: impl FnOnce() -> RunEvent) {
    if let Some(tx) = events {
        // a dropped receiver only means nobody is listening anymore
        let _ = tx.send(event());
    }
}

/// Awaits `fut` unless the token fires first.
async fn await_or_cancel<T, F>(token: Option<&CancellationToken>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(AgentsError::Cancelled),
            value = fut => value,
        },
        None => fut.await,
    }
}

/// Tags a transfer callback or filter failure, leaving handoff errors as they are.
fn handoff_failed(err: AgentsError) -> AgentsError {
    match err {
        err @ AgentsError::HandoffError { .. } => err,
        other => AgentsError::HandoffError {
            message: other.to_string(),
        },
    }
}

/// Everything a run owns; created per call and dropped when it returns.
struct RunState {
    agent: Arc<Agent>,
    conversation: Vec<Message>,
    /// How many leading conversation messages came from the caller.
    input_len: usize,
    turns: usize,
    usage: Usage,
    usage_stats: UsageStats,
}

impl RunState {
    fn new(agent: Arc<Agent>, input: &str) -> Self {
        Self {
            agent,
            conversation: vec![Message::user(input)],
            input_len: 1,
            turns: 0,
            usage: Usage::empty(),
            usage_stats: UsageStats::new(),
        }
    }

    fn into_error(self, error: AgentsError) -> RunError {
        RunError {
            error,
            history: self.conversation,
            usage: self.usage,
            last_agent: Some(self.agent.name().to_string()),
            turns: self.turns,
        }
    }
}

struct FinalOutput {
    text: String,
    structured: Option<Value>,
}

enum TurnOutcome {
    Continue,
    Final(FinalOutput),
}

/// The decision taken on the first transfer-shaped call of a response.
enum Transfer {
    Take {
        call: ToolCall,
        handoff: Arc<dyn Handoff>,
    },
    Declined {
        call_id: String,
        target: String,
        reason: String,
    },
}

/// Borrowed per-run context threaded through the turn helpers.
struct Ctx<'a> {
    config: &'a RunConfig,
    provider: &'a Arc<dyn ModelProvider>,
    trace: &'a SharedTracingContext,
    events: Option<&'a EventSender>,
}

impl Ctx<'_> {
    fn token(&self) -> Option<&CancellationToken> {
        self.config.cancellation.as_ref()
    }
}

/// The main entry point for running agents.
///
/// ```rust
/// use agent_relay::items::ModelResponse;
/// use agent_relay::model::ScriptedProvider;
/// use agent_relay::{Agent, RunConfig, Runner};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = Arc::new(ScriptedProvider::new(vec![ModelResponse::new_message(
///     "Hello, world!",
/// )]));
/// let agent = Agent::simple("EchoAgent", "You echo the user's input.");
///
/// let result = Runner::run(agent, "Hello, world!", RunConfig::default().with_provider(provider)).await?;
///
/// assert_eq!(result.final_output, "Hello, world!");
/// assert_eq!(result.history.len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct Runner;

impl Runner {
    /// Runs `agent` on `input` until it produces a final answer or fails.
    pub async fn run(
        agent: impl Into<Arc<Agent>>,
        input: impl Into<String>,
        config: RunConfig,
    ) -> std::result::Result<RunResult, RunError> {
        Self::drive(agent.into(), input.into(), config, None).await
    }

    /// Blocking version of [`Runner::run`]; creates its own tokio runtime.
    pub fn run_sync(
        agent: impl Into<Arc<Agent>>,
        input: impl Into<String>,
        config: RunConfig,
    ) -> std::result::Result<RunResult, RunError> {
        let runtime = tokio::runtime::Runtime::new().map_err(|e| RunError::early(e.into()))?;
        runtime.block_on(Self::run(agent, input, config))
    }

    /// Runs the agent in a background task and streams its progress.
    ///
    /// Model output is requested through [`ModelProvider::stream`]. The
    /// stream ends with exactly one `Completed` or `Failed` event. Must be
    /// called from within a tokio runtime.
    pub fn run_streamed(
        agent: impl Into<Arc<Agent>>,
        input: impl Into<String>,
        config: RunConfig,
    ) -> impl Stream<Item = RunEvent> + Send + 'static {
        let (tx, rx) = mpsc::unbounded_channel();
        let agent = agent.into();
        let input = input.into();

        tokio::spawn(async move {
            let outcome = Self::drive(agent, input, config, Some(tx.clone())).await;
            let last = match outcome {
                Ok(result) => RunEvent::Completed(Box::new(result)),
                Err(err) => RunEvent::Failed(Box::new(err)),
            };
            let _ = tx.send(last);
        });

        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) })
    }

    async fn drive(
        agent: Arc<Agent>,
        input: String,
        config: RunConfig,
        events: Option<EventSender>,
    ) -> std::result::Result<RunResult, RunError> {
        let provider = match config.provider.clone().or_else(config::default_provider) {
            Some(provider) => provider,
            None => return Err(RunError::early(AgentsError::ModelProviderRequired)),
        };

        info!(agent = %agent.name(), provider = provider.name(), "Starting agent run");

        let trace = TracingContext::shared();
        let run_span = SpanGuard::start(
            &trace,
            SpanType::Run {
                agent: agent.name().to_string(),
                input: input.clone(),
            },
        );

        let mut state = RunState::new(agent, &input);
        let ctx = Ctx {
            config: &config,
            provider: &provider,
            trace: &trace,
            events: events.as_ref(),
        };
        let outcome = Self::run_loop(&ctx, &mut state, &input).await;

        run_span.set_attribute("turns", state.turns);
        run_span.set_attribute("last_agent", state.agent.name());
        run_span.set_attribute(
            "usage",
            serde_json::to_value(&state.usage).unwrap_or(Value::Null),
        );

        let result = match outcome {
            Ok(output) => {
                run_span.set_attribute("output", output.text.clone());
                run_span.complete();
                info!(
                    agent = %state.agent.name(),
                    turns = state.turns,
                    total_tokens = state.usage.total_tokens,
                    "Agent run completed"
                );
                let trace_id = trace.lock().trace_id().to_string();
                Ok(RunResult {
                    final_output: output.text,
                    structured_output: output.structured,
                    last_agent: state.agent,
                    history: state.conversation,
                    usage: state.usage,
                    usage_stats: state.usage_stats,
                    turns: state.turns,
                    trace_id,
                })
            }
            Err(err) => {
                warn!(agent = %state.agent.name(), turns = state.turns, error = %err, "Agent run failed");
                run_span.fail(&err);
                Err(state.into_error(err))
            }
        };

        if let Some(exporter) = &config.exporter {
            let ctx = trace.lock();
            if let Err(e) = exporter.export(ctx.trace_id(), ctx.spans()) {
                warn!(trace_id = %ctx.trace_id(), error = %e, "Trace export failed");
            }
        }

        result
    }

    async fn run_loop(ctx: &Ctx<'_>, state: &mut RunState, input: &str) -> Result<FinalOutput> {
        let max_turns = effective_max_turns(ctx.config.max_turns);
        let first = state.agent.clone();
        first.resolve_instructions().await?;

        if !first.input_guardrails().is_empty() {
            let span = SpanGuard::start(
                ctx.trace,
                SpanType::Guardrail {
                    kind: "input".to_string(),
                    agent: first.name().to_string(),
                },
            );
            let checked = await_or_cancel(
                ctx.token(),
                GuardrailRunner::check_input(first.input_guardrails(), input),
            )
            .await;
            match checked {
                Ok(()) => span.complete(),
                Err(e) => {
                    span.fail(&e);
                    return Err(e);
                }
            }
        }

        first
            .hooks()
            .on_start(&first)
            .await
            .map_err(hook_failed("on_start"))?;

        loop {
            if ctx.token().is_some_and(CancellationToken::is_cancelled) {
                return Err(AgentsError::Cancelled);
            }
            if state.turns >= max_turns {
                return Err(AgentsError::MaxTurnsExceeded { max_turns });
            }
            if state.turns > 0 {
                if let Some(delay) = ctx.config.step_delay {
                    await_or_cancel(ctx.token(), async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await?;
                }
            }

            let agent = state.agent.clone();
            let turn = state.turns + 1;
            debug!(turn, agent = %agent.name(), "Starting turn");
            emit(ctx.events, || RunEvent::TurnStarted {
                turn,
                agent: agent.name().to_string(),
            });

            let span = SpanGuard::start(
                ctx.trace,
                SpanType::Turn {
                    agent: agent.name().to_string(),
                    turn,
                },
            );
            match Self::run_turn(ctx, state, &span).await {
                Ok(TurnOutcome::Continue) => span.complete(),
                Ok(TurnOutcome::Final(output)) => {
                    span.complete();
                    return Ok(output);
                }
                Err(e) => {
                    span.fail(&e);
                    return Err(e);
                }
            }
        }
    }

    async fn run_turn(ctx: &Ctx<'_>, state: &mut RunState, span: &SpanGuard) -> Result<TurnOutcome> {
        let agent = state.agent.clone();

        let mut messages = Vec::with_capacity(state.conversation.len() + 1);
        messages.push(agent.build_system_message().await?);
        messages.extend(state.conversation.iter().cloned());

        let tools: Vec<ToolSpec> = agent
            .tools()
            .iter()
            .map(|t| t.spec())
            .chain(agent.handoffs().iter().map(|h| h.tool_spec()))
            .collect();

        let model = agent
            .config
            .model
            .clone()
            .or_else(|| ctx.config.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        if ctx.config.log_messages {
            debug!(
                target: "agent_relay::messages",
                "\n=== Sending to provider (model: {}) ===\n{}\n=== end ===",
                model,
                format_messages_for_log(&messages)
            );
        }

        let request = ModelRequest {
            model: model.clone(),
            messages,
            tools,
            settings: ctx.config.model_settings.merge(&agent.config.model_settings),
        };

        let (response, usage) = {
            let generation = SpanGuard::start(ctx.trace, SpanType::Generation { model: model.clone() });
            match await_or_cancel(ctx.token(), Self::complete(ctx, request)).await {
                Ok((response, usage)) => {
                    generation.set_attribute("usage", serde_json::to_value(&usage)?);
                    generation.complete();
                    (response, usage)
                }
                Err(e) => {
                    generation.fail(&e);
                    return Err(e);
                }
            }
        };

        state.turns += 1;
        state.usage += &usage;
        state.usage_stats.record(&model, agent.name(), usage.clone());
        span.set_attribute("usage", serde_json::to_value(&usage)?);
        debug!(
            turn = state.turns,
            tool_calls = response.tool_calls.len(),
            total_tokens = usage.total_tokens,
            "Model responded"
        );

        if response.has_tool_calls() {
            match Self::decide_transfer(ctx, &agent, &response)? {
                Some(Transfer::Take { call, handoff }) => {
                    Self::transfer(ctx, state, &agent, &response, call, handoff).await?;
                }
                Some(Transfer::Declined {
                    call_id,
                    target,
                    reason,
                }) => {
                    let declined = (call_id, format!("Handoff to {} was declined: {}", target, reason));
                    Self::dispatch_tools(ctx, state, &agent, &response, Some(declined)).await?;
                }
                None => Self::dispatch_tools(ctx, state, &agent, &response, None).await?,
            }
            return Ok(TurnOutcome::Continue);
        }

        let text = response.text().to_string();
        state.conversation.push(response.to_message());

        let structured = match agent.output_type() {
            Some(output_type) => Some(output_type.parse(&text)?),
            None => None,
        };

        let text = if agent.output_guardrails().is_empty() {
            text
        } else {
            let guard_span = SpanGuard::start(
                ctx.trace,
                SpanType::Guardrail {
                    kind: "output".to_string(),
                    agent: agent.name().to_string(),
                },
            );
            match GuardrailRunner::check_output(agent.output_guardrails(), &text).await {
                Ok(out) => {
                    guard_span.complete();
                    out
                }
                Err(e) => {
                    guard_span.fail(&e);
                    return Err(e);
                }
            }
        };

        agent
            .hooks()
            .on_end(&agent, &text, structured.as_ref())
            .await
            .map_err(hook_failed("on_end"))?;

        Ok(TurnOutcome::Final(FinalOutput { text, structured }))
    }

    /// One completion round trip; streamed when someone listens for events.
    async fn complete(ctx: &Ctx<'_>, request: ModelRequest) -> Result<(ModelResponse, Usage)> {
        let Some(events) = ctx.events else {
            return ctx.provider.complete(request).await;
        };

        let mut chunks = ctx.provider.stream(request).await?;
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut finish_reason = None;
        let mut usage = None;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if !chunk.delta.is_empty() {
                content.push_str(&chunk.delta);
                emit(Some(events), || RunEvent::MessageDelta { delta: chunk.delta.clone() });
            }
            tool_calls.extend(chunk.tool_calls);
            if chunk.finish_reason.is_some() {
                finish_reason = chunk.finish_reason;
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }

        let response = ModelResponse {
            id: Uuid::new_v4().to_string(),
            content: (!content.is_empty()).then_some(content),
            tool_calls,
            finish_reason,
            created_at: chrono::Utc::now(),
        };
        Ok((response, usage.unwrap_or_default()))
    }

    /// Offers the first transfer-shaped call to its handoff.
    fn decide_transfer(
        ctx: &Ctx<'_>,
        agent: &Agent,
        response: &ModelResponse,
    ) -> Result<Option<Transfer>> {
        let found = response.tool_calls.iter().find_map(|call| {
            agent
                .handoffs()
                .iter()
                .find(|h| h.tool_name() == call.name)
                .map(|h| (call, h.clone()))
        });
        let Some((call, handoff)) = found else {
            return Ok(None);
        };

        let target = handoff.target().name().to_string();
        let reason = if !handoff.should_handoff(&call.arguments)? {
            Some(format!("{} condition not met", handoff.kind()))
        } else {
            match &ctx.config.handoff_registry {
                Some(registry) => registry
                    .check(agent.name(), &target)
                    .err()
                    .map(|suppressed| suppressed.to_string()),
                None => None,
            }
        };

        Ok(Some(match reason {
            None => Transfer::Take {
                call: call.clone(),
                handoff,
            },
            Some(reason) => {
                info!(from = %agent.name(), to = %target, %reason, "Handoff declined");
                Transfer::Declined {
                    call_id: call.id.clone(),
                    target,
                    reason,
                }
            }
        }))
    }

    async fn transfer(
        ctx: &Ctx<'_>,
        state: &mut RunState,
        source: &Arc<Agent>,
        response: &ModelResponse,
        call: ToolCall,
        handoff: Arc<dyn Handoff>,
    ) -> Result<()> {
        schema::validate_json(&call.arguments, handoff.input_schema()).map_err(|e| {
            AgentsError::InvalidHandoffInput {
                handoff: handoff.tool_name(),
                message: e.to_string(),
            }
        })?;

        let target = handoff.target().clone();
        let span = SpanGuard::start(
            ctx.trace,
            SpanType::Handoff {
                from: source.name().to_string(),
                to: target.name().to_string(),
            },
        );
        span.set_attribute("input", call.arguments.clone());

        let carried = Self::carry_over(ctx, state, source, &target, response, &call, handoff.as_ref()).await;

        let data = match carried {
            Ok(data) => data,
            Err(e) => {
                span.fail(&e);
                return Err(e);
            }
        };

        // recorded only once nothing before the commit can fail
        if let Some(registry) = &ctx.config.handoff_registry {
            if let Err(suppressed) = registry.can_handoff(source.name(), target.name()) {
                let e = AgentsError::HandoffError {
                    message: suppressed.to_string(),
                };
                span.fail(&e);
                return Err(e);
            }
        }
        handoff.mark_fired();

        info!(from = %source.name(), to = %target.name(), "Handing off");
        state.input_len = data.input_history.len();
        state.conversation = data.into_messages();
        state.agent = target.clone();
        emit(ctx.events, || RunEvent::Handoff {
            from: source.name().to_string(),
            to: target.name().to_string(),
        });

        match target.hooks().on_start(&target).await {
            Ok(()) => {
                span.complete();
                Ok(())
            }
            Err(e) => {
                let e = hook_failed("on_start")(e);
                span.fail(&e);
                Err(e)
            }
        }
    }

    /// Builds the transfer payload, notifies everyone involved and applies the filters.
    async fn carry_over(
        ctx: &Ctx<'_>,
        state: &RunState,
        source: &Arc<Agent>,
        target: &Arc<Agent>,
        response: &ModelResponse,
        call: &ToolCall,
        handoff: &dyn Handoff,
    ) -> Result<HandoffInputData> {
        let ack = json!({ "handoff": target.name(), "ack": true });
        let new_items = vec![
            Message::assistant_with_tool_calls(response.text(), vec![call.clone()]),
            Message::tool(ack.to_string(), &call.id),
        ];

        let split = state.input_len.min(state.conversation.len());
        let mut metadata = Map::new();
        metadata.insert("handoff_input".to_string(), Value::String(call.arguments.clone()));
        metadata.insert("source_agent".to_string(), Value::String(source.name().to_string()));
        metadata.insert("target_agent".to_string(), Value::String(target.name().to_string()));
        let data = HandoffInputData {
            input_history: state.conversation[..split].to_vec(),
            pre_handoff_items: state.conversation[split..].to_vec(),
            new_items,
            metadata,
        };

        handoff
            .on_handoff(&data, &call.arguments)
            .map_err(handoff_failed)?;
        if let Some(callback) = &ctx.config.handoff_callback {
            callback(target.name(), source.name(), &call.arguments).map_err(handoff_failed)?;
        }

        target
            .hooks()
            .on_handoff(target, source)
            .await
            .map_err(hook_failed("on_handoff"))?;

        let data = handoff.filter_input(data).map_err(handoff_failed)?;
        match &ctx.config.handoff_input_filter {
            Some(filter) => filter(data).map_err(handoff_failed),
            None => Ok(data),
        }
    }

    /// Runs every call of the response in order and appends the tool messages.
    async fn dispatch_tools(
        ctx: &Ctx<'_>,
        state: &mut RunState,
        agent: &Arc<Agent>,
        response: &ModelResponse,
        declined: Option<(String, String)>,
    ) -> Result<()> {
        state.conversation.push(response.to_message());
        let mut router = ToolRouter::for_agent(agent, ctx.trace);

        for call in &response.tool_calls {
            if agent.handoffs().iter().any(|h| h.tool_name() == call.name) {
                let content = match &declined {
                    Some((id, message)) if *id == call.id => message.clone(),
                    _ => format!(
                        "Handoff '{}' was not taken: only the first handoff of a response is considered",
                        call.name
                    ),
                };
                state.conversation.push(Message::tool(content, &call.id));
                continue;
            }

            emit(ctx.events, || RunEvent::ToolCalled {
                agent: agent.name().to_string(),
                call: call.clone(),
            });

            let invocation = ToolInvocation::from(call);
            let output = await_or_cancel(ctx.token(), async {
                router.ready().await?.call(invocation).await
            })
            .await?;

            emit(ctx.events, || RunEvent::ToolOutput {
                agent: agent.name().to_string(),
                call_id: output.id.clone(),
                tool: output.name.clone(),
                output: output.content.clone(),
            });
            state.conversation.push(output.into_message());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::SimpleHandoff;
    use crate::model::ScriptedProvider;
    use crate::tool::FunctionTool;
    use pretty_assertions::assert_eq;

    fn scripted(responses: Vec<ModelResponse>) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider::new(responses))
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("ñññññ", 2), "ññ…");
    }

    #[test]
    fn test_format_messages_for_log() {
        let call = ToolCall::new("call_1", "lookup", "{}");
        let out = format_messages_for_log(&[
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant_with_tool_calls("", vec![call]),
            Message::tool("42", "call_1"),
        ]);
        assert!(out.contains("00 SYSTEM"));
        assert!(out.contains("tool_calls=[id=call_1, name=lookup]"));
        assert!(out.contains("tool_call_id=call_1 payload=42"));
    }

    #[test]
    fn test_run_config_from_settings() {
        let settings = RunnerSettings {
            default_model: "gpt-4o-mini".to_string(),
            max_turns: 3,
            step_delay_ms: Some(20),
            handoff_min_interval_ms: Some(500),
            ..Default::default()
        };
        let config = RunConfig::from_settings(&settings);
        assert_eq!(config.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.max_turns, 3);
        assert_eq!(config.step_delay, Some(Duration::from_millis(20)));
        assert_eq!(
            config.handoff_registry.unwrap().min_interval(),
            Duration::from_millis(500)
        );
    }

    #[tokio::test]
    async fn test_missing_provider() {
        let err = Runner::run(Agent::simple("A", "a"), "hi", RunConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err.error, AgentsError::ModelProviderRequired));
        assert!(err.history.is_empty());
    }

    #[tokio::test]
    async fn test_request_shape() {
        let provider = scripted(vec![ModelResponse::new_message("ok")]);
        let billing = Agent::simple("Billing", "Handle billing");
        let agent = Agent::simple("Triage", "Route requests")
            .with_model("gpt-4o-mini")
            .with_model_settings(ModelSettings {
                temperature: Some(0.1),
                ..Default::default()
            })
            .with_tool(Arc::new(FunctionTool::simple("lookup", "Look up", |s| s)))
            .with_handoff(Arc::new(SimpleHandoff::new(billing, "")));
        let config = RunConfig::default()
            .with_provider(provider.clone())
            .with_model("gpt-4o")
            .with_model_settings(ModelSettings {
                temperature: Some(0.9),
                max_tokens: Some(64),
                ..Default::default()
            });

        Runner::run(agent, "hello", config).await.unwrap();

        let request = &provider.requests()[0];
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.messages[0], Message::system("Route requests"));
        assert_eq!(request.messages[1], Message::user("hello"));
        let names: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["lookup", "transfer_to_billing"]);
        assert_eq!(request.settings.temperature, Some(0.1));
        assert_eq!(request.settings.max_tokens, Some(64));
    }

    #[tokio::test]
    async fn test_default_model_is_used() {
        let provider = scripted(vec![ModelResponse::new_message("ok")]);
        let config = RunConfig::default().with_provider(provider.clone());
        Runner::run(Agent::simple("A", "a"), "hi", config).await.unwrap();
        assert_eq!(provider.requests()[0].model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_text_with_tool_calls_is_not_final() {
        let provider = scripted(vec![
            ModelResponse::new_mixed("let me check", vec![ToolCall::new("c1", "lookup", "{}")]),
            ModelResponse::new_message("checked"),
        ]);
        let agent = Agent::simple("A", "a")
            .with_tool(Arc::new(FunctionTool::simple("lookup", "Look up", |_| "found".into())));
        let result = Runner::run(agent, "hi", RunConfig::default().with_provider(provider))
            .await
            .unwrap();

        assert_eq!(result.final_output, "checked");
        assert_eq!(result.turns, 2);
        assert_eq!(result.history[1].content, "let me check");
        assert_eq!(result.history[2], Message::tool("found", "c1"));
    }

    #[tokio::test]
    async fn test_declined_handoff_answers_with_tool_message() {
        let provider = scripted(vec![
            ModelResponse::new_tool_calls(vec![ToolCall::new("h1", "transfer_to_billing", "{}")]),
            ModelResponse::new_message("staying"),
        ]);
        let billing = Agent::simple("Billing", "Handle billing");
        let handoff = crate::handoff::KeywordHandoff::new(billing, "", vec!["invoice"]);
        let agent = Agent::simple("Triage", "Route").with_handoff(Arc::new(handoff));

        let result = Runner::run(agent, "hi", RunConfig::default().with_provider(provider))
            .await
            .unwrap();

        assert_eq!(result.last_agent_name(), "Triage");
        let reply = &result.history[2];
        assert_eq!(reply.tool_call_id.as_deref(), Some("h1"));
        assert_eq!(
            reply.content,
            "Handoff to Billing was declined: keyword_handoff condition not met"
        );
    }

    #[tokio::test]
    async fn test_run_span_records_outcome() {
        let exporter = Arc::new(crate::tracing::InMemoryExporter::new());
        let provider = scripted(vec![ModelResponse::new_message("done")]);
        let config = RunConfig::default()
            .with_provider(provider)
            .with_exporter(exporter.clone());

        let result = Runner::run(Agent::simple("A", "a"), "hi", config).await.unwrap();

        let traces = exporter.traces();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].0, result.trace_id);
        let spans = &traces[0].1;
        assert!(spans.iter().all(|s| !s.is_open()));
        let run = &spans[0];
        assert_eq!(run.attributes["output"], json!("done"));
        assert_eq!(run.attributes["turns"], json!(1));
        assert_eq!(run.attributes["last_agent"], json!("A"));
        assert_eq!(run.attributes["usage"]["total_tokens"], json!(15));
        let labels: Vec<&str> = spans.iter().map(|s| s.span_type.label()).collect();
        assert_eq!(labels, vec!["run", "turn", "generation"]);
    }
}
