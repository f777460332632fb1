//! Core [`AgentLoop`] struct, builder, and the turn driver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_context::{BudgetPlanner, ContextStore};
use relay_hooks::{HookContext, HookPhase, HookPipeline};
use relay_plan::PlanStore;
use relay_tool::{DispatchOutcome, Dispatcher, ToolRegistry};
use relay_types::{
    AgentEvent, BudgetConfig, CharEstimator, Chunk, ChunkStream, ConfigError, ContextError,
    FailureCause, GenerateRequest, HookConfig, LoopConfig, Provider, Role, Summarizer,
    TokenEstimator, ToolCallRequest, ToolError, TurnMetrics, Usage,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::checkpoint::CheckpointView;
use crate::events::EventSender;
use crate::parse::parse_response;

/// The reserved tool name the model uses to ask the user a question.
pub const CLARIFY_TOOL: &str = "clarify";

/// Retries for retryable provider failures before the turn fails.
const PROVIDER_RETRIES: usize = 2;

/// How one turn ended. Terminal events are emitted by `finish`, after
/// the driver unwinds, so a timeout that drops the driver mid-await
/// still produces exactly one terminal event.
enum TurnEnd {
    Complete { summary: String, metrics: TurnMetrics },
    Clarify(Vec<String>),
    Failed(FailureCause),
    SinkClosed,
}

/// A fully assembled provider response.
#[derive(Default)]
struct Assembled {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
    usage: Option<Usage>,
}

/// The agentic loop: one instance per session.
///
/// Owns the session's context store, budget planner, hook pipeline,
/// and tool dispatcher; talks to the LLM through the injected
/// [`Provider`]. One turn runs at a time; a second
/// [`run_turn`](AgentLoop::run_turn) waits for the first to terminate.
pub struct AgentLoop<P: Provider + 'static, S: Summarizer + Send + Sync + 'static> {
    provider: Arc<P>,
    summarizer: Arc<S>,
    dispatcher: Arc<Dispatcher>,
    store: Arc<tokio::sync::Mutex<ContextStore>>,
    hooks: Arc<HookPipeline>,
    plan_store: Option<Arc<PlanStore>>,
    config: LoopConfig,
    cancel: CancellationToken,
    turn_gate: Arc<tokio::sync::Mutex<()>>,
}

impl<P: Provider + 'static, S: Summarizer + Send + Sync + 'static> AgentLoop<P, S> {
    /// Start building a loop around a provider and a summarizer.
    #[must_use]
    pub fn builder(provider: P, summarizer: S) -> AgentLoopBuilder<P, S> {
        AgentLoopBuilder {
            provider,
            summarizer,
            system_prompt: String::new(),
            registry: ToolRegistry::new(),
            budget: BudgetConfig::default(),
            hook_config: HookConfig::default(),
            config: LoopConfig::default(),
            plan_store: None,
            estimator: None,
            hooks: None,
        }
    }

    /// The session's context store.
    #[must_use]
    pub fn context(&self) -> &Arc<tokio::sync::Mutex<ContextStore>> {
        &self.store
    }

    /// The session's hook pipeline.
    #[must_use]
    pub fn hooks(&self) -> &Arc<HookPipeline> {
        &self.hooks
    }

    /// The session's tool dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The loop configuration.
    #[must_use]
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// The root cancellation token. Cancelling it aborts the current
    /// turn at its next suspension point.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fire the `session_start` hook phase.
    pub async fn start_session(&self) {
        let mut ctx = HookContext::new(HookPhase::SessionStart);
        ctx.metadata.insert(
            "session_id".to_string(),
            serde_json::Value::String(self.config.session_id.clone()),
        );
        self.hooks.trigger(&mut ctx).await;
    }

    /// Fire the `session_end` hook phase, drop the session's plan, and
    /// destroy the hook pipeline.
    pub async fn end_session(&self) {
        let mut ctx = HookContext::new(HookPhase::SessionEnd);
        self.hooks.trigger(&mut ctx).await;
        if let Some(plans) = &self.plan_store {
            plans.remove(&self.config.session_id);
        }
        self.hooks.destroy();
    }

    /// Run one turn, returning the receiving end of its event sequence.
    ///
    /// The sequence is lazy (the driver blocks when the channel is
    /// full), finite (exactly one terminal event), and non-restartable.
    /// Dropping the receiver cancels the turn.
    pub fn run_turn(&self, user_message: impl Into<String>) -> mpsc::Receiver<AgentEvent> {
        let text = user_message.into();
        let (events, rx) = EventSender::channel(self.config.event_buffer);
        let run = TurnRun {
            provider: Arc::clone(&self.provider),
            summarizer: Arc::clone(&self.summarizer),
            dispatcher: Arc::clone(&self.dispatcher),
            store: Arc::clone(&self.store),
            hooks: Arc::clone(&self.hooks),
            plan_store: self.plan_store.clone(),
            config: self.config.clone(),
            planner: BudgetPlanner::new(),
            cancel: self.cancel.child_token(),
        };
        let gate = Arc::clone(&self.turn_gate);

        tokio::spawn(async move {
            let _turn = gate.lock().await;
            let end = match run.config.per_turn_timeout {
                Some(limit) => match tokio::time::timeout(limit, run.drive(&text, &events)).await {
                    Ok(end) => end,
                    Err(_) => TurnEnd::Failed(FailureCause::Timeout),
                },
                None => run.drive(&text, &events).await,
            };
            run.finish(end, &events).await;
        });
        rx
    }
}

/// Everything one spawned turn owns.
struct TurnRun<P: Provider, S: Summarizer> {
    provider: Arc<P>,
    summarizer: Arc<S>,
    dispatcher: Arc<Dispatcher>,
    store: Arc<tokio::sync::Mutex<ContextStore>>,
    hooks: Arc<HookPipeline>,
    plan_store: Option<Arc<PlanStore>>,
    config: LoopConfig,
    planner: BudgetPlanner,
    cancel: CancellationToken,
}

impl<P: Provider + 'static, S: Summarizer + Send + Sync + 'static> TurnRun<P, S> {
    async fn drive(&self, text: &str, events: &EventSender) -> TurnEnd {
        {
            let mut store = self.store.lock().await;
            store.append(Role::User, text, None, None);
        }
        self.fire_context_change("user").await;

        // A turn cancelled before its first suspension point yields
        // only the terminal event. The user message stays appended.
        if self.cancel.is_cancelled() {
            return TurnEnd::Failed(FailureCause::Cancelled);
        }

        // Liveness signal before the first provider call.
        if events.emit(AgentEvent::Thinking { content: String::new() }).await.is_err() {
            return TurnEnd::SinkClosed;
        }

        let mut metrics = TurnMetrics::default();
        let mut retry_spent: HashMap<String, u32> = HashMap::new();

        for _ in 0..self.config.max_iterations {
            if self.cancel.is_cancelled() {
                return TurnEnd::Failed(FailureCause::Cancelled);
            }

            let mut pre = HookContext::new(HookPhase::PreStep);
            pre.metadata
                .insert("iteration".to_string(), serde_json::json!(metrics.iterations));
            let pre_result = self.hooks.trigger(&mut pre).await;
            if pre_result.blocked {
                return TurnEnd::Failed(FailureCause::Internal(format!(
                    "pre-step hook blocked the turn: {}",
                    pre_result.reason.unwrap_or_default()
                )));
            }

            let prepared = {
                let mut store = self.store.lock().await;
                self.planner.prepare(&mut store, self.summarizer.as_ref()).await
            };
            let prepared = match prepared {
                Ok(view) => view,
                Err(ContextError::BudgetOverflow { .. }) => {
                    return TurnEnd::Failed(FailureCause::BudgetOverflow);
                }
                Err(err) => return TurnEnd::Failed(FailureCause::Internal(err.to_string())),
            };
            let prompt_estimate = prepared.prompt_tokens;

            let request = GenerateRequest {
                model: self.config.model.clone(),
                messages: prepared.messages,
                tools: self.dispatcher.registry().specs(),
                max_tokens: self.config.max_response_tokens,
                temperature: self.config.temperature,
                enabled_tools: None,
                stop_sequences: Vec::new(),
            };

            let assembled = match self.call_provider(request, events).await {
                Ok(assembled) => assembled,
                Err(end) => return end,
            };

            metrics.iterations += 1;
            if let Some(usage) = &assembled.usage {
                metrics.prompt_tokens += usage.prompt_tokens;
                metrics.completion_tokens += usage.completion_tokens;
            } else {
                metrics.prompt_tokens += prompt_estimate;
            }

            let (blocks, residual) = parse_response(&assembled.text);
            for (phase, content) in blocks {
                if events
                    .emit(AgentEvent::Reasoning { phase, content })
                    .await
                    .is_err()
                {
                    return TurnEnd::SinkClosed;
                }
            }

            // The clarify tool ends the turn before anything is
            // registered against the context store.
            if let Some(clarify) = assembled.tool_calls.iter().find(|c| c.name == CLARIFY_TOOL) {
                let questions = parse_questions(&clarify.arguments);
                if !residual.is_empty() {
                    let mut store = self.store.lock().await;
                    store.append(Role::Assistant, residual, None, None);
                }
                return TurnEnd::Clarify(questions);
            }

            {
                let mut store = self.store.lock().await;
                let assistant_id = store.append(Role::Assistant, residual.clone(), None, None);
                for call in &assembled.tool_calls {
                    store.register_tool_call(assistant_id, &call.id);
                }
            }
            self.fire_context_change("assistant").await;

            if assembled.tool_calls.is_empty() {
                if !residual.is_empty() {
                    return TurnEnd::Complete { summary: residual, metrics };
                }
                // Empty response, no tools: push the model again.
                continue;
            }

            for call in assembled.tool_calls {
                if self.cancel.is_cancelled() {
                    return TurnEnd::Failed(FailureCause::Cancelled);
                }
                if events
                    .emit(AgentEvent::Acting {
                        tool: call.name.clone(),
                        input: call.arguments.clone(),
                    })
                    .await
                    .is_err()
                {
                    return TurnEnd::SinkClosed;
                }

                let outcome = self.dispatch_with_retries(&call, &mut retry_spent).await;
                metrics.tool_calls += 1;

                if events
                    .emit(AgentEvent::Observing {
                        tool: call.name.clone(),
                        outcome: outcome.observation(),
                    })
                    .await
                    .is_err()
                {
                    return TurnEnd::SinkClosed;
                }

                let content = match &outcome {
                    DispatchOutcome::Success { output, .. } => output.to_string(),
                    DispatchOutcome::Blocked { reason } => format!("blocked by hook: {reason}"),
                    DispatchOutcome::Failed { error, .. } => error.to_string(),
                };
                {
                    let mut store = self.store.lock().await;
                    if let Err(err) = store.append_tool_result(&call.id, &call.name, content) {
                        return TurnEnd::Failed(FailureCause::Internal(err.to_string()));
                    }
                }
                self.fire_context_change("tool").await;
            }

            let mut post = HookContext::new(HookPhase::PostStep);
            self.hooks.trigger(&mut post).await;
        }

        TurnEnd::Failed(FailureCause::MaxIterationsExceeded)
    }

    /// Call the provider, retrying retryable failures, and assemble
    /// the chunk stream into a full response.
    async fn call_provider(
        &self,
        request: GenerateRequest,
        events: &EventSender,
    ) -> Result<Assembled, TurnEnd> {
        let mut attempt = 0;
        loop {
            match self.provider.generate(request.clone()).await {
                Ok(stream) => return self.drain_stream(stream, events).await,
                Err(err) if err.is_retryable() && attempt < PROVIDER_RETRIES => {
                    attempt += 1;
                    debug!(%err, attempt, "retryable provider failure");
                }
                Err(err) => {
                    return Err(TurnEnd::Failed(FailureCause::Provider(err.to_string())));
                }
            }
        }
    }

    async fn drain_stream(
        &self,
        mut stream: ChunkStream,
        events: &EventSender,
    ) -> Result<Assembled, TurnEnd> {
        let mut assembled = Assembled::default();
        loop {
            tokio::select! {
                chunk = stream.receiver.recv() => match chunk {
                    Some(Chunk::TextDelta { text }) => {
                        assembled.text.push_str(&text);
                        if events.emit(AgentEvent::Thinking { content: text }).await.is_err() {
                            stream.abort.cancel();
                            return Err(TurnEnd::SinkClosed);
                        }
                    }
                    Some(Chunk::ToolCall(call)) => assembled.tool_calls.push(call),
                    Some(Chunk::Usage(usage)) => assembled.usage = Some(usage),
                    None => return Ok(assembled),
                },
                () = self.cancel.cancelled() => {
                    stream.abort.cancel();
                    return Err(TurnEnd::Failed(FailureCause::Cancelled));
                }
            }
        }
    }

    /// Dispatch one tool call, silently retrying transient failures
    /// within the per-turn budget for this call shape. The budget is
    /// keyed by tool name plus canonical arguments, so a rewritten
    /// call from the model starts a fresh budget.
    async fn dispatch_with_retries(
        &self,
        call: &ToolCallRequest,
        retry_spent: &mut HashMap<String, u32>,
    ) -> DispatchOutcome {
        let shape = format!("{}:{}", call.name, call.arguments);
        loop {
            let dispatcher = Arc::clone(&self.dispatcher);
            let name = call.name.clone();
            let input = call.arguments.clone();
            // Spawned so an abandoned turn lets the in-flight call run
            // to completion; only the result is discarded.
            let handle = tokio::spawn(async move { dispatcher.dispatch(&name, input).await });
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => DispatchOutcome::Failed {
                    error: ToolError::ExecutionFailed(join_err.to_string()),
                    effective_input: call.arguments.clone(),
                    duration: Duration::ZERO,
                },
            };

            if outcome.is_retryable() {
                let spent = retry_spent.entry(shape.clone()).or_insert(0);
                if *spent < self.config.retries_per_tool_call {
                    *spent += 1;
                    debug!(tool = %call.name, attempt = *spent, "transient tool failure, retrying");
                    continue;
                }
            }
            return outcome;
        }
    }

    async fn fire_context_change(&self, appended: &str) {
        let mut ctx = HookContext::new(HookPhase::ContextChange);
        ctx.metadata.insert(
            "appended".to_string(),
            serde_json::Value::String(appended.to_string()),
        );
        self.hooks.trigger(&mut ctx).await;
    }

    async fn fire_checkpoint(&self) {
        let plan = match &self.plan_store {
            Some(plans) => plans.snapshot(&self.config.session_id).await,
            None => None,
        };
        let view = CheckpointView {
            messages: self.store.lock().await.snapshot(),
            plan,
            metrics: self.hooks.metrics_snapshot(),
        };
        let mut ctx = HookContext::new(HookPhase::Checkpoint);
        ctx.metadata.insert(
            "checkpoint".to_string(),
            serde_json::to_value(&view).unwrap_or(serde_json::Value::Null),
        );
        self.hooks.trigger(&mut ctx).await;
    }

    /// Emit the terminal event and release turn state. Runs even when
    /// the driver was dropped by the per-turn timeout.
    async fn finish(&self, end: TurnEnd, events: &EventSender) {
        {
            let mut store = self.store.lock().await;
            store.abandon_pending_calls();
        }
        match end {
            TurnEnd::Complete { summary, metrics } => {
                self.fire_checkpoint().await;
                let _ = events.emit(AgentEvent::Complete { summary, metrics }).await;
            }
            TurnEnd::Clarify(questions) => {
                let _ = events
                    .emit(AgentEvent::ClarificationNeeded { questions })
                    .await;
            }
            TurnEnd::Failed(cause) => {
                self.cancel.cancel();
                let _ = events.emit(AgentEvent::Failed { cause }).await;
            }
            TurnEnd::SinkClosed => {
                self.cancel.cancel();
            }
        }
    }
}

/// Pull the model's questions out of a `clarify` call's arguments.
fn parse_questions(arguments: &serde_json::Value) -> Vec<String> {
    if let Some(list) = arguments.get("questions").and_then(|q| q.as_array()) {
        return list
            .iter()
            .filter_map(|q| q.as_str().map(str::to_string))
            .collect();
    }
    if let Some(question) = arguments.get("question").and_then(|q| q.as_str()) {
        return vec![question.to_string()];
    }
    Vec::new()
}

/// Builder for [`AgentLoop`]. Only the provider and summarizer are
/// required; everything else has validated defaults.
pub struct AgentLoopBuilder<P: Provider + 'static, S: Summarizer + Send + Sync + 'static> {
    provider: P,
    summarizer: S,
    system_prompt: String,
    registry: ToolRegistry,
    budget: BudgetConfig,
    hook_config: HookConfig,
    config: LoopConfig,
    plan_store: Option<Arc<PlanStore>>,
    estimator: Option<Arc<dyn TokenEstimator>>,
    hooks: Option<Arc<HookPipeline>>,
}

impl<P: Provider + 'static, S: Summarizer + Send + Sync + 'static> AgentLoopBuilder<P, S> {
    /// Set the system prompt seeded into the context store. Required.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the tool registry.
    #[must_use]
    pub fn tools(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the budget descriptor.
    #[must_use]
    pub fn budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    /// Set the full loop configuration.
    #[must_use]
    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the hook pipeline configuration (ignored when a shared
    /// pipeline is supplied via [`hooks`](Self::hooks)).
    #[must_use]
    pub fn hook_config(mut self, config: HookConfig) -> Self {
        self.hook_config = config;
        self
    }

    /// Share an existing hook pipeline instead of building one.
    #[must_use]
    pub fn hooks(mut self, hooks: Arc<HookPipeline>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Attach the session-keyed plan store for checkpoint snapshots.
    #[must_use]
    pub fn plan_store(mut self, plans: Arc<PlanStore>) -> Self {
        self.plan_store = Some(plans);
        self
    }

    /// Inject a token estimator other than the default
    /// [`CharEstimator`].
    #[must_use]
    pub fn estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Build the loop, validating every configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an invalid budget, loop, or hook
    /// configuration, or a missing system prompt.
    pub fn build(self) -> Result<AgentLoop<P, S>, ConfigError> {
        if self.system_prompt.is_empty() {
            return Err(ConfigError::Invalid("system prompt is required".into()));
        }
        self.config.validate()?;

        let hooks = match self.hooks {
            Some(hooks) => hooks,
            None => Arc::new(HookPipeline::new(self.hook_config)?),
        };
        let estimator = self
            .estimator
            .unwrap_or_else(|| Arc::new(CharEstimator::new()));

        let mut store = ContextStore::new(self.budget, estimator)?;
        store.append(Role::System, self.system_prompt, None, None);

        Ok(AgentLoop {
            provider: Arc::new(self.provider),
            summarizer: Arc::new(self.summarizer),
            dispatcher: Arc::new(Dispatcher::new(self.registry, Arc::clone(&hooks))),
            store: Arc::new(tokio::sync::Mutex::new(store)),
            hooks,
            plan_store: self.plan_store,
            config: self.config,
            cancel: CancellationToken::new(),
            turn_gate: Arc::new(tokio::sync::Mutex::new(())),
        })
    }
}
