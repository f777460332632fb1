//! Integration tests for the agentic loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_hooks::{HookContext, HookFuture, HookHandler, HookOutcome, HookPhase};
use relay_loop::AgentLoop;
use relay_tool::{Tool, ToolRegistry};
use relay_types::{
    AgentEvent, BudgetConfig, Chunk, ChunkStream, FailureCause, FinishReason, GenerateRequest,
    LoopConfig, Observation, Provider, ProviderError, TokenEstimator, ToolCallRequest, ToolError,
    TruncatingSummarizer, Usage,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// A provider that replays scripted chunk sequences, one per call.
struct MockProvider {
    scripts: Mutex<Vec<Vec<Chunk>>>,
}

impl MockProvider {
    fn new(scripts: Vec<Vec<Chunk>>) -> Self {
        Self { scripts: Mutex::new(scripts) }
    }
}

impl Provider for MockProvider {
    async fn generate(&self, _request: GenerateRequest) -> Result<ChunkStream, ProviderError> {
        let chunks = {
            let mut scripts = self.scripts.lock().expect("test lock poisoned");
            if scripts.is_empty() {
                return Err(ProviderError::InvalidRequest("no scripted response left".into()));
            }
            scripts.remove(0)
        };
        let (tx, rx) = tokio::sync::mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            let _ = tx.try_send(chunk);
        }
        Ok(ChunkStream { receiver: rx, abort: CancellationToken::new() })
    }
}

/// A provider whose stream never produces anything.
struct StalledProvider;

impl Provider for StalledProvider {
    async fn generate(&self, _request: GenerateRequest) -> Result<ChunkStream, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        // Keep the sender alive forever so the stream never closes.
        tokio::spawn(async move {
            let _tx = tx;
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        Ok(ChunkStream { receiver: rx, abort: CancellationToken::new() })
    }
}

/// Fails the first call with a retryable error, then delegates.
struct FlakyProvider {
    inner: MockProvider,
    failures_left: AtomicUsize,
}

impl Provider for FlakyProvider {
    async fn generate(&self, request: GenerateRequest) -> Result<ChunkStream, ProviderError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::ServiceUnavailable("warming up".into()));
        }
        self.inner.generate(request).await
    }
}

fn text_response(text: &str) -> Vec<Chunk> {
    vec![
        Chunk::TextDelta { text: text.to_string() },
        Chunk::Usage(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            finish_reason: Some(FinishReason::EndTurn),
        }),
    ]
}

fn tool_response(id: &str, name: &str, arguments: serde_json::Value) -> Vec<Chunk> {
    vec![
        Chunk::ToolCall(ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }),
        Chunk::Usage(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            finish_reason: Some(FinishReason::ToolUse),
        }),
    ]
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct CanvasArgs {
    #[serde(rename = "type")]
    kind: String,
    color: Option<String>,
}

struct CanvasWrite;

impl Tool for CanvasWrite {
    const NAME: &'static str = "canvas_write";
    type Args = CanvasArgs;
    type Output = serde_json::Value;

    fn description(&self) -> &str {
        "Draw an element on the canvas"
    }

    async fn call(&self, args: CanvasArgs) -> Result<serde_json::Value, ToolError> {
        Ok(serde_json::json!({
            "entity_id": "el-1",
            "type": args.kind,
            "color": args.color,
        }))
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct Empty {}

struct FlakyTool {
    failures_left: Arc<AtomicUsize>,
}

impl Tool for FlakyTool {
    const NAME: &'static str = "flaky";
    type Args = Empty;
    type Output = serde_json::Value;

    fn description(&self) -> &str {
        "Fails transiently a few times"
    }

    async fn call(&self, _args: Empty) -> Result<serde_json::Value, ToolError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ToolError::Transient("socket closed".into()));
        }
        Ok(serde_json::json!({"ok": true}))
    }
}

fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register_typed(CanvasWrite);
    registry
}

fn agent<P: Provider + 'static>(provider: P, registry: ToolRegistry) -> AgentLoop<P, TruncatingSummarizer> {
    AgentLoop::builder(provider, TruncatingSummarizer)
        .system_prompt("You are a canvas agent.")
        .tools(registry)
        .config(LoopConfig { session_id: "test-session".into(), ..Default::default() })
        .build()
        .unwrap()
}

async fn drain(mut rx: tokio::sync::mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Event ordering contract: terminal event last, every acting paired
/// with a following observing.
fn assert_well_formed(events: &[AgentEvent]) {
    let terminal_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_terminal())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(terminal_positions.len(), 1, "exactly one terminal event: {events:?}");
    assert_eq!(terminal_positions[0], events.len() - 1, "nothing after terminal");

    let mut open_acting = 0usize;
    for event in events {
        match event {
            AgentEvent::Acting { .. } => {
                assert_eq!(open_acting, 0, "acting before previous observing resolved");
                open_acting += 1;
            }
            AgentEvent::Observing { .. } => {
                assert_eq!(open_acting, 1, "observing without a preceding acting");
                open_acting -= 1;
            }
            _ => {}
        }
    }
    assert_eq!(open_acting, 0, "acting without matching observing");
}

#[tokio::test]
async fn chat_without_tools_completes() {
    let provider = MockProvider::new(vec![text_response("Hello! How can I help?")]);
    let agent = agent(provider, registry());

    let events = drain(agent.run_turn("hello")).await;
    assert_well_formed(&events);
    assert!(matches!(events.first(), Some(AgentEvent::Thinking { .. })));
    let Some(AgentEvent::Complete { summary, metrics }) = events.last() else {
        panic!("expected complete, got {events:?}");
    };
    assert_eq!(summary, "Hello! How can I help?");
    assert_eq!(metrics.iterations, 1);
    assert_eq!(metrics.tool_calls, 0);

    let store = agent.context().lock().await;
    let roles: Vec<_> = store.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![
        relay_types::Role::System,
        relay_types::Role::User,
        relay_types::Role::Assistant,
    ]);
}

#[tokio::test]
async fn single_tool_call_round_trip() {
    let provider = MockProvider::new(vec![
        tool_response("call-1", "canvas_write", serde_json::json!({"type": "rect", "color": "blue"})),
        text_response("Added a blue box."),
    ]);
    let agent = agent(provider, registry());

    let events = drain(agent.run_turn("add blue box")).await;
    assert_well_formed(&events);

    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::Acting { tool, .. } if tool == "canvas_write"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::Observing { outcome: Observation::Success { .. }, .. }
    )));
    let Some(AgentEvent::Complete { summary, metrics }) = events.last() else {
        panic!("expected complete");
    };
    assert_eq!(summary, "Added a blue box.");
    assert_eq!(metrics.tool_calls, 1);
    assert_eq!(metrics.iterations, 2);

    let store = agent.context().lock().await;
    let roles: Vec<_> = store.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![
        relay_types::Role::System,
        relay_types::Role::User,
        relay_types::Role::Assistant,
        relay_types::Role::Tool,
        relay_types::Role::Assistant,
    ]);
    let tool_msg = store.iter().find(|m| m.role == relay_types::Role::Tool).unwrap();
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call-1"));
}

struct DangerBlocker;
impl HookHandler for DangerBlocker {
    fn on_phase<'a>(&'a self, ctx: &'a mut HookContext) -> HookFuture<'a> {
        Box::pin(async move {
            if ctx.tool_name.as_deref() == Some("canvas_write") {
                Ok(HookOutcome::Block { reason: "policy".into() })
            } else {
                Ok(HookOutcome::Pass)
            }
        })
    }
}

#[tokio::test]
async fn blocked_tool_is_observed_and_blocked_again_on_retry() {
    let provider = MockProvider::new(vec![
        tool_response("call-1", "canvas_write", serde_json::json!({"type": "rect"})),
        tool_response("call-2", "canvas_write", serde_json::json!({"type": "rect"})),
        text_response("I could not draw it."),
    ]);
    let agent = agent(provider, registry());
    agent.hooks().register(HookPhase::PreToolUse, Arc::new(DangerBlocker));

    let events = drain(agent.run_turn("add box")).await;
    assert_well_formed(&events);

    let blocks: Vec<&AgentEvent> = events
        .iter()
        .filter(|e| matches!(
            e,
            AgentEvent::Observing { outcome: Observation::Error { code, message }, .. }
                if code == "hook_blocked" && message == "policy"
        ))
        .collect();
    assert_eq!(blocks.len(), 2, "the identical retry is blocked again");
    assert!(matches!(events.last(), Some(AgentEvent::Complete { .. })));
}

#[tokio::test]
async fn clarify_tool_terminates_with_questions() {
    let provider = MockProvider::new(vec![tool_response(
        "call-1",
        "clarify",
        serde_json::json!({"questions": ["Which color?", "Which size?"]}),
    )]);
    let agent = agent(provider, registry());

    let events = drain(agent.run_turn("add box")).await;
    assert_well_formed(&events);
    let Some(AgentEvent::ClarificationNeeded { questions }) = events.last() else {
        panic!("expected clarification, got {events:?}");
    };
    assert_eq!(questions, &["Which color?", "Which size?"]);
    // No acting/observing for the clarify pseudo-tool.
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::Acting { .. })));
}

#[tokio::test]
async fn reasoning_tags_become_events() {
    let provider = MockProvider::new(vec![text_response(
        "<analyze>user wants a box</analyze><decide>draw it</decide>Done!",
    )]);
    let agent = agent(provider, registry());

    let events = drain(agent.run_turn("box please")).await;
    let phases: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Reasoning { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec![
        relay_types::ReasoningPhase::Analyze,
        relay_types::ReasoningPhase::Decide,
    ]);
    let Some(AgentEvent::Complete { summary, .. }) = events.last() else {
        panic!("expected complete");
    };
    assert_eq!(summary, "Done!");
}

#[tokio::test]
async fn max_iterations_exhaustion_fails_the_turn() {
    let provider = MockProvider::new(vec![
        tool_response("call-1", "canvas_write", serde_json::json!({"type": "rect"})),
        tool_response("call-2", "canvas_write", serde_json::json!({"type": "rect"})),
    ]);
    let agent = AgentLoop::builder(provider, TruncatingSummarizer)
        .system_prompt("sys")
        .tools(registry())
        .config(LoopConfig { max_iterations: 1, ..Default::default() })
        .build()
        .unwrap();

    let events = drain(agent.run_turn("keep going")).await;
    assert_well_formed(&events);
    assert!(matches!(
        events.last(),
        Some(AgentEvent::Failed { cause: FailureCause::MaxIterationsExceeded })
    ));
}

#[tokio::test]
async fn transient_tool_failures_retry_silently() {
    let failures = Arc::new(AtomicUsize::new(2));
    let mut reg = ToolRegistry::new();
    reg.register_typed(FlakyTool { failures_left: Arc::clone(&failures) });

    let provider = MockProvider::new(vec![
        tool_response("call-1", "flaky", serde_json::json!({})),
        text_response("worked eventually"),
    ]);
    let agent = agent(provider, reg);

    let events = drain(agent.run_turn("try it")).await;
    assert_well_formed(&events);

    let observations: Vec<&AgentEvent> = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Observing { .. }))
        .collect();
    assert_eq!(observations.len(), 1, "retries are silent");
    assert!(matches!(
        observations[0],
        AgentEvent::Observing { outcome: Observation::Success { .. }, .. }
    ));
    assert_eq!(failures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exhausted_retry_budget_surfaces_the_error() {
    let failures = Arc::new(AtomicUsize::new(usize::MAX));
    let mut reg = ToolRegistry::new();
    reg.register_typed(FlakyTool { failures_left: Arc::clone(&failures) });

    let provider = MockProvider::new(vec![
        tool_response("call-1", "flaky", serde_json::json!({})),
        text_response("giving up"),
    ]);
    let agent = AgentLoop::builder(provider, TruncatingSummarizer)
        .system_prompt("sys")
        .tools(reg)
        .config(LoopConfig { retries_per_tool_call: 1, ..Default::default() })
        .build()
        .unwrap();

    let events = drain(agent.run_turn("try it")).await;
    assert_well_formed(&events);
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::Observing { outcome: Observation::Error { code, .. }, .. } if code == "transient"
    )));
}

#[tokio::test]
async fn cancellation_before_first_suspension_yields_only_failed() {
    let provider = MockProvider::new(vec![text_response("never sent")]);
    let agent = agent(provider, registry());
    agent.cancellation_token().cancel();

    let events = drain(agent.run_turn("hello")).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        AgentEvent::Failed { cause: FailureCause::Cancelled }
    ));

    // The user message survives cancellation.
    let store = agent.context().lock().await;
    assert!(store.iter().any(|m| m.role == relay_types::Role::User));
}

#[tokio::test]
async fn timeout_behaves_like_cancellation() {
    let agent = AgentLoop::builder(StalledProvider, TruncatingSummarizer)
        .system_prompt("sys")
        .config(LoopConfig {
            per_turn_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        })
        .build()
        .unwrap();

    let events = drain(agent.run_turn("hang forever")).await;
    assert_well_formed(&events);
    assert!(matches!(
        events.last(),
        Some(AgentEvent::Failed { cause: FailureCause::Timeout })
    ));
}

#[tokio::test]
async fn provider_failures_are_retried_then_succeed() {
    let provider = FlakyProvider {
        inner: MockProvider::new(vec![text_response("recovered")]),
        failures_left: AtomicUsize::new(1),
    };
    let agent = agent(provider, registry());

    let events = drain(agent.run_turn("hello")).await;
    let Some(AgentEvent::Complete { summary, .. }) = events.last() else {
        panic!("expected recovery, got {events:?}");
    };
    assert_eq!(summary, "recovered");
}

#[tokio::test]
async fn terminal_provider_failure_fails_the_turn() {
    let provider = FlakyProvider {
        inner: MockProvider::new(vec![]),
        failures_left: AtomicUsize::new(usize::MAX),
    };
    let agent = agent(provider, registry());

    let events = drain(agent.run_turn("hello")).await;
    assert!(matches!(
        events.last(),
        Some(AgentEvent::Failed { cause: FailureCause::Provider(_) })
    ));
}

#[tokio::test]
async fn budget_overflow_is_fatal_for_the_turn() {
    let budget = BudgetConfig {
        ceiling: 1024,
        response_reserve: 400,
        tool_reserve: 100,
        recent_turns_count: 1,
        ..Default::default()
    };
    let provider = MockProvider::new(vec![text_response("unreachable")]);
    let agent = AgentLoop::builder(provider, TruncatingSummarizer)
        .system_prompt("sys")
        .budget(budget)
        .build()
        .unwrap();

    // One pinned user message bigger than the whole envelope.
    let events = drain(agent.run_turn("x".repeat(4000))).await;
    assert_well_formed(&events);
    assert!(matches!(
        events.last(),
        Some(AgentEvent::Failed { cause: FailureCause::BudgetOverflow })
    ));
}

struct CheckpointSpy(Arc<Mutex<Vec<serde_json::Value>>>);
impl HookHandler for CheckpointSpy {
    fn on_phase<'a>(&'a self, ctx: &'a mut HookContext) -> HookFuture<'a> {
        Box::pin(async move {
            if let Some(view) = ctx.metadata.get("checkpoint") {
                self.0.lock().unwrap().push(view.clone());
            }
            Ok(HookOutcome::Pass)
        })
    }
}

#[tokio::test]
async fn checkpoint_hook_receives_a_serializable_view() {
    let provider = MockProvider::new(vec![text_response("done")]);
    let agent = agent(provider, registry());
    let seen = Arc::new(Mutex::new(Vec::new()));
    agent
        .hooks()
        .register(HookPhase::Checkpoint, Arc::new(CheckpointSpy(Arc::clone(&seen))));

    drain(agent.run_turn("hello")).await;

    let views = seen.lock().unwrap();
    assert_eq!(views.len(), 1);
    let messages = views[0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3, "system + user + assistant");
    assert!(views[0].get("metrics").is_some());
}

#[tokio::test]
async fn dropped_receiver_cancels_and_frees_the_session() {
    let provider = MockProvider::new(vec![
        text_response("first"),
        text_response("second"),
    ]);
    let agent = agent(provider, registry());

    // Drop the first turn's receiver without draining it. The turn
    // takes the cancellation path; only its child token is cancelled.
    drop(agent.run_turn("first message"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The same session accepts the next turn.
    let events = drain(agent.run_turn("second message")).await;
    assert!(matches!(events.last(), Some(AgentEvent::Complete { .. })));
}

#[tokio::test]
async fn empty_tool_result_still_advances_the_loop() {
    #[derive(Debug, Deserialize, schemars::JsonSchema)]
    struct NoArgs {}
    struct Silent;
    impl Tool for Silent {
        const NAME: &'static str = "silent";
        type Args = NoArgs;
        type Output = serde_json::Value;
        fn description(&self) -> &str {
            "Says nothing"
        }
        async fn call(&self, _args: NoArgs) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::Value::Null)
        }
    }

    let mut reg = ToolRegistry::new();
    reg.register_typed(Silent);
    let provider = MockProvider::new(vec![
        tool_response("call-1", "silent", serde_json::json!({})),
        text_response("all quiet"),
    ]);
    let agent = agent(provider, reg);

    let events = drain(agent.run_turn("shh")).await;
    assert_well_formed(&events);
    assert!(matches!(events.last(), Some(AgentEvent::Complete { .. })));
}

#[tokio::test]
async fn custom_estimator_is_honored() {
    struct Doubler;
    impl TokenEstimator for Doubler {
        fn estimate(&self, text: &str) -> usize {
            text.len() * 2
        }
    }

    let provider = MockProvider::new(vec![text_response("ok")]);
    let agent = AgentLoop::builder(provider, TruncatingSummarizer)
        .system_prompt("sys")
        .estimator(Arc::new(Doubler))
        .build()
        .unwrap();

    drain(agent.run_turn("hi")).await;
    let store = agent.context().lock().await;
    let user = store.iter().find(|m| m.role == relay_types::Role::User).unwrap();
    assert_eq!(user.token_estimate, 2 * 2 + 4);
}
