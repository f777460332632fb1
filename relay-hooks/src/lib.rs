#![deny(missing_docs)]
//! Hook pipeline for relay.
//!
//! A [`HookPipeline`] holds typed handlers for named phases and fans
//! dispatch out to them in registration order. A handler may observe
//! ([`HookOutcome::Pass`]), veto the call ([`HookOutcome::Block`]), or
//! rewrite the tool input ([`HookOutcome::Rewrite`]); rewrites compose,
//! each replacing the input visible to later handlers and, ultimately,
//! to the tool dispatcher. Handler errors are captured, forwarded to
//! the `Error` phase (never recursively), and never block.
//!
//! The pipeline also owns the per-tool dispatch metrics: call and error
//! counters plus a bounded ring buffer of recent durations per tool.

pub mod metrics;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_types::{ConfigError, HookConfig, HookError};
use tracing::warn;

pub use metrics::{MetricsSnapshot, ToolMetricsSnapshot};
use metrics::MetricsState;

/// A named point in dispatch at which registered handlers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    /// Before a tool handler runs. May block or rewrite.
    PreToolUse,
    /// After a tool handler returned (or threw).
    PostToolUse,
    /// Before each loop iteration's LLM call.
    PreStep,
    /// After each loop iteration.
    PostStep,
    /// After the context store changed (append, compression, eviction).
    ContextChange,
    /// A handler or tool raised; carries the error description.
    Error,
    /// End-of-turn snapshot for the host's persistence callback.
    Checkpoint,
    /// Session construction.
    SessionStart,
    /// Session teardown.
    SessionEnd,
}

/// What a dispatch looks like from a handler's point of view.
///
/// Handlers may mutate `metadata` freely; everything else is filled by
/// the caller for the phase being triggered.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// The phase being dispatched.
    pub phase: HookPhase,
    /// Tool name (tool phases only).
    pub tool_name: Option<String>,
    /// Tool input; rewritten in place as `Rewrite` outcomes compose.
    pub tool_input: Option<serde_json::Value>,
    /// Tool result (`PostToolUse` and `Error` only).
    pub tool_result: Option<serde_json::Value>,
    /// Handler-measured duration (`PostToolUse` only).
    pub duration: Option<Duration>,
    /// When the trigger fired.
    pub timestamp: DateTime<Utc>,
    /// Scratch space shared along the handler chain.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl HookContext {
    /// A context for `phase` with everything else empty.
    #[must_use]
    pub fn new(phase: HookPhase) -> Self {
        Self {
            phase,
            tool_name: None,
            tool_input: None,
            tool_result: None,
            duration: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach a tool name.
    #[must_use]
    pub fn with_tool(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    /// Attach a tool input.
    #[must_use]
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.tool_input = Some(input);
        self
    }

    /// Attach a tool result.
    #[must_use]
    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.tool_result = Some(result);
        self
    }

    /// Attach a measured duration.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// What a handler decides.
#[derive(Debug, Clone)]
pub enum HookOutcome {
    /// Continue to the next handler.
    Pass,
    /// Stop dispatch; the guarded call must not proceed.
    Block {
        /// Why the call was vetoed.
        reason: String,
    },
    /// Replace the tool input for later handlers and the dispatcher.
    Rewrite {
        /// The replacement input.
        input: serde_json::Value,
    },
}

/// Boxed future returned by handlers.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<HookOutcome, HookError>> + Send + 'a>>;

/// A handler registered for one phase.
///
/// Handlers run in registration order and are awaited one at a time. A
/// returned error never blocks the guarded call; the pipeline captures
/// it and moves on.
pub trait HookHandler: Send + Sync {
    /// Called when the registered phase triggers.
    fn on_phase<'a>(&'a self, ctx: &'a mut HookContext) -> HookFuture<'a>;
}

/// The result of one `trigger` call.
#[derive(Debug, Clone, Default)]
pub struct TriggerResult {
    /// A handler vetoed the call.
    pub blocked: bool,
    /// The veto reason, when blocked.
    pub reason: Option<String>,
    /// The final composed input, when any handler rewrote it.
    pub modified_input: Option<serde_json::Value>,
}

/// Identifies a registration for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookHandle(u64);

struct HandlerEntry {
    id: u64,
    phase: HookPhase,
    handler: Arc<dyn HookHandler>,
}

/// Registry and dispatcher for all hook phases of one session.
pub struct HookPipeline {
    handlers: Mutex<Vec<HandlerEntry>>,
    next_id: AtomicU64,
    metrics: Mutex<MetricsState>,
    track_metrics: bool,
}

impl HookPipeline {
    /// Create a pipeline with a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration violates the
    /// schema.
    pub fn new(config: HookConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            metrics: Mutex::new(MetricsState::new(config.metrics_buffer_size)),
            track_metrics: config.track_metrics,
        })
    }

    /// Register a handler for a phase. Returns a handle that
    /// unregisters it when passed to [`unregister`](Self::unregister).
    pub fn register(&self, phase: HookPhase, handler: Arc<dyn HookHandler>) -> HookHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .expect("hook registry poisoned")
            .push(HandlerEntry { id, phase, handler });
        HookHandle(id)
    }

    /// Remove a previously registered handler. Unknown handles are a
    /// no-op.
    pub fn unregister(&self, handle: HookHandle) {
        self.handlers
            .lock()
            .expect("hook registry poisoned")
            .retain(|entry| entry.id != handle.0);
    }

    /// Dispatch a phase through its handlers in registration order.
    ///
    /// Stops at the first [`HookOutcome::Block`]; later handlers are
    /// not invoked. Handler errors are captured, forwarded to the
    /// `Error` phase, and dispatch continues.
    pub async fn trigger(&self, ctx: &mut HookContext) -> TriggerResult {
        let chain = self.chain_for(ctx.phase);
        let mut result = TriggerResult::default();

        for handler in chain {
            match handler.on_phase(ctx).await {
                Ok(HookOutcome::Pass) => {}
                Ok(HookOutcome::Block { reason }) => {
                    result.blocked = true;
                    result.reason = Some(reason);
                    return result;
                }
                Ok(HookOutcome::Rewrite { input }) => {
                    ctx.tool_input = Some(input.clone());
                    result.modified_input = Some(input);
                }
                Err(err) => {
                    warn!(phase = ?ctx.phase, %err, "hook handler failed");
                    if ctx.phase != HookPhase::Error {
                        self.dispatch_error(ctx.phase, &err.to_string()).await;
                    }
                }
            }
        }
        result
    }

    /// Fire the `Error` phase for a captured handler failure. Errors
    /// raised by `Error` handlers themselves are logged only — the
    /// `Error` phase never re-enters itself.
    async fn dispatch_error(&self, failed_phase: HookPhase, message: &str) {
        let mut ctx = HookContext::new(HookPhase::Error);
        ctx.metadata.insert(
            "failed_phase".to_string(),
            serde_json::to_value(failed_phase).unwrap_or(serde_json::Value::Null),
        );
        ctx.metadata
            .insert("error".to_string(), serde_json::Value::String(message.to_string()));

        for handler in self.chain_for(HookPhase::Error) {
            if let Err(err) = handler.on_phase(&mut ctx).await {
                warn!(%err, "error-phase handler failed");
            }
        }
    }

    fn chain_for(&self, phase: HookPhase) -> Vec<Arc<dyn HookHandler>> {
        self.handlers
            .lock()
            .expect("hook registry poisoned")
            .iter()
            .filter(|entry| entry.phase == phase)
            .map(|entry| Arc::clone(&entry.handler))
            .collect()
    }

    /// Record a tool dispatch in the metrics. Called by the tool
    /// dispatcher only.
    pub fn record_tool_call(&self, tool: &str, duration: Duration, is_error: bool) {
        if !self.track_metrics {
            return;
        }
        self.metrics
            .lock()
            .expect("hook metrics poisoned")
            .record(tool, duration, is_error);
    }

    /// Copy-on-snapshot view of the per-tool aggregates.
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.lock().expect("hook metrics poisoned").snapshot()
    }

    /// Clear all handlers and release the metric buffers.
    pub fn destroy(&self) {
        self.handlers.lock().expect("hook registry poisoned").clear();
        self.metrics.lock().expect("hook metrics poisoned").clear();
    }
}
