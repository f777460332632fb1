//! The hook-aware tool dispatcher.

use std::sync::Arc;
use std::time::Duration;

use relay_hooks::{HookContext, HookPhase, HookPipeline};
use relay_types::{Observation, ToolError};
use tokio::time::Instant;
use tracing::debug;

use crate::registry::ToolRegistry;

/// What one dispatch produced.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The handler ran and returned a result (possibly empty).
    Success {
        /// Structured tool output.
        output: serde_json::Value,
        /// The input the handler actually saw (after hook rewrites).
        effective_input: serde_json::Value,
        /// Handler wall time.
        duration: Duration,
    },
    /// A `pre_tool_use` handler vetoed the call; the handler never ran.
    Blocked {
        /// The veto reason.
        reason: String,
    },
    /// Lookup, validation, or the handler itself failed.
    Failed {
        /// The classified error.
        error: ToolError,
        /// The input in play when the failure happened.
        effective_input: serde_json::Value,
        /// Handler wall time; zero when the handler never ran.
        duration: Duration,
    },
}

impl DispatchOutcome {
    /// Whether the dispatched call may be silently retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchOutcome::Failed { error, .. } if error.is_retryable())
    }

    /// Render this outcome as the observation carried on an
    /// `observing` event.
    #[must_use]
    pub fn observation(&self) -> Observation {
        match self {
            DispatchOutcome::Success { output, .. } => {
                Observation::Success { output: output.clone() }
            }
            DispatchOutcome::Blocked { reason } => Observation::Error {
                code: "hook_blocked".to_string(),
                message: reason.clone(),
            },
            DispatchOutcome::Failed { error, .. } => Observation::Error {
                code: error.code().to_string(),
                message: error.to_string(),
            },
        }
    }
}

/// Resolves tool names, validates input, and invokes handlers through
/// the hooks pipeline.
pub struct Dispatcher {
    registry: ToolRegistry,
    hooks: Arc<HookPipeline>,
}

impl Dispatcher {
    /// Create a dispatcher over a registry and the session's hook
    /// pipeline.
    #[must_use]
    pub fn new(registry: ToolRegistry, hooks: Arc<HookPipeline>) -> Self {
        Self { registry, hooks }
    }

    /// The registry behind this dispatcher.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// The hook pipeline behind this dispatcher.
    #[must_use]
    pub fn hooks(&self) -> &Arc<HookPipeline> {
        &self.hooks
    }

    /// Dispatch one tool call.
    ///
    /// Lookup → schema validation → `pre_tool_use` (may block or
    /// rewrite) → handler, timed → `post_tool_use` → classification.
    /// Never panics and never returns early without recording metrics.
    pub async fn dispatch(&self, tool_name: &str, input: serde_json::Value) -> DispatchOutcome {
        let Some(tool) = self.registry.get(tool_name) else {
            self.hooks.record_tool_call(tool_name, Duration::ZERO, true);
            return DispatchOutcome::Failed {
                error: ToolError::NotFound(tool_name.to_string()),
                effective_input: input,
                duration: Duration::ZERO,
            };
        };
        let tool = Arc::clone(tool);

        if let Err(error) = tool.validate(&input) {
            self.hooks.record_tool_call(tool_name, Duration::ZERO, true);
            return DispatchOutcome::Failed {
                error,
                effective_input: input,
                duration: Duration::ZERO,
            };
        }

        let phase_enabled = |phase: HookPhase| {
            tool.hook_phases().is_none_or(|phases| phases.contains(&phase))
        };

        // pre_tool_use: may veto the call or rewrite its input.
        let mut effective_input = input;
        if phase_enabled(HookPhase::PreToolUse) {
            let mut ctx = HookContext::new(HookPhase::PreToolUse)
                .with_tool(tool_name)
                .with_input(effective_input.clone());
            let result = self.hooks.trigger(&mut ctx).await;
            if result.blocked {
                let reason = result.reason.unwrap_or_else(|| "blocked".to_string());
                debug!(tool = tool_name, %reason, "dispatch blocked by hook");
                self.hooks.record_tool_call(tool_name, Duration::ZERO, true);
                return DispatchOutcome::Blocked { reason };
            }
            if let Some(modified) = result.modified_input {
                effective_input = modified;
            }
        }

        let started = Instant::now();
        let call_result = tool.call(effective_input.clone()).await;
        let duration = started.elapsed();

        self.hooks
            .record_tool_call(tool_name, duration, call_result.is_err());

        if phase_enabled(HookPhase::PostToolUse) {
            let result_value = match &call_result {
                Ok(output) => output.clone(),
                Err(error) => serde_json::json!({ "error": error.to_string() }),
            };
            let mut ctx = HookContext::new(HookPhase::PostToolUse)
                .with_tool(tool_name)
                .with_input(effective_input.clone())
                .with_result(result_value)
                .with_duration(duration);
            self.hooks.trigger(&mut ctx).await;
        }

        match call_result {
            Ok(output) => DispatchOutcome::Success { output, effective_input, duration },
            Err(error) => {
                // Classified handler failure also fires the error phase.
                let mut ctx = HookContext::new(HookPhase::Error)
                    .with_tool(tool_name)
                    .with_input(effective_input.clone())
                    .with_result(serde_json::json!({
                        "code": error.code(),
                        "message": error.to_string(),
                    }));
                self.hooks.trigger(&mut ctx).await;
                DispatchOutcome::Failed { error, effective_input, duration }
            }
        }
    }
}
