//! Progress events emitted by the agentic loop.

use serde::{Deserialize, Serialize};

/// Which reasoning tag a [`AgentEvent::Reasoning`] event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPhase {
    /// `<analyze>` block.
    Analyze,
    /// `<plan>` block.
    Plan,
    /// `<observe>` block.
    Observe,
    /// `<decide>` block.
    Decide,
    /// `<summarize>` block.
    Summarize,
}

/// The outcome attached to an [`AgentEvent::Observing`] event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observation {
    /// The tool ran and produced a result (possibly empty).
    Success {
        /// Structured tool output.
        output: serde_json::Value,
    },
    /// The dispatch failed or was blocked.
    Error {
        /// Stable error code (e.g. `unknown_tool`, `hook_blocked`).
        code: String,
        /// Human-readable description.
        message: String,
    },
}

/// Cumulative accounting for one turn, attached to [`AgentEvent::Complete`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMetrics {
    /// Prompt tokens across all iterations of the turn.
    pub prompt_tokens: usize,
    /// Completion tokens across all iterations of the turn.
    pub completion_tokens: usize,
    /// Number of tool dispatches (including blocked ones).
    pub tool_calls: usize,
    /// Number of LLM iterations the turn consumed.
    pub iterations: usize,
}

/// Why a turn ended with [`AgentEvent::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The context could not be fit after eviction.
    BudgetOverflow,
    /// The loop exhausted its iteration budget.
    MaxIterationsExceeded,
    /// The turn was cancelled through the cancellation token.
    Cancelled,
    /// The per-turn wall clock expired.
    Timeout,
    /// The provider failed after retries.
    Provider(String),
    /// Anything else that terminated the turn.
    Internal(String),
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::BudgetOverflow => write!(f, "budget overflow"),
            FailureCause::MaxIterationsExceeded => write!(f, "max iterations exceeded"),
            FailureCause::Cancelled => write!(f, "cancelled"),
            FailureCause::Timeout => write!(f, "timeout"),
            FailureCause::Provider(msg) => write!(f, "provider error: {msg}"),
            FailureCause::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

/// A progress event on the loop's lazy, finite, non-restartable sequence.
///
/// Per-turn ordering: `Thinking*`, `Reasoning*`, `(Acting, Observing)*`,
/// then exactly one of `Complete`, `Failed`, or `ClarificationNeeded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Liveness signal or a streamed text delta from the provider.
    Thinking {
        /// Delta text; empty for the turn-start liveness signal.
        content: String,
    },
    /// A parsed reasoning block from the model response.
    Reasoning {
        /// Which tag the block came from.
        phase: ReasoningPhase,
        /// Block text.
        content: String,
    },
    /// A tool dispatch is starting.
    Acting {
        /// Tool name.
        tool: String,
        /// Effective input (after any hook rewrite).
        input: serde_json::Value,
    },
    /// A tool dispatch finished (or was blocked).
    Observing {
        /// Tool name.
        tool: String,
        /// Result or error.
        outcome: Observation,
    },
    /// The model asked the user for clarification; the turn is over.
    ClarificationNeeded {
        /// The model's questions.
        questions: Vec<String>,
    },
    /// The turn finished with a final answer.
    Complete {
        /// The assistant's user-visible text.
        summary: String,
        /// Accumulated token and tool accounting.
        metrics: TurnMetrics,
    },
    /// The turn terminated abnormally.
    Failed {
        /// Why.
        cause: FailureCause,
    },
}

impl AgentEvent {
    /// Whether this event terminates the turn's sequence.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::Complete { .. }
                | AgentEvent::Failed { .. }
                | AgentEvent::ClarificationNeeded { .. }
        )
    }
}
