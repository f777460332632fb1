//! Error types for all relay crates.

use std::time::Duration;

/// Errors from configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A constraint of the configuration schema was violated.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from LLM provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    // Retryable errors
    /// Network-level error (connection reset, DNS failure, etc.).
    #[error("network error: {0}")]
    Network(String),
    /// Rate limited by the provider.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimit {
        /// Suggested retry delay, if provided by the API.
        retry_after: Option<Duration>,
    },
    /// Request timed out.
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    /// Provider service is temporarily unavailable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    // Terminal errors
    /// Authentication/authorization failure.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Malformed or invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The stream ended without a usable response.
    #[error("stream error: {0}")]
    Stream(String),
    /// Any other provider error.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ProviderError {
    /// Whether this error is likely transient and the call can be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::RateLimit { .. }
                | Self::Timeout(_)
                | Self::ServiceUnavailable(_)
        )
    }
}

/// Errors from context store and budget planner operations.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// A tool result referenced a correlation id no assistant message
    /// ever emitted.
    #[error("orphan tool result for call {0}")]
    OrphanToolResult(String),
    /// Eviction would violate the system-tier floor or remove a pinned
    /// recent turn.
    #[error("eviction protected: {0}")]
    EvictionProtected(String),
    /// The message id is not in the store.
    #[error("unknown message {0}")]
    UnknownMessage(String),
    /// The context cannot be fit into the envelope even after eviction.
    #[error("budget overflow: {needed} tokens needed, {available} available")]
    BudgetOverflow {
        /// Tokens the surviving messages still occupy.
        needed: usize,
        /// The request envelope.
        available: usize,
    },
    /// A request was prepared while a tool result was still pending.
    #[error("tool result pending for call {0}")]
    PendingToolResult(String),
    /// The system tier holds no message.
    #[error("context has no system message")]
    MissingSystemMessage,
    /// The summarization function failed.
    #[error("summarization failed: {0}")]
    SummarizationFailed(String),
}

/// Errors from tool dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Tool not found in the registry.
    #[error("tool not found: {0}")]
    NotFound(String),
    /// Input failed schema validation. Not retryable.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The handler raised a terminal error.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    /// Network or time-limited failure in the handler. Retryable.
    #[error("transient failure: {0}")]
    Transient(String),
    /// The dispatch was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    /// Whether the dispatcher may silently retry this call.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Stable code string surfaced on `observing` events.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "unknown_tool",
            Self::InvalidInput(_) => "invalid_input",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::Transient(_) => "transient",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Errors from hook handlers.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Handler execution failed. Captured by the pipeline, never blocks.
    #[error("hook failed: {0}")]
    Failed(String),
}

/// Errors from the agentic loop.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// Provider call failed after retries.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    /// Context management failed.
    #[error("context error: {0}")]
    Context(#[from] ContextError),
    /// The loop exhausted its iteration budget.
    #[error("max iterations exceeded ({0})")]
    MaxIterations(usize),
    /// The turn was cancelled.
    #[error("cancelled")]
    Cancelled,
    /// The per-turn wall clock expired.
    #[error("timeout")]
    Timeout,
    /// The event sink was dropped before the sequence finished.
    #[error("event sink closed")]
    SinkClosed,
}

/// Errors from sub-agent delegation.
#[derive(Debug, thiserror::Error)]
pub enum OrchError {
    /// No tool allow-list is registered for the contract's agent type.
    #[error("unknown agent type: {0}")]
    UnknownAgentType(String),
    /// The reasoning phase decided to block the contract.
    #[error("blocked by reasoning phase: {0}")]
    Blocked(String),
    /// The execution phase failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    /// The contract exceeded a resource limit.
    #[error("resource limit exceeded: {0}")]
    LimitExceeded(String),
    /// A spawned delegate panicked or was aborted.
    #[error("join failed: {0}")]
    JoinFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_retryability() {
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(ProviderError::RateLimit { retry_after: None }.is_retryable());
        assert!(!ProviderError::Authentication("bad key".into()).is_retryable());
        assert!(!ProviderError::InvalidRequest("no".into()).is_retryable());
    }

    #[test]
    fn tool_retryability() {
        assert!(ToolError::Transient("socket closed".into()).is_retryable());
        assert!(!ToolError::InvalidInput("missing field".into()).is_retryable());
        assert!(!ToolError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn tool_error_codes() {
        assert_eq!(ToolError::NotFound("x".into()).code(), "unknown_tool");
        assert_eq!(ToolError::InvalidInput("x".into()).code(), "invalid_input");
        assert_eq!(ToolError::Transient("x".into()).code(), "transient");
    }

    #[test]
    fn error_display() {
        assert_eq!(
            ContextError::OrphanToolResult("call-9".into()).to_string(),
            "orphan tool result for call call-9"
        );
        assert_eq!(LoopError::MaxIterations(10).to_string(), "max iterations exceeded (10)");
    }
}
