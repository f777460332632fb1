#![deny(missing_docs)]
//! Core types for the relay agentic runtime.
//!
//! Defines the message and tier data model shared by every relay crate,
//! the [`AgentEvent`] stream vocabulary, the [`Provider`] and
//! [`Summarizer`] contracts at the runtime's external boundary, the
//! [`TokenEstimator`] contract with its default character-count
//! implementation, and the error enums for each subsystem.
//!
//! Nothing in this crate performs I/O. Concrete providers, tool
//! back-ends, and summarizers live with the host; relay only speaks to
//! them through the traits defined here.

pub mod config;
pub mod error;
pub mod estimator;
pub mod event;
pub mod message;
pub mod provider;
pub mod summarizer;

pub use config::{BudgetConfig, HookConfig, LoopConfig, TierConfig};
pub use error::{
    ConfigError, ContextError, HookError, LoopError, OrchError, ProviderError, ToolError,
};
pub use estimator::{CharEstimator, TokenEstimator};
pub use event::{AgentEvent, FailureCause, Observation, ReasoningPhase, TurnMetrics};
pub use message::{
    CompressionMarker, MemoryTier, Message, MessageId, Priority, Role,
};
pub use provider::{
    Chunk, ChunkStream, FinishReason, GenerateRequest, Provider, ToolCallRequest, ToolSpec, Usage,
};
pub use summarizer::{Summarizer, TruncatingSummarizer};
