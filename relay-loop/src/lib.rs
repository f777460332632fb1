#![deny(missing_docs)]
//! The agentic loop: relay's iteration driver.
//!
//! [`AgentLoop`] drives an LLM through the think → act → observe cycle:
//! it appends the user message, asks the budget planner for a
//! request-ready view, streams the provider response, parses reasoning
//! tags and tool requests, routes tool calls through the hook-aware
//! dispatcher, and feeds results back until the model produces a final
//! answer — all while emitting [`relay_types::AgentEvent`]s on a
//! bounded channel the caller drains at its own pace.
//!
//! The event sequence is lazy, finite, non-restartable, and cancelable:
//! dropping the receiver takes the same path as cancellation.

pub mod checkpoint;
pub mod events;
pub mod loop_impl;
pub mod parse;

pub use checkpoint::CheckpointView;
pub use events::{EventSender, SinkClosed};
pub use loop_impl::{AgentLoop, AgentLoopBuilder, CLARIFY_TOOL};
pub use parse::parse_response;
