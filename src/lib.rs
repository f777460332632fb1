#![deny(missing_docs)]
//! # relay — an agentic orchestration runtime
//!
//! relay drives a large-language-model through the iterative
//! think → act → observe loop: each turn it assembles a token-budgeted
//! view of the conversation, streams the model's response, dispatches
//! requested tools through a hook pipeline, and feeds results back
//! until the model finishes, asks for clarification, or runs out of
//! budget — surfacing progress as a lazy, cancelable event sequence.
//!
//! The workspace splits along its protocol boundaries:
//!
//! | Crate | Responsibility |
//! |-------|----------------|
//! | [`types`] | Data model, provider/summarizer/estimator contracts, errors |
//! | [`context`] | Tiered context store and budget planner |
//! | [`hooks`] | Phased interception and tool metrics |
//! | [`tool`] | Tool registry and hook-aware dispatcher |
//! | [`plan`] | Structured-plan schema, validation, and verification |
//! | [`agent`] | The agentic loop and its event stream |
//! | [`orch`] | Sub-agent contracts and parallel delegation |
//!
//! This crate re-exports them under one roof for hosts that want a
//! single dependency.

pub use relay_context as context;
pub use relay_hooks as hooks;
pub use relay_loop as agent;
pub use relay_orch as orch;
pub use relay_plan as plan;
pub use relay_tool as tool;
pub use relay_types as types;
