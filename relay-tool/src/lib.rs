#![deny(missing_docs)]
//! Tool interface, registry, and dispatcher for relay.
//!
//! [`Tool`] is the typed trait hosts implement; [`ToolDyn`] is its
//! object-safe erasure stored in the [`ToolRegistry`]. The
//! [`Dispatcher`] resolves a name, validates input, brackets the
//! handler call with the `pre_tool_use`/`post_tool_use` hook phases,
//! and classifies failures.

pub mod dispatch;
pub mod registry;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use registry::{Tool, ToolDyn, ToolRegistry, TypedTool};
