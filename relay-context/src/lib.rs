#![deny(missing_docs)]
//! Tiered, token-budgeted conversation storage for relay.
//!
//! [`ContextStore`] is an ordered append-only log of messages tagged
//! with role, tier, priority, and token cost. [`BudgetPlanner`] decides
//! which messages go into the next LLM request, summarizing and
//! evicting under pressure until the conversation fits the request
//! envelope.

pub mod planner;
pub mod store;

pub use planner::{BudgetPlanner, PreparedView};
pub use store::ContextStore;
