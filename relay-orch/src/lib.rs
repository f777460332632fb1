#![deny(missing_docs)]
//! Sub-agent isolation for relay.
//!
//! A [`Contract`] is the minimal, value-passed specification handed to
//! a sub-agent: no pointer to the parent's context store ever crosses
//! the boundary. [`Delegator::delegate`] runs a two-phase procedure —
//! a tool-less reasoning call that may veto the work, then a fresh
//! [`relay_loop::AgentLoop`] with its own context store and a
//! dispatcher narrowed to the agent type's allow-list — and returns
//! only a result envelope. [`Delegator::delegate_many`] fans out N
//! contracts concurrently, each fully isolated.

pub mod contract;
pub mod delegate;

pub use contract::{Contract, ContractInputs, Envelope, OutputSpec, ResourceLimits};
pub use delegate::Delegator;
