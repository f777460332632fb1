#![deny(missing_docs)]
//! Structured-plan engine for relay.
//!
//! The model commits to a set of expected changes through
//! [`StructuredPlan`]: references it assumes exist, an ordered task
//! list, and a change scope of creates, updates, and deletes. The
//! engine validates the plan against an entity inventory, stores one
//! plan per session, tracks what actually happened through
//! [`ExecutionTracker`], and verifies reality against the commitment
//! with a walkthrough report.
//!
//! Three tools surface this to the LLM: `plan_create`, `plan_update`,
//! and `plan_walkthrough` (see [`tools`]).

pub mod error;
pub mod inventory;
pub mod schema;
pub mod store;
pub mod tools;
pub mod tracker;
pub mod validate;
pub mod walkthrough;

pub use error::{IssueCode, PlanError, ValidationIssue};
pub use inventory::{EntityInventory, EntitySnapshot};
pub use schema::{
    ChangeScope, DelegationOutcome, Objective, PlanReference, PlanTask, PlannedCreate,
    PlannedDelete, PlannedUpdate, StructuredPlan, TaskStatus, TaskUpdate,
};
pub use store::PlanStore;
pub use tools::{PlanCreateTool, PlanUpdateTool, PlanWalkthroughTool};
pub use tracker::{ExecutionTracker, ScopeValidation};
pub use validate::validate_plan;
pub use walkthrough::{
    build_report, RowKind, RowStatus, WalkthroughFilter, WalkthroughReport, WalkthroughRow,
};
