//! Plan engine errors and validation issue codes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::schema::TaskStatus;

/// Stable codes for pre-execution validation findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    /// A reference names an entity the inventory does not contain.
    ReferenceNotFound,
    /// An update targets an entity the inventory does not contain.
    UpdateTargetNotFound,
    /// A delete targets an entity the inventory does not contain.
    DeleteTargetNotFound,
    /// Two creates share the same temp-id.
    DuplicateTempId,
    /// The task dependency graph has a cycle.
    CircularDependency,
    /// A reference's expected type disagrees with the inventory.
    /// A warning, never an error.
    TypeMismatch,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationIssue {
    /// The stable code.
    pub code: IssueCode,
    /// Human-readable description.
    pub message: String,
}

impl ValidationIssue {
    /// Build an issue.
    #[must_use]
    pub fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Errors from the plan engine.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The plan failed structural validation.
    #[error("plan schema invalid: {0}")]
    SchemaInvalid(String),
    /// Pre-execution validation against the entity inventory failed.
    #[error("plan validation failed with {} issue(s)", .0.len())]
    ValidationFailed(Vec<ValidationIssue>),
    /// No plan is stored for the session.
    #[error("no plan for session {0}")]
    NoPlan(String),
    /// A task update's index is out of range.
    #[error("task index {index} out of range (plan has {len} tasks)")]
    TaskIndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of tasks in the plan.
        len: usize,
    },
    /// A batch would leave two tasks `in_progress`.
    #[error("task {requested} cannot enter {status:?}: task {existing} is already in progress")]
    MultipleInProgress {
        /// Index of the task already in progress.
        existing: usize,
        /// Index of the task the update targeted.
        requested: usize,
        /// The requested status (always `InProgress`).
        status: TaskStatus,
    },
}
