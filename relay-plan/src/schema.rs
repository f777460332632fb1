//! The structured plan schema.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What the plan sets out to accomplish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Objective {
    /// One-line summary.
    pub summary: String,
    /// Optional elaboration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// A pre-existing entity the plan assumes exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanReference {
    /// The entity id.
    pub entity_id: String,
    /// Why the plan needs it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The type the plan expects the entity to have. A mismatch with
    /// the inventory is a warning, not an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_type: Option<String>,
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started.
    Pending,
    /// Currently being worked. At most one task per plan.
    InProgress,
    /// Done.
    Completed,
    /// Attempted and failed.
    Failed,
    /// Deliberately not done.
    Skipped,
    /// Handed to a sub-agent.
    Delegated,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

/// The recorded result of a delegated task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DelegationOutcome {
    /// Whether the delegate finished successfully.
    pub success: bool,
    /// The delegate's result summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// The delegate's error, when it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One task in the ordered plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanTask {
    /// Task identifier, unique within the plan.
    pub id: String,
    /// What to do, in imperative form.
    pub content: String,
    /// Present-continuous form for progress display.
    pub active_form: String,
    /// Lifecycle state.
    #[serde(default)]
    pub status: TaskStatus,
    /// Temp-ids of entities this task creates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub creates: Vec<String>,
    /// Entity ids this task updates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<String>,
    /// Ids of tasks that must complete first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// The agent type this task is delegated to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate_to: Option<String>,
    /// The delegation result, recorded via the update tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_outcome: Option<DelegationOutcome>,
}

/// A planned entity creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlannedCreate {
    /// Placeholder id the model uses until the entity exists.
    pub temp_id: String,
    /// Entity type tag.
    pub kind: String,
    /// What will be created.
    pub description: String,
    /// Temp-id of the parent entity, when nested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// A planned entity update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlannedUpdate {
    /// The entity to change. Must exist in the inventory.
    pub target_id: String,
    /// The partial change, free-form.
    #[serde(default)]
    pub changes: serde_json::Map<String, serde_json::Value>,
}

/// A planned entity deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlannedDelete {
    /// The entity to remove. Must exist in the inventory.
    pub target_id: String,
    /// Why it goes away.
    pub reason: String,
}

/// The declared set of creates, updates, and deletes a plan commits to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChangeScope {
    /// Entities the plan will create.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub creates: Vec<PlannedCreate>,
    /// Entities the plan will update.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<PlannedUpdate>,
    /// Entities the plan will delete.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deletes: Vec<PlannedDelete>,
}

/// A full structured plan, as submitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StructuredPlan {
    /// Schema version; currently 1.
    pub schema_version: u32,
    /// Plan identifier.
    pub id: String,
    /// What the plan accomplishes.
    pub objective: Objective,
    /// Pre-existing entities the plan assumes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<PlanReference>,
    /// Ordered task list.
    pub tasks: Vec<PlanTask>,
    /// The declared change scope.
    #[serde(default)]
    pub changes: ChangeScope,
}

/// One sub-update in a `plan_update` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskUpdate {
    /// Index into the plan's task list.
    pub task_index: usize,
    /// New status, if changing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// Delegation result, if recording one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_outcome: Option<DelegationOutcome>,
}
