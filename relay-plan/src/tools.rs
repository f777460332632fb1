//! The LLM-facing plan tools.
//!
//! Each tool is session-bound at construction: the model never supplies
//! a session identifier.

use std::sync::Arc;

use relay_tool::Tool;
use relay_types::ToolError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{PlanError, ValidationIssue};
use crate::inventory::EntityInventory;
use crate::schema::{StructuredPlan, TaskUpdate};
use crate::store::PlanStore;
use crate::walkthrough::{WalkthroughFilter, WalkthroughReport};

fn plan_error_to_tool(err: PlanError) -> ToolError {
    match err {
        PlanError::SchemaInvalid(msg) => ToolError::InvalidInput(msg),
        PlanError::ValidationFailed(issues) => ToolError::ExecutionFailed(
            serde_json::to_string(&issues)
                .unwrap_or_else(|_| "plan validation failed".to_string()),
        ),
        other => ToolError::ExecutionFailed(other.to_string()),
    }
}

/// Output of `plan_create`.
#[derive(Debug, Serialize)]
pub struct PlanCreated {
    /// The stored plan's identifier.
    pub plan_id: String,
    /// Non-fatal findings (type mismatches).
    pub warnings: Vec<ValidationIssue>,
}

/// `plan_create` — validate and store a full structured plan,
/// replacing the session's existing plan if any.
pub struct PlanCreateTool {
    store: Arc<PlanStore>,
    inventory: Arc<dyn EntityInventory>,
    session_id: String,
}

impl PlanCreateTool {
    /// Bind the tool to a store, an inventory, and a session.
    #[must_use]
    pub fn new(
        store: Arc<PlanStore>,
        inventory: Arc<dyn EntityInventory>,
        session_id: impl Into<String>,
    ) -> Self {
        Self { store, inventory, session_id: session_id.into() }
    }
}

impl Tool for PlanCreateTool {
    const NAME: &'static str = "plan_create";
    type Args = StructuredPlan;
    type Output = PlanCreated;

    fn description(&self) -> &str {
        "Commit to a structured plan: objective, references, ordered tasks, \
         and the exact set of creates, updates, and deletes you expect to make. \
         Replaces any existing plan for this session."
    }

    async fn call(&self, plan: StructuredPlan) -> Result<PlanCreated, ToolError> {
        let plan_id = plan.id.clone();
        let snapshot = self.inventory.snapshot();
        let warnings = self
            .store
            .create(&self.session_id, plan, &snapshot)
            .await
            .map_err(plan_error_to_tool)?;
        Ok(PlanCreated { plan_id, warnings })
    }
}

/// Input of `plan_update`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlanUpdateArgs {
    /// The batch of task updates. Applied atomically.
    pub updates: Vec<TaskUpdate>,
}

/// Output of `plan_update`.
#[derive(Debug, Serialize)]
pub struct PlanUpdated {
    /// How many sub-updates were applied.
    pub applied: usize,
}

/// `plan_update` — apply a batch of task status/delegation updates.
pub struct PlanUpdateTool {
    store: Arc<PlanStore>,
    session_id: String,
}

impl PlanUpdateTool {
    /// Bind the tool to a store and a session.
    #[must_use]
    pub fn new(store: Arc<PlanStore>, session_id: impl Into<String>) -> Self {
        Self { store, session_id: session_id.into() }
    }
}

impl Tool for PlanUpdateTool {
    const NAME: &'static str = "plan_update";
    type Args = PlanUpdateArgs;
    type Output = PlanUpdated;

    fn description(&self) -> &str {
        "Update task statuses in the current plan. The batch is atomic: \
         either every update applies or none does. At most one task may \
         be in_progress at a time."
    }

    async fn call(&self, args: PlanUpdateArgs) -> Result<PlanUpdated, ToolError> {
        self.store
            .update(&self.session_id, &args.updates)
            .await
            .map_err(plan_error_to_tool)?;
        Ok(PlanUpdated { applied: args.updates.len() })
    }
}

/// Input of `plan_walkthrough`.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct WalkthroughArgs {
    /// Restrict the report's rows to one kind of entry.
    #[serde(default)]
    pub filter: Option<WalkthroughFilter>,
}

/// `plan_walkthrough` — verify reality against the committed plan.
pub struct PlanWalkthroughTool {
    store: Arc<PlanStore>,
    session_id: String,
}

impl PlanWalkthroughTool {
    /// Bind the tool to a store and a session.
    #[must_use]
    pub fn new(store: Arc<PlanStore>, session_id: impl Into<String>) -> Self {
        Self { store, session_id: session_id.into() }
    }
}

impl Tool for PlanWalkthroughTool {
    const NAME: &'static str = "plan_walkthrough";
    type Args = WalkthroughArgs;
    type Output = WalkthroughReport;

    fn description(&self) -> &str {
        "Verify every entry of the current plan's change scope against \
         what actually happened, including anything done outside the plan."
    }

    async fn call(&self, args: WalkthroughArgs) -> Result<WalkthroughReport, ToolError> {
        self.store
            .walkthrough(&self.session_id, args.filter)
            .await
            .map_err(plan_error_to_tool)
    }
}
