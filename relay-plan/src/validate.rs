//! Pre-execution plan validation against the entity inventory.

use std::collections::{HashMap, HashSet};

use crate::error::{IssueCode, PlanError, ValidationIssue};
use crate::inventory::EntitySnapshot;
use crate::schema::StructuredPlan;

/// Supported schema version.
const SCHEMA_VERSION: u32 = 1;

/// Validate a plan against an inventory snapshot.
///
/// Returns the list of warnings (`TYPE_MISMATCH` findings) on success.
/// Validation is deterministic: re-running with the same inputs yields
/// the same result.
///
/// # Errors
///
/// - [`PlanError::SchemaInvalid`] for structural problems serde cannot
///   catch (unsupported version, empty ids, dangling dependencies).
/// - [`PlanError::ValidationFailed`] carrying every inventory finding:
///   missing references, missing update/delete targets, duplicate
///   temp-ids, and dependency cycles.
pub fn validate_plan(
    plan: &StructuredPlan,
    inventory: &EntitySnapshot,
) -> Result<Vec<ValidationIssue>, PlanError> {
    if plan.schema_version != SCHEMA_VERSION {
        return Err(PlanError::SchemaInvalid(format!(
            "unsupported schema version {} (expected {SCHEMA_VERSION})",
            plan.schema_version
        )));
    }
    if plan.id.is_empty() {
        return Err(PlanError::SchemaInvalid("plan id is empty".into()));
    }
    let task_ids: HashSet<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();
    if task_ids.len() != plan.tasks.len() {
        return Err(PlanError::SchemaInvalid("duplicate task id".into()));
    }
    for task in &plan.tasks {
        for dep in &task.depends_on {
            if !task_ids.contains(dep.as_str()) {
                return Err(PlanError::SchemaInvalid(format!(
                    "task {} depends on unknown task {dep}",
                    task.id
                )));
            }
        }
    }

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for reference in &plan.references {
        if !inventory.contains(&reference.entity_id) {
            errors.push(ValidationIssue::new(
                IssueCode::ReferenceNotFound,
                format!("reference {} not in inventory", reference.entity_id),
            ));
        } else if let Some(expected) = reference.expected_type.as_deref()
            && let Some(actual) = inventory.type_of(&reference.entity_id)
            && expected != actual
        {
            warnings.push(ValidationIssue::new(
                IssueCode::TypeMismatch,
                format!(
                    "reference {} expected type {expected}, inventory says {actual}",
                    reference.entity_id
                ),
            ));
        }
    }

    for update in &plan.changes.updates {
        if !inventory.contains(&update.target_id) {
            errors.push(ValidationIssue::new(
                IssueCode::UpdateTargetNotFound,
                format!("update target {} not in inventory", update.target_id),
            ));
        }
    }

    for delete in &plan.changes.deletes {
        if !inventory.contains(&delete.target_id) {
            errors.push(ValidationIssue::new(
                IssueCode::DeleteTargetNotFound,
                format!("delete target {} not in inventory", delete.target_id),
            ));
        }
    }

    let mut seen_temp_ids = HashSet::new();
    for create in &plan.changes.creates {
        if !seen_temp_ids.insert(create.temp_id.as_str()) {
            errors.push(ValidationIssue::new(
                IssueCode::DuplicateTempId,
                format!("temp-id {} declared twice", create.temp_id),
            ));
        }
    }

    if let Some(cycle_member) = find_cycle(plan) {
        errors.push(ValidationIssue::new(
            IssueCode::CircularDependency,
            format!("task {cycle_member} is part of a dependency cycle"),
        ));
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(PlanError::ValidationFailed(errors))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InStack,
    Done,
}

/// Iterative DFS with tri-color marking. Returns a task id inside a
/// cycle, if one exists.
fn find_cycle(plan: &StructuredPlan) -> Option<&str> {
    let index: HashMap<&str, usize> = plan
        .tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect();
    let mut marks = vec![Mark::Unvisited; plan.tasks.len()];

    for start in 0..plan.tasks.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        // Stack entries: (task index, next dependency position).
        let mut stack = vec![(start, 0usize)];
        marks[start] = Mark::InStack;

        while let Some(top) = stack.len().checked_sub(1) {
            let (task, next) = stack[top];
            let deps = &plan.tasks[task].depends_on;
            if next >= deps.len() {
                marks[task] = Mark::Done;
                stack.pop();
                continue;
            }
            stack[top].1 = next + 1;
            let dep_index = index[deps[next].as_str()];
            match marks[dep_index] {
                Mark::InStack => return Some(plan.tasks[dep_index].id.as_str()),
                Mark::Unvisited => {
                    marks[dep_index] = Mark::InStack;
                    stack.push((dep_index, 0));
                }
                Mark::Done => {}
            }
        }
    }
    None
}
