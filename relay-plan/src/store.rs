//! The session-keyed plan store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{PlanError, ValidationIssue};
use crate::inventory::EntitySnapshot;
use crate::schema::{StructuredPlan, TaskStatus, TaskUpdate};
use crate::tracker::ExecutionTracker;
use crate::validate::validate_plan;
use crate::walkthrough::{build_report, WalkthroughFilter, WalkthroughReport};

struct PlanSlot {
    plan: StructuredPlan,
    tracker: ExecutionTracker,
}

/// One plan per session, keyed by session identifier.
///
/// An explicit per-process map owned by the runtime — no globals.
/// Access to one session's plan is serialized through a per-session
/// async mutex; re-creating a session's plan replaces it.
#[derive(Default)]
pub struct PlanStore {
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<PlanSlot>>>>,
}

impl PlanStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, session_id: &str) -> Option<Arc<tokio::sync::Mutex<PlanSlot>>> {
        self.sessions
            .lock()
            .expect("plan store poisoned")
            .get(session_id)
            .cloned()
    }

    /// Validate and store a plan for a session, replacing any existing
    /// one. Returns validation warnings.
    ///
    /// # Errors
    ///
    /// Propagates [`PlanError::SchemaInvalid`] and
    /// [`PlanError::ValidationFailed`] from [`validate_plan`]; nothing
    /// is stored on failure.
    pub async fn create(
        &self,
        session_id: &str,
        plan: StructuredPlan,
        inventory: &EntitySnapshot,
    ) -> Result<Vec<ValidationIssue>, PlanError> {
        let warnings = validate_plan(&plan, inventory)?;
        debug!(session = session_id, plan = %plan.id, "storing plan");

        let tracker = ExecutionTracker::for_scope(&plan.changes);
        let slot = Arc::new(tokio::sync::Mutex::new(PlanSlot { plan, tracker }));
        self.sessions
            .lock()
            .expect("plan store poisoned")
            .insert(session_id.to_string(), slot);
        Ok(warnings)
    }

    /// Apply a batch of task updates atomically: if any sub-update
    /// fails validation, none is applied.
    ///
    /// # Errors
    ///
    /// - [`PlanError::NoPlan`] when the session has no plan.
    /// - [`PlanError::TaskIndexOutOfRange`] for a bad index.
    /// - [`PlanError::MultipleInProgress`] when the batch would leave
    ///   two tasks `in_progress` at any point.
    pub async fn update(
        &self,
        session_id: &str,
        updates: &[TaskUpdate],
    ) -> Result<(), PlanError> {
        let slot = self
            .slot(session_id)
            .ok_or_else(|| PlanError::NoPlan(session_id.to_string()))?;
        let mut guard = slot.lock().await;

        // Dry-run against a scratch copy of the statuses.
        let mut statuses: Vec<TaskStatus> = guard.plan.tasks.iter().map(|t| t.status).collect();
        for update in updates {
            if update.task_index >= statuses.len() {
                return Err(PlanError::TaskIndexOutOfRange {
                    index: update.task_index,
                    len: statuses.len(),
                });
            }
            if let Some(new_status) = update.status {
                if new_status == TaskStatus::InProgress
                    && let Some(existing) = statuses
                        .iter()
                        .position(|s| *s == TaskStatus::InProgress)
                    && existing != update.task_index
                {
                    return Err(PlanError::MultipleInProgress {
                        existing,
                        requested: update.task_index,
                        status: new_status,
                    });
                }
                statuses[update.task_index] = new_status;
            }
        }

        // Commit the whole batch.
        for update in updates {
            let task = &mut guard.plan.tasks[update.task_index];
            if let Some(status) = update.status {
                task.status = status;
            }
            if let Some(outcome) = &update.delegation_outcome {
                task.delegation_outcome = Some(outcome.clone());
            }
        }
        Ok(())
    }

    /// Produce the verification report for a session's plan.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::NoPlan`] when the session has no plan.
    pub async fn walkthrough(
        &self,
        session_id: &str,
        filter: Option<WalkthroughFilter>,
    ) -> Result<WalkthroughReport, PlanError> {
        let slot = self
            .slot(session_id)
            .ok_or_else(|| PlanError::NoPlan(session_id.to_string()))?;
        let guard = slot.lock().await;
        Ok(build_report(&guard.plan, &guard.tracker, filter))
    }

    /// Run `f` against the session's execution tracker. Used by the
    /// host while executing plan tasks.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::NoPlan`] when the session has no plan.
    pub async fn with_tracker<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut ExecutionTracker) -> R,
    ) -> Result<R, PlanError> {
        let slot = self
            .slot(session_id)
            .ok_or_else(|| PlanError::NoPlan(session_id.to_string()))?;
        let mut guard = slot.lock().await;
        Ok(f(&mut guard.tracker))
    }

    /// A copy of the session's plan, if one is stored.
    pub async fn snapshot(&self, session_id: &str) -> Option<StructuredPlan> {
        let slot = self.slot(session_id)?;
        let guard = slot.lock().await;
        Some(guard.plan.clone())
    }

    /// Drop a session's plan on teardown.
    pub fn remove(&self, session_id: &str) {
        self.sessions
            .lock()
            .expect("plan store poisoned")
            .remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ChangeScope, DelegationOutcome, Objective, PlanTask};

    fn task(id: &str) -> PlanTask {
        PlanTask {
            id: id.into(),
            content: format!("do {id}"),
            active_form: format!("doing {id}"),
            status: TaskStatus::Pending,
            creates: vec![],
            updates: vec![],
            depends_on: vec![],
            delegate_to: None,
            delegation_outcome: None,
        }
    }

    fn plan(tasks: Vec<PlanTask>) -> StructuredPlan {
        StructuredPlan {
            schema_version: 1,
            id: "plan-1".into(),
            objective: Objective { summary: "test".into(), details: None },
            references: vec![],
            tasks,
            changes: ChangeScope::default(),
        }
    }

    fn update(index: usize, status: TaskStatus) -> TaskUpdate {
        TaskUpdate { task_index: index, status: Some(status), delegation_outcome: None }
    }

    #[tokio::test]
    async fn create_stores_and_recreate_replaces() {
        let store = PlanStore::new();
        let inv = EntitySnapshot::new();
        store.create("s1", plan(vec![task("a")]), &inv).await.unwrap();

        let mut second = plan(vec![task("b")]);
        second.id = "plan-2".into();
        store.create("s1", second, &inv).await.unwrap();

        let snapshot = store.snapshot("s1").await.unwrap();
        assert_eq!(snapshot.id, "plan-2");
        assert_eq!(snapshot.tasks[0].id, "b");
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = PlanStore::new();
        let inv = EntitySnapshot::new();
        store.create("s1", plan(vec![task("a")]), &inv).await.unwrap();
        assert!(store.snapshot("s2").await.is_none());
        assert!(matches!(
            store.update("s2", &[]).await,
            Err(PlanError::NoPlan(_))
        ));
    }

    #[tokio::test]
    async fn out_of_range_index_applies_nothing() {
        let store = PlanStore::new();
        let inv = EntitySnapshot::new();
        store.create("s1", plan(vec![task("a"), task("b")]), &inv).await.unwrap();

        let err = store
            .update("s1", &[
                update(0, TaskStatus::Completed),
                update(9, TaskStatus::Completed),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::TaskIndexOutOfRange { index: 9, len: 2 }));

        let snapshot = store.snapshot("s1").await.unwrap();
        assert_eq!(snapshot.tasks[0].status, TaskStatus::Pending, "batch was atomic");
    }

    #[tokio::test]
    async fn second_in_progress_is_rejected() {
        let store = PlanStore::new();
        let inv = EntitySnapshot::new();
        store.create("s1", plan(vec![task("a"), task("b")]), &inv).await.unwrap();
        store.update("s1", &[update(0, TaskStatus::InProgress)]).await.unwrap();

        let err = store
            .update("s1", &[update(1, TaskStatus::InProgress)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlanError::MultipleInProgress { existing: 0, requested: 1, .. }
        ));
    }

    #[tokio::test]
    async fn handoff_within_one_batch_is_fine() {
        let store = PlanStore::new();
        let inv = EntitySnapshot::new();
        store.create("s1", plan(vec![task("a"), task("b")]), &inv).await.unwrap();
        store.update("s1", &[update(0, TaskStatus::InProgress)]).await.unwrap();

        // Finish a, start b — a single atomic batch.
        store
            .update("s1", &[
                update(0, TaskStatus::Completed),
                update(1, TaskStatus::InProgress),
            ])
            .await
            .unwrap();

        let snapshot = store.snapshot("s1").await.unwrap();
        assert_eq!(snapshot.tasks[0].status, TaskStatus::Completed);
        assert_eq!(snapshot.tasks[1].status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn re_marking_the_same_task_in_progress_is_idempotent() {
        let store = PlanStore::new();
        let inv = EntitySnapshot::new();
        store.create("s1", plan(vec![task("a")]), &inv).await.unwrap();
        store.update("s1", &[update(0, TaskStatus::InProgress)]).await.unwrap();
        store.update("s1", &[update(0, TaskStatus::InProgress)]).await.unwrap();
    }

    #[tokio::test]
    async fn delegation_outcome_lands_on_the_task() {
        let store = PlanStore::new();
        let inv = EntitySnapshot::new();
        let mut t = task("a");
        t.delegate_to = Some("writer".into());
        store.create("s1", plan(vec![t]), &inv).await.unwrap();

        store
            .update("s1", &[TaskUpdate {
                task_index: 0,
                status: Some(TaskStatus::Delegated),
                delegation_outcome: Some(DelegationOutcome {
                    success: true,
                    summary: Some("done".into()),
                    error: None,
                }),
            }])
            .await
            .unwrap();

        let snapshot = store.snapshot("s1").await.unwrap();
        let outcome = snapshot.tasks[0].delegation_outcome.as_ref().unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn remove_drops_the_session() {
        let store = PlanStore::new();
        let inv = EntitySnapshot::new();
        store.create("s1", plan(vec![task("a")]), &inv).await.unwrap();
        store.remove("s1");
        assert!(store.snapshot("s1").await.is_none());
    }
}
