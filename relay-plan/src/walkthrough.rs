//! The walkthrough report: reality checked against the plan.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::schema::StructuredPlan;
use crate::tracker::ExecutionTracker;

/// What kind of plan entry a row verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    /// A declared create.
    Create,
    /// A declared update.
    Update,
    /// A declared delete.
    Delete,
    /// A delegated task.
    Delegation,
    /// A create recorded outside the plan.
    UnexpectedCreate,
    /// An update recorded outside the plan.
    UnexpectedUpdate,
    /// A delete recorded outside the plan.
    UnexpectedDelete,
}

/// Verification status of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    /// The tracker confirms the entry happened as declared.
    Verified,
    /// The tracker has no record of it.
    NotFound,
    /// The tracker recorded a failure, or the entry is out of scope.
    Error,
}

/// One line of the verification report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkthroughRow {
    /// What is being verified.
    pub kind: RowKind,
    /// The temp-id, entity id, or task id in question.
    pub subject: String,
    /// The verdict.
    pub status: RowStatus,
    /// The actual entity id, for verified creates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_id: Option<String>,
    /// Extra context (failure reasons, delegation summaries).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Restricts which declared entries a walkthrough reports on.
/// Unexpected rows and the overall verdict always cover everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WalkthroughFilter {
    /// Only create rows.
    Creates,
    /// Only update rows.
    Updates,
    /// Only delete rows.
    Deletes,
    /// Only delegation rows.
    Delegations,
}

/// The complete verification report for one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkthroughReport {
    /// One row per covered plan entry plus any unexpected changes.
    pub rows: Vec<WalkthroughRow>,
    /// `true` iff every row is verified and the tracker recorded
    /// nothing outside the declared scope.
    pub success: bool,
}

/// Build the report for a plan against its tracker.
#[must_use]
pub fn build_report(
    plan: &StructuredPlan,
    tracker: &ExecutionTracker,
    filter: Option<WalkthroughFilter>,
) -> WalkthroughReport {
    let mut rows = Vec::new();
    let mut all_verified = true;

    let include = |kind: WalkthroughFilter| filter.is_none() || filter == Some(kind);

    for create in &plan.changes.creates {
        let row = match (tracker.created_id(&create.temp_id), tracker.create_failure(&create.temp_id)) {
            (Some(actual), _) => WalkthroughRow {
                kind: RowKind::Create,
                subject: create.temp_id.clone(),
                status: RowStatus::Verified,
                actual_id: Some(actual.to_string()),
                detail: None,
            },
            (None, Some(reason)) => WalkthroughRow {
                kind: RowKind::Create,
                subject: create.temp_id.clone(),
                status: RowStatus::Error,
                actual_id: None,
                detail: Some(reason.to_string()),
            },
            (None, None) => WalkthroughRow {
                kind: RowKind::Create,
                subject: create.temp_id.clone(),
                status: RowStatus::NotFound,
                actual_id: None,
                detail: None,
            },
        };
        all_verified &= row.status == RowStatus::Verified;
        if include(WalkthroughFilter::Creates) {
            rows.push(row);
        }
    }

    for update in &plan.changes.updates {
        let status = if tracker.touched_update(&update.target_id) {
            RowStatus::Verified
        } else {
            RowStatus::NotFound
        };
        all_verified &= status == RowStatus::Verified;
        if include(WalkthroughFilter::Updates) {
            rows.push(WalkthroughRow {
                kind: RowKind::Update,
                subject: update.target_id.clone(),
                status,
                actual_id: None,
                detail: None,
            });
        }
    }

    for delete in &plan.changes.deletes {
        let status = if tracker.touched_delete(&delete.target_id) {
            RowStatus::Verified
        } else {
            RowStatus::NotFound
        };
        all_verified &= status == RowStatus::Verified;
        if include(WalkthroughFilter::Deletes) {
            rows.push(WalkthroughRow {
                kind: RowKind::Delete,
                subject: delete.target_id.clone(),
                status,
                actual_id: None,
                detail: None,
            });
        }
    }

    for task in plan.tasks.iter().filter(|t| t.delegate_to.is_some()) {
        let (status, detail) = match &task.delegation_outcome {
            Some(outcome) if outcome.success => {
                (RowStatus::Verified, outcome.summary.clone())
            }
            Some(outcome) => (RowStatus::Error, outcome.error.clone()),
            None => (RowStatus::NotFound, None),
        };
        all_verified &= status == RowStatus::Verified;
        if include(WalkthroughFilter::Delegations) {
            rows.push(WalkthroughRow {
                kind: RowKind::Delegation,
                subject: task.id.clone(),
                status,
                actual_id: None,
                detail,
            });
        }
    }

    let scope = tracker.validate();
    for (kind, subjects) in [
        (RowKind::UnexpectedCreate, &scope.unexpected_creates),
        (RowKind::UnexpectedUpdate, &scope.unexpected_updates),
        (RowKind::UnexpectedDelete, &scope.unexpected_deletes),
    ] {
        for subject in subjects {
            rows.push(WalkthroughRow {
                kind,
                subject: subject.clone(),
                status: RowStatus::Error,
                actual_id: None,
                detail: Some("not declared in the plan's change scope".to_string()),
            });
        }
    }

    WalkthroughReport {
        rows,
        success: all_verified && !scope.has_unexpected(),
    }
}
