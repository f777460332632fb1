//! Runtime bookkeeping of actual changes against the declared scope.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::schema::ChangeScope;

/// Compares what actually happened during execution to the change
/// scope the plan committed to.
///
/// Not a tool — the host records into this while executing plan tasks,
/// then the walkthrough reads it back.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionTracker {
    planned_creates: BTreeSet<String>,
    planned_updates: BTreeSet<String>,
    planned_deletes: BTreeSet<String>,
    /// temp-id → actual entity id, filled as creates land.
    mapping: BTreeMap<String, String>,
    /// temp-id → failure reason, for creates that were attempted and
    /// did not land.
    failed_creates: BTreeMap<String, String>,
    updated: BTreeSet<String>,
    deleted: BTreeSet<String>,
    unexpected_creates: BTreeSet<String>,
    unexpected_updates: BTreeSet<String>,
    unexpected_deletes: BTreeSet<String>,
}

/// The scope-validation record: what happened outside the plan, and
/// what the plan promised but never happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScopeValidation {
    /// Creates recorded with temp-ids the plan never declared.
    pub unexpected_creates: Vec<String>,
    /// Updates recorded on targets the plan never declared.
    pub unexpected_updates: Vec<String>,
    /// Deletes recorded on targets the plan never declared.
    pub unexpected_deletes: Vec<String>,
    /// Declared creates that were never recorded.
    pub missing_creates: Vec<String>,
    /// Declared updates that were never recorded.
    pub missing_updates: Vec<String>,
    /// Declared deletes that were never recorded.
    pub missing_deletes: Vec<String>,
}

impl ScopeValidation {
    /// Whether execution exactly matched the declared scope.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unexpected_creates.is_empty()
            && self.unexpected_updates.is_empty()
            && self.unexpected_deletes.is_empty()
            && self.missing_creates.is_empty()
            && self.missing_updates.is_empty()
            && self.missing_deletes.is_empty()
    }

    /// Whether anything happened outside the declared scope.
    #[must_use]
    pub fn has_unexpected(&self) -> bool {
        !(self.unexpected_creates.is_empty()
            && self.unexpected_updates.is_empty()
            && self.unexpected_deletes.is_empty())
    }
}

impl ExecutionTracker {
    /// A tracker primed with the plan's declared change scope.
    #[must_use]
    pub fn for_scope(scope: &ChangeScope) -> Self {
        Self {
            planned_creates: scope.creates.iter().map(|c| c.temp_id.clone()).collect(),
            planned_updates: scope.updates.iter().map(|u| u.target_id.clone()).collect(),
            planned_deletes: scope.deletes.iter().map(|d| d.target_id.clone()).collect(),
            ..Self::default()
        }
    }

    /// Record that a create landed, mapping its temp-id to the actual
    /// entity id. A temp-id outside the plan is also counted as an
    /// unexpected create.
    pub fn record_create(&mut self, temp_id: impl Into<String>, actual_id: impl Into<String>) {
        let temp_id = temp_id.into();
        if !self.planned_creates.contains(&temp_id) {
            self.unexpected_creates.insert(temp_id.clone());
        }
        self.mapping.insert(temp_id, actual_id.into());
    }

    /// Record that a declared create was attempted and failed.
    pub fn record_create_failure(&mut self, temp_id: impl Into<String>, reason: impl Into<String>) {
        self.failed_creates.insert(temp_id.into(), reason.into());
    }

    /// Record that an entity was updated.
    pub fn record_update(&mut self, target_id: impl Into<String>) {
        let target_id = target_id.into();
        if !self.planned_updates.contains(&target_id) {
            self.unexpected_updates.insert(target_id.clone());
        }
        self.updated.insert(target_id);
    }

    /// Record that an entity was deleted.
    pub fn record_delete(&mut self, target_id: impl Into<String>) {
        let target_id = target_id.into();
        if !self.planned_deletes.contains(&target_id) {
            self.unexpected_deletes.insert(target_id.clone());
        }
        self.deleted.insert(target_id);
    }

    /// The actual id for a temp-id, or the input unchanged when no
    /// mapping exists (so the model may mention ids that were never in
    /// the plan).
    #[must_use]
    pub fn resolve<'a>(&'a self, temp_id: &'a str) -> &'a str {
        self.mapping.get(temp_id).map_or(temp_id, String::as_str)
    }

    /// The mapped actual id for a declared create, if it landed.
    #[must_use]
    pub fn created_id(&self, temp_id: &str) -> Option<&str> {
        self.mapping.get(temp_id).map(String::as_str)
    }

    /// The recorded failure for a declared create, if any.
    #[must_use]
    pub fn create_failure(&self, temp_id: &str) -> Option<&str> {
        self.failed_creates.get(temp_id).map(String::as_str)
    }

    /// Whether an update on this target was recorded.
    #[must_use]
    pub fn touched_update(&self, target_id: &str) -> bool {
        self.updated.contains(target_id)
    }

    /// Whether a delete on this target was recorded.
    #[must_use]
    pub fn touched_delete(&self, target_id: &str) -> bool {
        self.deleted.contains(target_id)
    }

    /// Compare recorded changes to the declared scope.
    #[must_use]
    pub fn validate(&self) -> ScopeValidation {
        ScopeValidation {
            unexpected_creates: self.unexpected_creates.iter().cloned().collect(),
            unexpected_updates: self.unexpected_updates.iter().cloned().collect(),
            unexpected_deletes: self.unexpected_deletes.iter().cloned().collect(),
            missing_creates: self
                .planned_creates
                .iter()
                .filter(|t| !self.mapping.contains_key(*t))
                .cloned()
                .collect(),
            missing_updates: self
                .planned_updates
                .iter()
                .filter(|t| !self.updated.contains(*t))
                .cloned()
                .collect(),
            missing_deletes: self
                .planned_deletes
                .iter()
                .filter(|t| !self.deleted.contains(*t))
                .cloned()
                .collect(),
        }
    }
}
