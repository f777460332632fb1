//! The read-only entity inventory consumed by plan validation.

use std::collections::HashMap;

/// A point-in-time view of the entities the tool host knows about.
///
/// Taken once per plan validation; the engine never subscribes to
/// updates.
#[derive(Debug, Clone, Default)]
pub struct EntitySnapshot {
    entities: HashMap<String, Option<String>>,
}

impl EntitySnapshot {
    /// An empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity with an optional type tag.
    pub fn insert(&mut self, id: impl Into<String>, type_tag: Option<String>) {
        self.entities.insert(id.into(), type_tag);
    }

    /// Whether the entity exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// The entity's type tag, when it exists and has one.
    #[must_use]
    pub fn type_of(&self, id: &str) -> Option<&str> {
        self.entities.get(id).and_then(|t| t.as_deref())
    }

    /// Number of entities in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl<I: Into<String>> FromIterator<(I, Option<String>)> for EntitySnapshot {
    fn from_iter<T: IntoIterator<Item = (I, Option<String>)>>(iter: T) -> Self {
        Self {
            entities: iter.into_iter().map(|(id, tag)| (id.into(), tag)).collect(),
        }
    }
}

/// Supplies entity snapshots to the plan validator.
pub trait EntityInventory: Send + Sync {
    /// Take a fresh snapshot.
    fn snapshot(&self) -> EntitySnapshot;
}

impl EntityInventory for EntitySnapshot {
    fn snapshot(&self) -> EntitySnapshot {
        self.clone()
    }
}
