//! Client-side reconciliation of entity snapshots into a local replica.
//!
//! Every sync channel delivers full snapshots, so reconciliation is a
//! plain overwrite keyed by id: the last snapshot received wins,
//! regardless of which channel carried it. Tombstoned snapshots stay in
//! the replica but disappear from the active view, which makes applying
//! the same delete through several channels naturally idempotent.

use std::collections::HashMap;

use boardsync_proto::entity::{Comment, Keyed, SoftDeletable, Task};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

/// Local replica of one entity collection.
pub struct ReconciledCollection<T> {
    entities: HashMap<Uuid, T>,
}

impl<T> Default for ReconciledCollection<T>
where
    T: Keyed + SoftDeletable + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReconciledCollection<T>
where
    T: Keyed + SoftDeletable + Clone,
{
    /// Creates an empty replica.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
        }
    }

    /// Applies one snapshot, overwriting any existing record with the
    /// same id.
    pub fn apply(&mut self, entity: T) {
        self.entities.insert(entity.id(), entity);
    }

    /// Applies a batch of snapshots.
    pub fn apply_batch(&mut self, entities: impl IntoIterator<Item = T>) {
        for entity in entities {
            self.apply(entity);
        }
    }

    /// Applies a raw JSON snapshot; malformed payloads are skipped.
    ///
    /// Returns whether the snapshot was applied.
    pub fn apply_value(&mut self, value: &serde_json::Value) -> bool
    where
        T: DeserializeOwned,
    {
        match serde_json::from_value::<T>(value.clone()) {
            Ok(entity) => {
                self.apply(entity);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed snapshot");
                false
            }
        }
    }

    /// Inserts a snapshot only when the id is unknown.
    ///
    /// This is the duplicate-create guard: a create observed through a
    /// push event and again through a poll must not clobber any fresher
    /// snapshot that arrived in between. Returns whether the snapshot
    /// was inserted.
    pub fn insert_if_absent(&mut self, entity: T) -> bool {
        match self.entities.entry(entity.id()) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(entity);
                true
            }
            std::collections::hash_map::Entry::Occupied(_) => false,
        }
    }

    /// Returns the snapshot with the given id, tombstoned or not.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&T> {
        self.entities.get(&id)
    }

    /// Live entities, newest change first.
    #[must_use]
    pub fn active(&self) -> Vec<T> {
        let mut live: Vec<T> = self
            .entities
            .values()
            .filter(|e| !e.is_deleted())
            .cloned()
            .collect();
        live.sort_by_key(|e| std::cmp::Reverse(e.latest_change()));
        live
    }

    /// Every snapshot, tombstones included, newest change first.
    #[must_use]
    pub fn with_deleted(&self) -> Vec<T> {
        let mut all: Vec<T> = self.entities.values().cloned().collect();
        all.sort_by_key(|e| std::cmp::Reverse(e.latest_change()));
        all
    }

    /// Number of live entities.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.entities.values().filter(|e| !e.is_deleted()).count()
    }

    /// Total record count, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the replica holds no records at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// A replica shared between sync channels and the view layer.
pub type SharedCollection<T> = Arc<Mutex<ReconciledCollection<T>>>;

/// Creates an empty shared replica.
#[must_use]
pub fn shared<T>() -> SharedCollection<T>
where
    T: Keyed + SoftDeletable + Clone,
{
    Arc::new(Mutex::new(ReconciledCollection::new()))
}

/// Shared task replica.
pub type TaskCollection = SharedCollection<Task>;

/// Shared comment replica.
pub type CommentCollection = SharedCollection<Comment>;
