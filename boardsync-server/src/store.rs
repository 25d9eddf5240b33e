//! In-memory entity stores with tombstone-based soft deletion.
//!
//! Deletion never removes a record; it stamps `deleted_at` so that sync
//! channels which missed the live event can still discover the removal
//! through a "changed since" query.

use boardsync_proto::entity::{Comment, Keyed, SoftDeletable, Task};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

/// Filter for a "changed since" query.
#[derive(Debug, Clone, Copy, Default)]
pub struct FindFilter {
    /// Only entities whose latest change is strictly after this instant.
    pub changed_since: Option<DateTime<Utc>>,
    /// Include tombstoned entities in the result.
    pub include_deleted: bool,
}

impl FindFilter {
    /// Filter that returns every live entity.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            changed_since: None,
            include_deleted: false,
        }
    }

    /// Filter for a poll catch-up: everything changed after `since`,
    /// tombstones included.
    #[must_use]
    pub const fn since(since: DateTime<Utc>) -> Self {
        Self {
            changed_since: Some(since),
            include_deleted: true,
        }
    }
}

/// Thread-safe in-memory store for one entity type.
pub struct EntityStore<T> {
    entities: RwLock<Vec<T>>,
}

impl<T> Default for EntityStore<T>
where
    T: Keyed + SoftDeletable + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EntityStore<T>
where
    T: Keyed + SoftDeletable + Clone,
{
    /// Creates an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entities: RwLock::new(Vec::new()),
        }
    }

    /// Inserts a new entity.
    pub fn create(&self, entity: T) -> T {
        let mut entities = self.entities.write();
        entities.push(entity.clone());
        entity
    }

    /// Returns the live entity with the given id, if any.
    ///
    /// Tombstoned entities are not found here; they only surface through
    /// [`Self::find_all`] with `include_deleted`.
    pub fn find_one(&self, id: Uuid) -> Option<T> {
        let entities = self.entities.read();
        entities
            .iter()
            .find(|e| e.id() == id && !e.is_deleted())
            .cloned()
    }

    /// Returns entities matching the filter, newest change first.
    pub fn find_all(&self, filter: FindFilter) -> Vec<T> {
        let entities = self.entities.read();
        let mut matched: Vec<T> = entities
            .iter()
            .filter(|e| filter.include_deleted || !e.is_deleted())
            .filter(|e| {
                filter
                    .changed_since
                    .is_none_or(|since| e.latest_change() > since)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|e| std::cmp::Reverse(e.latest_change()));
        matched
    }

    /// Applies a mutation to the live entity with the given id.
    ///
    /// The closure receives the entity with `updated_at` already refreshed
    /// to now; every successful update bumps the change cursor even when
    /// the closure changes nothing else. Returns `None` for unknown or
    /// tombstoned ids.
    pub fn update(&self, id: Uuid, mutate: impl FnOnce(&mut T)) -> Option<T>
    where
        T: Timestamped,
    {
        let mut entities = self.entities.write();
        let entity = entities.iter_mut().find(|e| e.id() == id && !e.is_deleted())?;
        entity.touch(Utc::now());
        mutate(entity);
        Some(entity.clone())
    }

    /// Tombstones the live entity with the given id.
    ///
    /// Stamps both `deleted_at` and `updated_at`. Returns `None` for
    /// unknown or already-tombstoned ids, making deletion idempotent from
    /// the caller's perspective.
    pub fn tombstone(&self, id: Uuid) -> Option<T>
    where
        T: Timestamped,
    {
        let mut entities = self.entities.write();
        let entity = entities.iter_mut().find(|e| e.id() == id && !e.is_deleted())?;
        let now = Utc::now();
        entity.touch(now);
        entity.bury(now);
        Some(entity.clone())
    }

    /// Replaces the store contents. Used for demo seeding and tests.
    pub fn seed(&self, entities: Vec<T>) {
        *self.entities.write() = entities;
    }

    /// Drops every record, tombstones included. Test utility.
    pub fn reset(&self) {
        self.entities.write().clear();
    }

    /// Total record count, tombstones included.
    pub fn count(&self) -> usize {
        self.entities.read().len()
    }
}

/// Entities whose change timestamps the store maintains.
pub trait Timestamped {
    /// Refreshes `updated_at`.
    fn touch(&mut self, now: DateTime<Utc>);

    /// Sets the tombstone timestamp.
    fn bury(&mut self, now: DateTime<Utc>);
}

impl Timestamped for Task {
    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn bury(&mut self, now: DateTime<Utc>) {
        self.deleted_at = Some(now);
    }
}

impl Timestamped for Comment {
    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn bury(&mut self, now: DateTime<Utc>) {
        self.deleted_at = Some(now);
    }
}

/// Store for board tasks.
pub type TaskStore = EntityStore<Task>;

/// Store for task comments.
pub type CommentStore = EntityStore<Comment>;

impl CommentStore {
    /// Returns live comments on the given task, newest change first.
    pub fn find_by_task(&self, task_id: Uuid) -> Vec<Comment> {
        let mut matched: Vec<Comment> = self
            .entities
            .read()
            .iter()
            .filter(|c| c.task_id == task_id && !c.is_deleted())
            .cloned()
            .collect();
        matched.sort_by_key(|c| std::cmp::Reverse(c.latest_change()));
        matched
    }
}
