//! Storage seam consumed by the sync layer.
//!
//! The sync layer never talks to a database directly. A repository exposes
//! one [`EntityStore`] per synced entity type plus a [`TombstoneStore`];
//! [`MemoryRepository`] is the in-process implementation used by tests and
//! embedders without a database.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{SyncEntity, SyncTombstone};

pub use memory::MemoryRepository;

/// Errors raised by repositories.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    /// A referenced parent entity does not exist.
    #[error("{type_name} {sync_id} referenced by this entity does not exist")]
    RelationshipNotFound { type_name: String, sync_id: Uuid },

    /// The entity is still referenced by other entities.
    #[error("entity {0} is still referenced by other entities")]
    InUse(Uuid),

    /// A uniqueness or check constraint rejected the write.
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("entity {0} not found")]
    NotFound(Uuid),

    /// The storage backend itself failed (I/O, connection, corruption).
    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    /// Whether the error describes the item rather than the store.
    pub fn is_item_error(&self) -> bool {
        !matches!(self, RepositoryError::Storage(_))
    }
}

/// A window of changes: `modified_on` in `[since, until)`, paged by skip/take.
#[derive(Debug, Clone, Copy)]
pub struct ChangeQuery<'a> {
    pub since: Option<DateTime<Utc>>,
    pub until: DateTime<Utc>,
    pub sync_ids: Option<&'a [Uuid]>,
    pub skip: usize,
    pub take: usize,
}

impl<'a> ChangeQuery<'a> {
    pub fn new(since: Option<DateTime<Utc>>, until: DateTime<Utc>) -> Self {
        Self {
            since,
            until,
            sync_ids: None,
            skip: 0,
            take: usize::MAX,
        }
    }

    pub fn page(mut self, skip: usize, take: usize) -> Self {
        self.skip = skip;
        self.take = take;
        self
    }

    pub fn restrict(mut self, sync_ids: Option<&'a [Uuid]>) -> Self {
        self.sync_ids = sync_ids;
        self
    }

    /// Whether an entity modified at `modified_on` falls in the window.
    pub fn contains(&self, modified_on: DateTime<Utc>, sync_id: Uuid) -> bool {
        let after_since = self.since.map(|s| modified_on >= s).unwrap_or(true);
        let matches_ids = self
            .sync_ids
            .map(|ids| ids.contains(&sync_id))
            .unwrap_or(true);
        after_since && modified_on < self.until && matches_ids
    }
}

/// Storage for one entity type.
#[async_trait]
pub trait EntityStore<T: SyncEntity>: Send + Sync {
    async fn get_by_sync_id(&self, sync_id: Uuid) -> Result<Option<T>, RepositoryError>;

    /// Inserts the entity, assigning its local id. Fails with
    /// `RelationshipNotFound` when a parent is missing.
    async fn add(&self, entity: T) -> Result<T, RepositoryError>;

    async fn update(&self, entity: T) -> Result<T, RepositoryError>;

    /// Physically removes the entity. Does not record a tombstone.
    async fn remove(&self, entity: &T) -> Result<(), RepositoryError>;

    async fn count_changed(&self, query: &ChangeQuery<'_>) -> Result<usize, RepositoryError>;

    /// Changed entities ordered by `modified_on`, then local id.
    async fn query_changed(&self, query: &ChangeQuery<'_>) -> Result<Vec<T>, RepositoryError>;
}

/// Storage for deletion markers.
#[async_trait]
pub trait TombstoneStore: Send + Sync {
    async fn record_tombstone(&self, tombstone: SyncTombstone) -> Result<(), RepositoryError>;

    async fn count_tombstones(
        &self,
        type_name: &str,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<usize, RepositoryError>;

    /// Tombstones of a type created in `[since, until)`, ordered by creation time.
    async fn query_tombstones(
        &self,
        type_name: &str,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
        skip: usize,
        take: usize,
    ) -> Result<Vec<SyncTombstone>, RepositoryError>;

    /// Drops tombstones created before `before`. Returns how many were dropped.
    async fn purge_tombstones(&self, before: DateTime<Utc>) -> Result<usize, RepositoryError>;
}

/// Permanently deletes a local entity and records its tombstone.
pub async fn delete_permanently<T, R>(repository: &R, entity: &T) -> Result<(), RepositoryError>
where
    T: SyncEntity,
    R: EntityStore<T> + TombstoneStore,
{
    EntityStore::<T>::remove(repository, entity).await?;
    repository
        .record_tombstone(SyncTombstone::for_entity(entity))
        .await
}

/// Soft-deletes a local entity so the deletion syncs as a change.
pub async fn delete_softly<T, R>(repository: &R, entity: &T) -> Result<T, RepositoryError>
where
    T: SyncEntity,
    R: EntityStore<T>,
{
    let mut deleted = entity.clone();
    deleted.meta_mut().is_deleted = true;
    deleted.meta_mut().touch();
    repository.update(deleted).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_change_query_window_is_half_open() {
        let now = Utc::now();
        let query = ChangeQuery::new(Some(now - Duration::seconds(10)), now);
        let id = Uuid::new_v4();

        assert!(query.contains(now - Duration::seconds(10), id));
        assert!(query.contains(now - Duration::seconds(1), id));
        assert!(!query.contains(now, id));
        assert!(!query.contains(now - Duration::seconds(11), id));
    }

    #[test]
    fn test_change_query_restricted_ids() {
        let now = Utc::now();
        let wanted = [Uuid::new_v4()];
        let query = ChangeQuery::new(None, now).restrict(Some(&wanted));

        assert!(query.contains(now - Duration::seconds(1), wanted[0]));
        assert!(!query.contains(now - Duration::seconds(1), Uuid::new_v4()));
    }

    #[test]
    fn test_item_errors() {
        assert!(RepositoryError::NotFound(Uuid::nil()).is_item_error());
        assert!(!RepositoryError::Storage("disk".into()).is_item_error());
    }
}
