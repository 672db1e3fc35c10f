//! In-process repository keeping entities in type-keyed tables.

use std::any::Any;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ChangeQuery, EntityStore, RepositoryError, TombstoneStore};
use crate::model::{SyncDependency, SyncEntity, SyncTombstone};

struct Row {
    id: i64,
    sync_id: Uuid,
    modified_on: DateTime<Utc>,
    dependencies: Vec<SyncDependency>,
    entity: Box<dyn Any + Send + Sync>,
}

impl Row {
    fn new<T: SyncEntity>(entity: T) -> Self {
        Self {
            id: entity.meta().id,
            sync_id: entity.sync_id(),
            modified_on: entity.meta().modified_on,
            dependencies: entity.dependencies(),
            entity: Box::new(entity),
        }
    }

    fn get<T: SyncEntity>(&self) -> Option<T> {
        self.entity.downcast_ref::<T>().cloned()
    }
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    rows: HashMap<&'static str, Vec<Row>>,
    tombstones: Vec<SyncTombstone>,
}

impl Tables {
    fn exists(&self, dependency: &SyncDependency) -> bool {
        self.rows
            .get(dependency.type_name)
            .map(|rows| rows.iter().any(|r| r.sync_id == dependency.sync_id))
            .unwrap_or(false)
    }

    fn check_dependencies(&self, dependencies: &[SyncDependency]) -> Result<(), RepositoryError> {
        match dependencies.iter().find(|d| !self.exists(d)) {
            Some(missing) => Err(RepositoryError::RelationshipNotFound {
                type_name: missing.type_name.to_string(),
                sync_id: missing.sync_id,
            }),
            None => Ok(()),
        }
    }

    fn is_referenced(&self, type_name: &str, sync_id: Uuid) -> bool {
        self.rows.values().flatten().any(|row| {
            row.dependencies
                .iter()
                .any(|d| d.type_name == type_name && d.sync_id == sync_id)
        })
    }
}

/// Repository holding everything in memory.
///
/// With `maintain_modified_on` set the repository stamps `modified_on` on
/// every write, the way an authoritative server does.
pub struct MemoryRepository {
    tables: RwLock<Tables>,
    maintain_modified_on: bool,
}

impl MemoryRepository {
    /// A replica that keeps whatever `modified_on` it is given.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            maintain_modified_on: false,
        }
    }

    /// A replica that stamps `modified_on` itself.
    pub fn authoritative() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            maintain_modified_on: true,
        }
    }

    /// All stored entities of a type, in insertion order.
    pub async fn all<T: SyncEntity>(&self) -> Vec<T> {
        let tables = self.tables.read().await;
        tables
            .rows
            .get(T::TYPE_NAME)
            .map(|rows| rows.iter().filter_map(Row::get::<T>).collect())
            .unwrap_or_default()
    }

    pub async fn count<T: SyncEntity>(&self) -> usize {
        let tables = self.tables.read().await;
        tables.rows.get(T::TYPE_NAME).map(Vec::len).unwrap_or(0)
    }

    pub async fn tombstones(&self) -> Vec<SyncTombstone> {
        self.tables.read().await.tombstones.clone()
    }

    fn stamp<T: SyncEntity>(&self, entity: &mut T) {
        if self.maintain_modified_on {
            entity.meta_mut().modified_on = Utc::now();
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: SyncEntity> EntityStore<T> for MemoryRepository {
    async fn get_by_sync_id(&self, sync_id: Uuid) -> Result<Option<T>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .rows
            .get(T::TYPE_NAME)
            .and_then(|rows| rows.iter().find(|r| r.sync_id == sync_id))
            .and_then(Row::get::<T>))
    }

    async fn add(&self, mut entity: T) -> Result<T, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.check_dependencies(&entity.dependencies())?;

        let duplicate = tables
            .rows
            .get(T::TYPE_NAME)
            .map(|rows| rows.iter().any(|r| r.sync_id == entity.sync_id()))
            .unwrap_or(false);
        if duplicate {
            return Err(RepositoryError::Constraint(format!(
                "duplicate sync id {} for {}",
                entity.sync_id(),
                T::TYPE_NAME
            )));
        }

        tables.next_id += 1;
        entity.meta_mut().id = tables.next_id;
        self.stamp(&mut entity);

        tables
            .rows
            .entry(T::TYPE_NAME)
            .or_default()
            .push(Row::new(entity.clone()));
        Ok(entity)
    }

    async fn update(&self, mut entity: T) -> Result<T, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.check_dependencies(&entity.dependencies())?;
        self.stamp(&mut entity);

        let rows = tables
            .rows
            .get_mut(T::TYPE_NAME)
            .ok_or(RepositoryError::NotFound(entity.sync_id()))?;
        let row = rows
            .iter_mut()
            .find(|r| r.sync_id == entity.sync_id())
            .ok_or(RepositoryError::NotFound(entity.sync_id()))?;

        entity.meta_mut().id = row.id;
        *row = Row::new(entity.clone());
        Ok(entity)
    }

    async fn remove(&self, entity: &T) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.is_referenced(T::TYPE_NAME, entity.sync_id()) {
            return Err(RepositoryError::InUse(entity.sync_id()));
        }

        let rows = tables
            .rows
            .get_mut(T::TYPE_NAME)
            .ok_or(RepositoryError::NotFound(entity.sync_id()))?;
        let before = rows.len();
        rows.retain(|r| r.sync_id != entity.sync_id());
        if rows.len() == before {
            return Err(RepositoryError::NotFound(entity.sync_id()));
        }
        Ok(())
    }

    async fn count_changed(&self, query: &ChangeQuery<'_>) -> Result<usize, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .rows
            .get(T::TYPE_NAME)
            .map(|rows| {
                rows.iter()
                    .filter(|r| query.contains(r.modified_on, r.sync_id))
                    .count()
            })
            .unwrap_or(0))
    }

    async fn query_changed(&self, query: &ChangeQuery<'_>) -> Result<Vec<T>, RepositoryError> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.rows.get(T::TYPE_NAME) else {
            return Ok(Vec::new());
        };

        let mut changed: Vec<&Row> = rows
            .iter()
            .filter(|r| query.contains(r.modified_on, r.sync_id))
            .collect();
        changed.sort_by(|a, b| a.modified_on.cmp(&b.modified_on).then(a.id.cmp(&b.id)));

        Ok(changed
            .into_iter()
            .skip(query.skip)
            .take(query.take)
            .filter_map(Row::get::<T>)
            .collect())
    }
}

#[async_trait]
impl TombstoneStore for MemoryRepository {
    async fn record_tombstone(&self, tombstone: SyncTombstone) -> Result<(), RepositoryError> {
        self.tables.write().await.tombstones.push(tombstone);
        Ok(())
    }

    async fn count_tombstones(
        &self,
        type_name: &str,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tombstones
            .iter()
            .filter(|t| t.type_name == type_name && in_window(t.created_on, since, until))
            .count())
    }

    async fn query_tombstones(
        &self,
        type_name: &str,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
        skip: usize,
        take: usize,
    ) -> Result<Vec<SyncTombstone>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut tombstones: Vec<SyncTombstone> = tables
            .tombstones
            .iter()
            .filter(|t| t.type_name == type_name && in_window(t.created_on, since, until))
            .cloned()
            .collect();
        tombstones.sort_by(|a, b| a.created_on.cmp(&b.created_on));
        Ok(tombstones.into_iter().skip(skip).take(take).collect())
    }

    async fn purge_tombstones(&self, before: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut tables = self.tables.write().await;
        let count = tables.tombstones.len();
        tables.tombstones.retain(|t| t.created_on >= before);
        Ok(count - tables.tombstones.len())
    }
}

fn in_window(at: DateTime<Utc>, since: Option<DateTime<Utc>>, until: DateTime<Utc>) -> bool {
    since.map(|s| at >= s).unwrap_or(true) && at < until
}
