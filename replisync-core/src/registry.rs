//! Compile-time registry of synced entity types.
//!
//! Each registered type contributes a descriptor bundling its wire name, its
//! parent types, and the typed decode/apply/query logic, so the protocol can
//! dispatch on a `type_name` string without any runtime reflection.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::converter::{Actor, Converter, Decision};
use crate::model::{
    ApplyOutcome, IssueType, SyncDependency, SyncEntity, SyncIssue, SyncMeta, SyncModel,
    SyncObject, SyncObjectStatus, SyncRepositoryFilter,
};
use crate::repository::{ChangeQuery, EntityStore, RepositoryError};
use crate::sync::SyncError;

/// Session-level inputs to applying an incoming change.
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext<'a> {
    pub actor: &'a Actor,
    pub permanent_deletions: bool,
}

/// Why an incoming change was not applied.
#[derive(Debug)]
pub enum ApplyFailure {
    /// The item is rejected; the rest of the batch continues.
    Issue(SyncIssue),
    /// The store itself failed; the operation aborts.
    Storage(RepositoryError),
}

/// Type-erased handling for one entity type over repository `R`.
#[async_trait]
pub trait EntityDescriptor<R>: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn depends_on(&self) -> &'static [&'static str];

    async fn count_changes(&self, repository: &R, query: &ChangeQuery<'_>) -> Result<usize, SyncError>;

    async fn get_changes(
        &self,
        repository: &R,
        query: &ChangeQuery<'_>,
    ) -> Result<Vec<SyncObject>, SyncError>;

    /// The current wire form of one entity plus the parents it references.
    async fn get_object(
        &self,
        repository: &R,
        sync_id: Uuid,
    ) -> Result<Option<(SyncObject, Vec<SyncDependency>)>, SyncError>;

    async fn apply(
        &self,
        repository: &R,
        object: &SyncObject,
        context: &ApplyContext<'_>,
    ) -> Result<ApplyOutcome, ApplyFailure>;
}

struct TypedDescriptor<T, P, C> {
    converter: C,
    _types: PhantomData<fn() -> (T, P)>,
}

impl<T, P, C> TypedDescriptor<T, P, C>
where
    T: SyncEntity,
    P: SyncModel,
    C: Converter<P, T>,
{
    fn to_object(&self, entity: &T) -> Result<SyncObject, SyncError> {
        let mut public = self.converter.to_public(entity);
        *public.meta_mut() = entity.meta().clone();
        Ok(SyncObject::new(T::TYPE_NAME, &public)?)
    }

    /// Decodes untrusted data after stripping the local id and excluded fields.
    fn decode(&self, object: &SyncObject) -> Result<P, serde_json::Error> {
        let mut value: serde_json::Value = serde_json::from_str(&object.data)?;
        if let Some(fields) = value.as_object_mut() {
            fields.remove("id");
            for excluded in self.converter.incoming_exclusions() {
                fields.remove(*excluded);
            }
        }
        serde_json::from_value(value)
    }

    fn issue(object: &SyncObject, issue_type: IssueType, message: impl Into<String>) -> ApplyFailure {
        ApplyFailure::Issue(SyncIssue::new(object, issue_type, message))
    }

    fn store_failure(object: &SyncObject, error: RepositoryError) -> ApplyFailure {
        match error {
            RepositoryError::RelationshipNotFound { .. } | RepositoryError::InUse(_) => {
                Self::issue(object, IssueType::RelationshipConstraint, error.to_string())
            }
            RepositoryError::Storage(_) => ApplyFailure::Storage(error),
            _ => Self::issue(object, IssueType::ValidationFailed, error.to_string()),
        }
    }

    async fn apply_delete<R: EntityStore<T>>(
        &self,
        repository: &R,
        object: &SyncObject,
        context: &ApplyContext<'_>,
    ) -> Result<ApplyOutcome, ApplyFailure> {
        let existing: Option<T> = repository
            .get_by_sync_id(object.sync_id)
            .await
            .map_err(|e| Self::store_failure(object, e))?;

        let Some(existing) = existing else {
            return Ok(ApplyOutcome::Skipped);
        };

        if self.converter.authorize(SyncObjectStatus::Deleted, context.actor) == Decision::Deny {
            tracing::debug!(
                "Delete of {} {} not authorised for {}, ignoring",
                T::TYPE_NAME,
                object.sync_id,
                context.actor.id
            );
            return Ok(ApplyOutcome::Skipped);
        }

        if context.permanent_deletions {
            repository
                .remove(&existing)
                .await
                .map_err(|e| Self::store_failure(object, e))?;
            return Ok(ApplyOutcome::Deleted);
        }

        if existing.meta().is_deleted {
            return Ok(ApplyOutcome::Skipped);
        }

        let incoming: SyncMeta = serde_json::from_str(&object.data).unwrap_or_default();
        let mut deleted = existing.clone();
        deleted.meta_mut().is_deleted = true;
        deleted.meta_mut().modified_on = incoming_timestamp(&incoming);

        repository
            .update(deleted)
            .await
            .map_err(|e| Self::store_failure(object, e))?;
        Ok(ApplyOutcome::Deleted)
    }

    async fn apply_upsert<R: EntityStore<T>>(
        &self,
        repository: &R,
        object: &SyncObject,
        context: &ApplyContext<'_>,
    ) -> Result<ApplyOutcome, ApplyFailure> {
        let public = self
            .decode(object)
            .map_err(|e| Self::issue(object, IssueType::ValidationFailed, e.to_string()))?;
        let incoming = public.meta().clone();

        let existing: Option<T> = if object.sync_id.is_nil() {
            None
        } else {
            repository
                .get_by_sync_id(object.sync_id)
                .await
                .map_err(|e| Self::store_failure(object, e))?
        };

        match existing {
            None => {
                if self.converter.authorize(SyncObjectStatus::Added, context.actor) == Decision::Deny {
                    return Err(Self::issue(
                        object,
                        IssueType::PermissionDenied,
                        format!("{} may not add {}", context.actor.id, T::TYPE_NAME),
                    ));
                }

                let mut entity = T::default();
                self.converter
                    .update_internal(&public, &mut entity, SyncObjectStatus::Added);

                let meta = entity.meta_mut();
                *meta = SyncMeta::default();
                meta.sync_id = if object.sync_id.is_nil() {
                    Uuid::new_v4()
                } else {
                    object.sync_id
                };
                meta.created_on = incoming_created(&incoming);
                meta.modified_on = if incoming.modified_on == SyncMeta::default().modified_on {
                    meta.created_on
                } else {
                    incoming.modified_on
                };
                meta.is_deleted = incoming.is_deleted;

                entity
                    .validate()
                    .map_err(|e| Self::issue(object, IssueType::ValidationFailed, e))?;
                repository
                    .add(entity)
                    .await
                    .map_err(|e| Self::store_failure(object, e))?;
                Ok(ApplyOutcome::Added)
            }
            Some(existing) => {
                if self.converter.authorize(SyncObjectStatus::Modified, context.actor)
                    == Decision::Deny
                {
                    return Err(Self::issue(
                        object,
                        IssueType::PermissionDenied,
                        format!("{} may not modify {}", context.actor.id, T::TYPE_NAME),
                    ));
                }

                let mut updated = existing.clone();
                self.converter
                    .update_internal(&public, &mut updated, SyncObjectStatus::Modified);
                // Identity and creation time are immutable once stored.
                *updated.meta_mut() = existing.meta().clone();
                updated.meta_mut().is_deleted = incoming.is_deleted;

                if updated == existing {
                    return Ok(ApplyOutcome::Skipped);
                }

                updated.meta_mut().modified_on = incoming_timestamp(&incoming);
                updated
                    .validate()
                    .map_err(|e| Self::issue(object, IssueType::ValidationFailed, e))?;
                repository
                    .update(updated)
                    .await
                    .map_err(|e| Self::store_failure(object, e))?;
                Ok(ApplyOutcome::Updated)
            }
        }
    }
}

fn incoming_created(meta: &SyncMeta) -> chrono::DateTime<Utc> {
    if meta.created_on == SyncMeta::default().created_on {
        Utc::now()
    } else {
        meta.created_on
    }
}

fn incoming_timestamp(meta: &SyncMeta) -> chrono::DateTime<Utc> {
    if meta.modified_on == SyncMeta::default().modified_on {
        Utc::now()
    } else {
        meta.modified_on
    }
}

#[async_trait]
impl<R, T, P, C> EntityDescriptor<R> for TypedDescriptor<T, P, C>
where
    R: EntityStore<T> + 'static,
    T: SyncEntity,
    P: SyncModel,
    C: Converter<P, T>,
{
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn depends_on(&self) -> &'static [&'static str] {
        T::DEPENDS_ON
    }

    async fn count_changes(&self, repository: &R, query: &ChangeQuery<'_>) -> Result<usize, SyncError> {
        Ok(EntityStore::<T>::count_changed(repository, query).await?)
    }

    async fn get_changes(
        &self,
        repository: &R,
        query: &ChangeQuery<'_>,
    ) -> Result<Vec<SyncObject>, SyncError> {
        let entities: Vec<T> = repository.query_changed(query).await?;
        entities.iter().map(|e| self.to_object(e)).collect()
    }

    async fn get_object(
        &self,
        repository: &R,
        sync_id: Uuid,
    ) -> Result<Option<(SyncObject, Vec<SyncDependency>)>, SyncError> {
        let entity: Option<T> = repository.get_by_sync_id(sync_id).await?;
        match entity {
            Some(entity) => Ok(Some((self.to_object(&entity)?, entity.dependencies()))),
            None => Ok(None),
        }
    }

    async fn apply(
        &self,
        repository: &R,
        object: &SyncObject,
        context: &ApplyContext<'_>,
    ) -> Result<ApplyOutcome, ApplyFailure> {
        match object.status {
            SyncObjectStatus::Deleted => self.apply_delete(repository, object, context).await,
            SyncObjectStatus::Added | SyncObjectStatus::Modified => {
                self.apply_upsert(repository, object, context).await
            }
        }
    }
}

/// Ordered set of synced types for repository `R`, parents first.
pub struct SyncRegistry<R> {
    descriptors: Vec<Arc<dyn EntityDescriptor<R>>>,
}

impl<R: Send + Sync + 'static> SyncRegistry<R> {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    /// Registers entity type `T` exchanged as `P` through `converter`.
    /// Re-registering a type replaces its descriptor in place.
    pub fn register<T, P, C>(mut self, converter: C) -> Self
    where
        R: EntityStore<T>,
        T: SyncEntity,
        P: SyncModel,
        C: Converter<P, T>,
    {
        let descriptor: Arc<dyn EntityDescriptor<R>> = Arc::new(TypedDescriptor::<T, P, C> {
            converter,
            _types: PhantomData,
        });
        match self
            .descriptors
            .iter()
            .position(|d| d.type_name() == T::TYPE_NAME)
        {
            Some(index) => self.descriptors[index] = descriptor,
            None => self.descriptors.push(descriptor),
        }
        self
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<dyn EntityDescriptor<R>>> {
        self.descriptors.iter().find(|d| d.type_name() == type_name)
    }

    pub fn type_names(&self) -> Vec<&'static str> {
        self.descriptors.iter().map(|d| d.type_name()).collect()
    }

    /// Validates a run's filters: every type must be registered and parents
    /// must come before their children. An empty list selects every
    /// registered type in registration order.
    pub fn resolve_filters(
        &self,
        filters: &[SyncRepositoryFilter],
    ) -> Result<Vec<SyncRepositoryFilter>, SyncError> {
        if filters.is_empty() {
            return Ok(self
                .descriptors
                .iter()
                .map(|d| SyncRepositoryFilter::new(d.type_name()))
                .collect());
        }

        for (index, filter) in filters.iter().enumerate() {
            let descriptor = self.get(&filter.type_name).ok_or_else(|| {
                SyncError::InvalidOptions(format!("unsupported type {}", filter.type_name))
            })?;

            if filters[..index].iter().any(|f| f.type_name == filter.type_name) {
                return Err(SyncError::InvalidOptions(format!(
                    "type {} listed twice",
                    filter.type_name
                )));
            }

            let later_parent = filters[index + 1..]
                .iter()
                .find(|f| descriptor.depends_on().contains(&f.type_name.as_str()));
            if let Some(parent) = later_parent {
                return Err(SyncError::InvalidOptions(format!(
                    "{} must be synced before {}",
                    parent.type_name, filter.type_name
                )));
            }
        }
        Ok(filters.to_vec())
    }
}

impl<R: Send + Sync + 'static> Default for SyncRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}
