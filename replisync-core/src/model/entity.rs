//! Sync metadata shared by every replicated entity and its public shape.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bookkeeping fields carried by every synced entity.
///
/// `id` is the local, repository-specific key and is never trusted when it
/// arrives from a peer. `sync_id` is the global identity shared by all
/// replicas; it is assigned once and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncMeta {
    pub id: i64,
    pub sync_id: Uuid,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub is_deleted: bool,
}

impl SyncMeta {
    /// Metadata for a brand new local entity.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            sync_id: Uuid::new_v4(),
            created_on: now,
            modified_on: now,
            is_deleted: false,
        }
    }

    /// Marks the entity as changed at `now`.
    pub fn touch(&mut self) {
        self.modified_on = Utc::now();
    }
}

impl Default for SyncMeta {
    fn default() -> Self {
        Self {
            id: 0,
            sync_id: Uuid::nil(),
            created_on: DateTime::<Utc>::default(),
            modified_on: DateTime::<Utc>::default(),
            is_deleted: false,
        }
    }
}

/// Anything carrying [`SyncMeta`]: internal entities and their public DTOs.
pub trait SyncModel: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    fn meta(&self) -> &SyncMeta;
    fn meta_mut(&mut self) -> &mut SyncMeta;

    fn sync_id(&self) -> Uuid {
        self.meta().sync_id
    }
}

/// A reference from an entity to a parent it cannot exist without.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncDependency {
    pub type_name: &'static str,
    pub sync_id: Uuid,
}

impl SyncDependency {
    pub fn new(type_name: &'static str, sync_id: Uuid) -> Self {
        Self { type_name, sync_id }
    }
}

/// An internal entity stored in a repository and replicated between peers.
pub trait SyncEntity: SyncModel + Default + PartialEq {
    /// Wire discriminator used in [`SyncObject`](super::SyncObject) and tombstones.
    const TYPE_NAME: &'static str;

    /// Parent types this entity type references; they must sync first.
    const DEPENDS_ON: &'static [&'static str] = &[];

    /// Parents this particular instance references.
    fn dependencies(&self) -> Vec<SyncDependency> {
        Vec::new()
    }

    /// Business-rule validation run before an incoming change is persisted.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}
