//! Wire envelopes exchanged between peers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{SyncEntity, SyncMeta, SyncModel};

/// What happened to an entity since the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncObjectStatus {
    Added,
    Modified,
    Deleted,
}

impl SyncObjectStatus {
    /// Derives the status from an entity's metadata.
    pub fn from_meta(meta: &SyncMeta) -> Self {
        if meta.is_deleted {
            SyncObjectStatus::Deleted
        } else if meta.created_on == meta.modified_on {
            SyncObjectStatus::Added
        } else {
            SyncObjectStatus::Modified
        }
    }
}

impl std::fmt::Display for SyncObjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncObjectStatus::Added => write!(f, "added"),
            SyncObjectStatus::Modified => write!(f, "modified"),
            SyncObjectStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// One change on the wire. `data` is the serialized public DTO, never the
/// raw entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncObject {
    pub type_name: String,
    pub sync_id: Uuid,
    pub status: SyncObjectStatus,
    pub data: String,
}

impl SyncObject {
    /// Wraps a public DTO for the wire.
    pub fn new<P: SyncModel>(type_name: &str, public: &P) -> Result<Self, serde_json::Error> {
        Ok(Self {
            type_name: type_name.to_string(),
            sync_id: public.sync_id(),
            status: SyncObjectStatus::from_meta(public.meta()),
            data: serde_json::to_string(public)?,
        })
    }

    /// A delete notice built from a tombstone.
    pub fn from_tombstone(tombstone: &SyncTombstone) -> Self {
        let meta = SyncMeta {
            sync_id: tombstone.sync_id,
            created_on: tombstone.created_on,
            modified_on: tombstone.created_on,
            is_deleted: true,
            ..SyncMeta::default()
        };
        Self {
            type_name: tombstone.type_name.clone(),
            sync_id: tombstone.sync_id,
            status: SyncObjectStatus::Deleted,
            // SyncMeta always serializes.
            data: serde_json::to_string(&meta).unwrap_or_default(),
        }
    }
}

/// Record of a permanent deletion, kept so the peer can delete its copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTombstone {
    pub sync_id: Uuid,
    pub type_name: String,
    pub reference_id: String,
    pub created_on: DateTime<Utc>,
}

impl SyncTombstone {
    /// Tombstone for an entity that is being permanently removed.
    pub fn for_entity<T: SyncEntity>(entity: &T) -> Self {
        Self {
            sync_id: entity.sync_id(),
            type_name: T::TYPE_NAME.to_string(),
            reference_id: entity.meta().id.to_string(),
            created_on: Utc::now(),
        }
    }
}

/// Kinds of per-item failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueType {
    /// A parent the item references does not exist (yet) on this side.
    RelationshipConstraint,
    PermissionDenied,
    ValidationFailed,
    UnsupportedType,
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueType::RelationshipConstraint => write!(f, "relationship constraint"),
            IssueType::PermissionDenied => write!(f, "permission denied"),
            IssueType::ValidationFailed => write!(f, "validation failed"),
            IssueType::UnsupportedType => write!(f, "unsupported type"),
        }
    }
}

/// A single item that could not be applied. Collected, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncIssue {
    pub sync_id: Uuid,
    pub type_name: String,
    pub issue_type: IssueType,
    pub message: String,
}

impl SyncIssue {
    pub fn new(object: &SyncObject, issue_type: IssueType, message: impl Into<String>) -> Self {
        Self {
            sync_id: object.sync_id,
            type_name: object.type_name.clone(),
            issue_type,
            message: message.into(),
        }
    }

    pub fn is_relationship(&self) -> bool {
        self.issue_type == IssueType::RelationshipConstraint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_from_meta() {
        let mut meta = SyncMeta::new();
        assert_eq!(SyncObjectStatus::from_meta(&meta), SyncObjectStatus::Added);

        meta.modified_on = meta.created_on + Duration::seconds(5);
        assert_eq!(SyncObjectStatus::from_meta(&meta), SyncObjectStatus::Modified);

        meta.is_deleted = true;
        assert_eq!(SyncObjectStatus::from_meta(&meta), SyncObjectStatus::Deleted);
    }

    #[test]
    fn test_tombstone_object_is_deleted() {
        let tombstone = SyncTombstone {
            sync_id: Uuid::new_v4(),
            type_name: "replisync.Account".to_string(),
            reference_id: "42".to_string(),
            created_on: Utc::now(),
        };

        let object = SyncObject::from_tombstone(&tombstone);
        assert_eq!(object.status, SyncObjectStatus::Deleted);
        assert_eq!(object.sync_id, tombstone.sync_id);

        let meta: SyncMeta = serde_json::from_str(&object.data).unwrap();
        assert!(meta.is_deleted);
        assert_eq!(meta.sync_id, tombstone.sync_id);
    }

    #[test]
    fn test_sync_object_wire_names() {
        let object = SyncObject {
            type_name: "replisync.Address".to_string(),
            sync_id: Uuid::nil(),
            status: SyncObjectStatus::Modified,
            data: "{}".to_string(),
        };
        let json = serde_json::to_value(&object).unwrap();
        assert_eq!(json["typeName"], "replisync.Address");
        assert_eq!(json["status"], "Modified");
    }
}
