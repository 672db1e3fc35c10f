//! Canonical shapes exchanged between peers and persisted by repositories.

mod entity;
mod object;
mod options;
mod statistics;

pub use entity::{SyncDependency, SyncEntity, SyncMeta, SyncModel};
pub use object::{IssueType, SyncIssue, SyncObject, SyncObjectStatus, SyncTombstone};
pub use options::{
    SyncBatch, SyncDirection, SyncOptions, SyncRepositoryFilter, SyncRequest, SyncSession,
    DEFAULT_ITEMS_PER_SYNC_REQUEST,
};
pub use statistics::{
    ApplyOutcome, SyncEngineState, SyncEngineStatus, SyncStatistics, TypeStatistics,
};
