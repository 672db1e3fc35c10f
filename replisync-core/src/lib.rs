//! Replisync Core Library
//!
//! Sync protocol, engine and scheduling shared by Replisync applications.

pub mod converter;
pub mod engine;
pub mod manager;
pub mod model;
pub mod models;
pub mod registry;
pub mod repository;
pub mod sync;

pub use converter::{Actor, Converter, Decision, ADMINISTRATOR_ROLE};
pub use engine::{SyncEngine, DEFAULT_CORRECTION_RETRIES};
pub use manager::{SyncManager, SyncManagerError, SyncResults, SyncStatus, SyncTimer};
pub use model::{
    ApplyOutcome, IssueType, SyncBatch, SyncDependency, SyncDirection, SyncEngineState,
    SyncEngineStatus, SyncEntity, SyncIssue, SyncMeta, SyncModel, SyncObject, SyncObjectStatus,
    SyncOptions, SyncRepositoryFilter, SyncRequest, SyncSession, SyncStatistics, SyncTombstone,
    TypeStatistics, DEFAULT_ITEMS_PER_SYNC_REQUEST,
};
pub use models::{Account, AccountConverter, AccountEntity, Address, AddressConverter, AddressEntity};
pub use registry::SyncRegistry;
pub use repository::{
    delete_permanently, delete_softly, ChangeQuery, EntityStore, MemoryRepository,
    RepositoryError, TombstoneStore,
};
pub use sync::{
    check_server, LocalSyncClient, SessionStore, SyncClient, SyncClientSettings, SyncError,
    WebSyncClient,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Registry of every synced type in this crate, parents first.
pub fn default_registry<R>() -> SyncRegistry<R>
where
    R: EntityStore<AccountEntity> + EntityStore<AddressEntity> + Send + Sync + 'static,
{
    SyncRegistry::new()
        .register::<AccountEntity, Account, _>(AccountConverter)
        .register::<AddressEntity, Address, _>(AddressConverter)
}
