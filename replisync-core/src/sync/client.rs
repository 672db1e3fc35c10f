//! Protocol participants.
//!
//! A [`SyncClient`] is one side of a sync run. [`LocalSyncClient`] serves the
//! protocol from a repository in this process; the server hosts one per
//! authenticated actor and the engine can drive two of them directly.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::error::SyncError;
use super::protocol::{check_version, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};
use super::session::{SessionKey, SessionState, SessionStore};
use crate::converter::Actor;
use crate::model::{
    IssueType, SyncBatch, SyncIssue, SyncObject, SyncOptions, SyncRepositoryFilter, SyncRequest,
    SyncSession, SyncStatistics, SyncTombstone, DEFAULT_ITEMS_PER_SYNC_REQUEST,
};
use crate::registry::{ApplyContext, ApplyFailure, EntityDescriptor, SyncRegistry};
use crate::repository::{ChangeQuery, TombstoneStore};

/// The protocol operations every sync participant exposes.
#[async_trait]
pub trait SyncClient: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn begin_sync(&self, session_id: Uuid, options: SyncOptions) -> Result<SyncSession, SyncError>;

    async fn get_changes(&self, session_id: Uuid, request: SyncRequest) -> Result<SyncBatch, SyncError>;

    async fn apply_changes(
        &self,
        session_id: Uuid,
        objects: Vec<SyncObject>,
    ) -> Result<Vec<SyncIssue>, SyncError>;

    async fn get_corrections(
        &self,
        session_id: Uuid,
        issues: Vec<SyncIssue>,
    ) -> Result<Vec<SyncObject>, SyncError>;

    async fn apply_corrections(
        &self,
        session_id: Uuid,
        objects: Vec<SyncObject>,
    ) -> Result<Vec<SyncIssue>, SyncError>;

    async fn end_sync(&self, session_id: Uuid) -> Result<SyncStatistics, SyncError>;
}

/// How a local participant treats the options it is given.
#[derive(Debug, Clone, Copy)]
pub struct SyncClientSettings {
    /// Authoritative sides refuse client-requested permanent deletions.
    pub authoritative: bool,
    pub max_items_per_sync_request: usize,
    pub min_protocol_version: u32,
    pub max_protocol_version: u32,
}

impl SyncClientSettings {
    pub fn replica() -> Self {
        Self {
            authoritative: false,
            ..Self::default()
        }
    }

    pub fn authoritative() -> Self {
        Self {
            authoritative: true,
            ..Self::default()
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items_per_sync_request = max_items.max(1);
        self
    }
}

impl Default for SyncClientSettings {
    fn default() -> Self {
        Self {
            authoritative: false,
            max_items_per_sync_request: DEFAULT_ITEMS_PER_SYNC_REQUEST,
            min_protocol_version: MIN_PROTOCOL_VERSION,
            max_protocol_version: PROTOCOL_VERSION,
        }
    }
}

/// Where one stretch of a change window comes from.
enum Segment<'a> {
    Entities(&'a SyncRepositoryFilter),
    Tombstones(&'a SyncRepositoryFilter),
}

enum CorrectionStep {
    Visit(String, Uuid),
    Emit(SyncObject),
}

/// Serves the protocol from a repository in this process.
pub struct LocalSyncClient<R> {
    name: String,
    repository: Arc<R>,
    registry: Arc<SyncRegistry<R>>,
    sessions: Arc<SessionStore>,
    settings: SyncClientSettings,
    actor: Actor,
}

impl<R> LocalSyncClient<R>
where
    R: TombstoneStore + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        repository: Arc<R>,
        registry: Arc<SyncRegistry<R>>,
        settings: SyncClientSettings,
        actor: Actor,
    ) -> Self {
        Self {
            name: name.into(),
            repository,
            registry,
            sessions: Arc::new(SessionStore::new()),
            settings,
            actor,
        }
    }

    /// Shares an existing session store, e.g. one owned by a server.
    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    /// A participant over the same repository and sessions acting for `actor`.
    pub fn for_actor(&self, actor: Actor) -> Self {
        Self {
            name: self.name.clone(),
            repository: Arc::clone(&self.repository),
            registry: Arc::clone(&self.registry),
            sessions: Arc::clone(&self.sessions),
            settings: self.settings,
            actor,
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    fn key(&self, session_id: Uuid) -> SessionKey {
        SessionKey::new(self.actor.id.clone(), session_id)
    }

    async fn count_segment(
        &self,
        segment: &Segment<'_>,
        request: &SyncRequest,
    ) -> Result<usize, SyncError> {
        match segment {
            Segment::Entities(filter) => {
                let descriptor = self.descriptor(&filter.type_name)?;
                let query = ChangeQuery::new(request.since, request.until)
                    .restrict(filter.sync_ids.as_deref());
                descriptor.count_changes(&self.repository, &query).await
            }
            Segment::Tombstones(filter) => match &filter.sync_ids {
                None => Ok(self
                    .repository
                    .count_tombstones(&filter.type_name, request.since, request.until)
                    .await?),
                Some(_) => Ok(self.restricted_tombstones(filter, request).await?.len()),
            },
        }
    }

    async fn fetch_segment(
        &self,
        segment: &Segment<'_>,
        request: &SyncRequest,
        skip: usize,
        take: usize,
    ) -> Result<Vec<SyncObject>, SyncError> {
        match segment {
            Segment::Entities(filter) => {
                let descriptor = self.descriptor(&filter.type_name)?;
                let query = ChangeQuery::new(request.since, request.until)
                    .restrict(filter.sync_ids.as_deref())
                    .page(skip, take);
                descriptor.get_changes(&self.repository, &query).await
            }
            Segment::Tombstones(filter) => {
                let tombstones = match &filter.sync_ids {
                    None => {
                        self.repository
                            .query_tombstones(
                                &filter.type_name,
                                request.since,
                                request.until,
                                skip,
                                take,
                            )
                            .await?
                    }
                    Some(_) => self
                        .restricted_tombstones(filter, request)
                        .await?
                        .into_iter()
                        .skip(skip)
                        .take(take)
                        .collect(),
                };
                Ok(tombstones.iter().map(SyncObject::from_tombstone).collect())
            }
        }
    }

    async fn restricted_tombstones(
        &self,
        filter: &SyncRepositoryFilter,
        request: &SyncRequest,
    ) -> Result<Vec<SyncTombstone>, SyncError> {
        let wanted = filter.sync_ids.as_deref().unwrap_or_default();
        let all = self
            .repository
            .query_tombstones(&filter.type_name, request.since, request.until, 0, usize::MAX)
            .await?;
        Ok(all
            .into_iter()
            .filter(|t| wanted.contains(&t.sync_id))
            .collect())
    }

    fn descriptor(
        &self,
        type_name: &str,
    ) -> Result<&Arc<dyn EntityDescriptor<R>>, SyncError> {
        self.registry
            .get(type_name)
            .ok_or_else(|| SyncError::InvalidOptions(format!("unsupported type {}", type_name)))
    }

    async fn apply(&self, session_id: Uuid, objects: Vec<SyncObject>) -> Result<Vec<SyncIssue>, SyncError> {
        let mut state = self.sessions.acquire(&self.key(session_id)).await?;
        let SessionState {
            session,
            actor,
            statistics,
            ..
        } = &mut *state;
        let context = ApplyContext {
            actor: &*actor,
            permanent_deletions: session.options.permanent_deletions,
        };

        let mut issues = Vec::new();
        for object in &objects {
            let Some(descriptor) = self.registry.get(&object.type_name) else {
                issues.push(SyncIssue::new(
                    object,
                    IssueType::UnsupportedType,
                    format!("{} is not a synced type", object.type_name),
                ));
                continue;
            };

            match descriptor.apply(&self.repository, object, &context).await {
                Ok(outcome) => statistics.record(&object.type_name, outcome),
                Err(ApplyFailure::Issue(issue)) => {
                    tracing::debug!(
                        "{}: {} {} not applied: {}",
                        self.name,
                        issue.type_name,
                        issue.sync_id,
                        issue.message
                    );
                    issues.push(issue);
                }
                Err(ApplyFailure::Storage(e)) => return Err(e.into()),
            }
        }

        if !session.options.include_issue_details {
            for issue in &mut issues {
                issue.message.clear();
            }
        }
        Ok(issues)
    }
}

#[async_trait]
impl<R> SyncClient for LocalSyncClient<R>
where
    R: TombstoneStore + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn begin_sync(&self, session_id: Uuid, mut options: SyncOptions) -> Result<SyncSession, SyncError> {
        check_version(
            &options,
            self.settings.min_protocol_version,
            self.settings.max_protocol_version,
        )?;
        let filters = self.registry.resolve_filters(&options.filters)?;

        options.items_per_sync_request = options
            .items_per_sync_request
            .clamp(1, self.settings.max_items_per_sync_request);
        if self.settings.authoritative {
            options.permanent_deletions = false;
        }

        let session = SyncSession {
            session_id,
            started_on: Utc::now(),
            options,
        };
        let state = SessionState {
            session: session.clone(),
            filters,
            actor: self.actor.clone(),
            statistics: SyncStatistics::new(),
        };
        self.sessions.begin(self.key(session_id), state).await?;

        tracing::info!(
            "{}: began sync session {} for {} ({:?})",
            self.name,
            session_id,
            self.actor.id,
            session.options.direction
        );
        Ok(session)
    }

    async fn get_changes(&self, session_id: Uuid, request: SyncRequest) -> Result<SyncBatch, SyncError> {
        let state = self.sessions.acquire(&self.key(session_id)).await?;
        let take = request
            .take
            .min(state.session.options.items_per_sync_request);

        let segments: Vec<Segment<'_>> = state
            .filters
            .iter()
            .map(Segment::Entities)
            .chain(state.filters.iter().map(Segment::Tombstones))
            .collect();

        let mut total_count = 0;
        let mut skip = request.skip;
        let mut objects = Vec::new();
        for segment in &segments {
            let count = self.count_segment(segment, &request).await?;
            total_count += count;

            let remaining = take - objects.len();
            if skip >= count {
                skip -= count;
                continue;
            }
            if remaining == 0 {
                continue;
            }
            let page = self.fetch_segment(segment, &request, skip, remaining).await?;
            skip = 0;
            objects.extend(page);
        }

        tracing::debug!(
            "{}: session {} returned {} of {} changes (skip {})",
            self.name,
            session_id,
            objects.len(),
            total_count,
            request.skip
        );
        Ok(SyncBatch {
            objects,
            total_count,
        })
    }

    async fn apply_changes(
        &self,
        session_id: Uuid,
        objects: Vec<SyncObject>,
    ) -> Result<Vec<SyncIssue>, SyncError> {
        self.apply(session_id, objects).await
    }

    async fn get_corrections(
        &self,
        session_id: Uuid,
        issues: Vec<SyncIssue>,
    ) -> Result<Vec<SyncObject>, SyncError> {
        let _state = self.sessions.acquire(&self.key(session_id)).await?;

        let mut seen = HashSet::new();
        let mut corrections = Vec::new();
        let mut stack: Vec<CorrectionStep> = issues
            .iter()
            .rev()
            .filter(|issue| issue.is_relationship())
            .map(|issue| CorrectionStep::Visit(issue.type_name.clone(), issue.sync_id))
            .collect();

        // Depth-first so every parent is offered before the entities that need it.
        while let Some(step) = stack.pop() {
            match step {
                CorrectionStep::Visit(type_name, sync_id) => {
                    if !seen.insert((type_name.clone(), sync_id)) {
                        continue;
                    }
                    let Some(descriptor) = self.registry.get(&type_name) else {
                        continue;
                    };
                    let Some((object, dependencies)) =
                        descriptor.get_object(&self.repository, sync_id).await?
                    else {
                        continue;
                    };
                    stack.push(CorrectionStep::Emit(object));
                    for dependency in dependencies.iter().rev() {
                        stack.push(CorrectionStep::Visit(
                            dependency.type_name.to_string(),
                            dependency.sync_id,
                        ));
                    }
                }
                CorrectionStep::Emit(object) => corrections.push(object),
            }
        }

        tracing::debug!(
            "{}: session {} offering {} corrections",
            self.name,
            session_id,
            corrections.len()
        );
        Ok(corrections)
    }

    async fn apply_corrections(
        &self,
        session_id: Uuid,
        objects: Vec<SyncObject>,
    ) -> Result<Vec<SyncIssue>, SyncError> {
        self.apply(session_id, objects).await
    }

    async fn end_sync(&self, session_id: Uuid) -> Result<SyncStatistics, SyncError> {
        match self.sessions.end(&self.key(session_id)).await? {
            Some(state) => {
                tracing::info!(
                    "{}: ended sync session {} ({} items applied)",
                    self.name,
                    session_id,
                    state.statistics.total()
                );
                Ok(state.statistics)
            }
            None => Ok(SyncStatistics::new()),
        }
    }
}
