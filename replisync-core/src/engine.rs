//! One sync run between two participants.
//!
//! The engine begins a session on both sides, pulls server changes into the
//! client, pushes client changes to the server, retries dependency failures
//! through the correction round-trip and ends both sessions. Progress is
//! published on a watch channel after every batch; cancellation is observed
//! only between batches.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{
    SyncEngineState, SyncEngineStatus, SyncIssue, SyncOptions, SyncRequest, SyncSession,
    SyncStatistics,
};
use crate::sync::protocol::with_protocol_version;
use crate::sync::{SyncClient, SyncError};

/// Default number of correction round-trips per phase.
pub const DEFAULT_CORRECTION_RETRIES: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pull,
    Push,
}

impl Phase {
    fn status(self) -> SyncEngineStatus {
        match self {
            Phase::Pull => SyncEngineStatus::Pulling,
            Phase::Push => SyncEngineStatus::Pushing,
        }
    }
}

/// Drives a single sync run. Create a new engine for every run.
pub struct SyncEngine {
    client: Arc<dyn SyncClient>,
    server: Arc<dyn SyncClient>,
    options: SyncOptions,
    correction_retries: usize,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SyncEngineState>>,
    session_id: Uuid,
    issues: Vec<SyncIssue>,
    client_statistics: SyncStatistics,
    server_statistics: SyncStatistics,
}

impl SyncEngine {
    pub fn new(client: Arc<dyn SyncClient>, server: Arc<dyn SyncClient>, options: SyncOptions) -> Self {
        let (state, _) = watch::channel(SyncEngineState::default());
        Self {
            client,
            server,
            options,
            correction_retries: DEFAULT_CORRECTION_RETRIES,
            cancel: CancellationToken::new(),
            state: Arc::new(state),
            session_id: Uuid::new_v4(),
            issues: Vec::new(),
            client_statistics: SyncStatistics::new(),
            server_statistics: SyncStatistics::new(),
        }
    }

    pub fn with_correction_retries(mut self, retries: usize) -> Self {
        self.correction_retries = retries;
        self
    }

    /// Uses an externally owned token, e.g. one shared with a timeout.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Publishes progress on a channel that outlives this engine.
    pub fn with_progress(mut self, progress: Arc<watch::Sender<SyncEngineState>>) -> Self {
        self.state = progress;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncEngineState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SyncEngineState {
        *self.state.borrow()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Options as used by the run, with watermarks advanced on completion.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Issues that remained unresolved, from both phases.
    pub fn issues(&self) -> &[SyncIssue] {
        &self.issues
    }

    /// Changes applied on the client (the pull direction).
    pub fn client_statistics(&self) -> &SyncStatistics {
        &self.client_statistics
    }

    /// Changes applied on the server (the push direction).
    pub fn server_statistics(&self) -> &SyncStatistics {
        &self.server_statistics
    }

    pub fn statistics(&self) -> SyncStatistics {
        let mut statistics = self.client_statistics.clone();
        statistics.merge(&self.server_statistics);
        statistics
    }

    /// Runs the sync to completion or cancellation.
    ///
    /// Returns the terminal status; run-level failures are returned as
    /// errors after both sessions have been released.
    pub async fn run(&mut self) -> Result<SyncEngineStatus, SyncError> {
        self.publish(SyncEngineStatus::Starting, 0, 0);
        tracing::info!(
            "Sync {} starting ({} <-> {}, {:?})",
            self.session_id,
            self.client.name(),
            self.server.name(),
            self.options.direction
        );

        let requested = with_protocol_version(self.options.clone());

        let client_session = match self
            .client
            .begin_sync(self.session_id, requested.clone())
            .await
        {
            Ok(session) => session,
            Err(e) => return Err(self.fail(e, false, false).await),
        };
        let server_session = match self.server.begin_sync(self.session_id, requested).await {
            Ok(session) => session,
            Err(e) => return Err(self.fail(e, true, false).await),
        };

        // The server may clamp what was asked for.
        self.options.items_per_sync_request = client_session
            .options
            .items_per_sync_request
            .min(server_session.options.items_per_sync_request);
        self.options.values = server_session.options.values.clone();

        match self.exchange(&client_session, &server_session).await {
            Ok(completed) => {
                self.finish(completed, &client_session, &server_session)
                    .await
            }
            Err(e) => Err(self.fail(e, true, true).await),
        }
    }

    async fn exchange(
        &mut self,
        client_session: &SyncSession,
        server_session: &SyncSession,
    ) -> Result<bool, SyncError> {
        let direction = self.options.direction;

        if direction.pulls() {
            let request = SyncRequest {
                since: self.options.last_synced_on_server,
                until: server_session.started_on,
                skip: 0,
                take: self.options.items_per_sync_request,
            };
            if !self.transfer(Phase::Pull, request).await? {
                return Ok(false);
            }
        }

        if direction.pushes() {
            let request = SyncRequest {
                since: self.options.last_synced_on_client,
                until: client_session.started_on,
                skip: 0,
                take: self.options.items_per_sync_request,
            };
            if !self.transfer(Phase::Push, request).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Moves one direction's changes. Returns false if cancelled.
    async fn transfer(&mut self, phase: Phase, mut request: SyncRequest) -> Result<bool, SyncError> {
        let (source, destination) = match phase {
            Phase::Pull => (Arc::clone(&self.server), Arc::clone(&self.client)),
            Phase::Push => (Arc::clone(&self.client), Arc::clone(&self.server)),
        };
        let status = phase.status();
        self.publish(status, 0, 0);
        tracing::debug!(
            "Sync {} {} from {} to {}",
            self.session_id,
            status,
            source.name(),
            destination.name()
        );

        let mut count = 0;
        let mut pending = Vec::new();
        loop {
            if self.cancel.is_cancelled() {
                self.issues.append(&mut pending);
                return Ok(false);
            }

            let batch = source.get_changes(self.session_id, request.clone()).await?;
            if batch.objects.is_empty() {
                self.publish(status, count, batch.total_count.max(count));
                break;
            }

            let received = batch.objects.len();
            let issues = destination
                .apply_changes(self.session_id, batch.objects)
                .await?;
            self.sort_issues(issues, &mut pending);

            count += received;
            request.skip += received;
            self.publish(status, count, batch.total_count);

            if request.skip >= batch.total_count {
                break;
            }
        }

        self.correct(source.as_ref(), destination.as_ref(), pending)
            .await
    }

    /// Correction round-trips for dependency failures. Returns false if cancelled.
    async fn correct(
        &mut self,
        source: &dyn SyncClient,
        destination: &dyn SyncClient,
        mut pending: Vec<SyncIssue>,
    ) -> Result<bool, SyncError> {
        for pass in 0..self.correction_retries {
            if pending.is_empty() {
                break;
            }
            if self.cancel.is_cancelled() {
                self.issues.append(&mut pending);
                return Ok(false);
            }

            let corrections = source
                .get_corrections(self.session_id, pending.clone())
                .await?;
            if corrections.is_empty() {
                break;
            }
            tracing::debug!(
                "Sync {} correction pass {}: {} issues, {} objects",
                self.session_id,
                pass + 1,
                pending.len(),
                corrections.len()
            );

            let issues = destination
                .apply_corrections(self.session_id, corrections)
                .await?;
            pending.clear();
            self.sort_issues(issues, &mut pending);
        }

        self.issues.append(&mut pending);
        Ok(true)
    }

    /// Keeps dependency failures for correction; everything else is final.
    fn sort_issues(&mut self, issues: Vec<SyncIssue>, pending: &mut Vec<SyncIssue>) {
        for issue in issues {
            if issue.is_relationship() {
                pending.push(issue);
            } else {
                self.issues.push(issue);
            }
        }
    }

    async fn finish(
        &mut self,
        completed: bool,
        client_session: &SyncSession,
        server_session: &SyncSession,
    ) -> Result<SyncEngineStatus, SyncError> {
        let ended = self.end_sessions(true, true).await;
        if let Err(e) = ended {
            return Err(self.fail(e, false, false).await);
        }

        let status = if completed {
            if self.options.direction.pulls() {
                self.options.last_synced_on_server = Some(server_session.started_on);
            }
            if self.options.direction.pushes() {
                self.options.last_synced_on_client = Some(client_session.started_on);
            }
            SyncEngineStatus::Completed
        } else {
            SyncEngineStatus::Cancelled
        };

        let state = self.state();
        self.publish(status, state.count, state.total);
        tracing::info!(
            "Sync {} {}: {} changes applied, {} issues",
            self.session_id,
            status,
            self.statistics().total(),
            self.issues.len()
        );
        Ok(status)
    }

    /// Ends the given sessions concurrently, keeping whatever statistics come back.
    async fn end_sessions(&mut self, client: bool, server: bool) -> Result<(), SyncError> {
        let session_id = self.session_id;
        let end = |participant: &Arc<dyn SyncClient>, active: bool| {
            let participant = Arc::clone(participant);
            async move {
                if active {
                    Some(participant.end_sync(session_id).await)
                } else {
                    None
                }
            }
        };
        let (client_end, server_end) =
            futures::future::join(end(&self.client, client), end(&self.server, server)).await;

        let mut first_error = None;
        for (outcome, statistics) in [
            (client_end, &mut self.client_statistics),
            (server_end, &mut self.server_statistics),
        ] {
            match outcome {
                Some(Ok(ended)) => *statistics = ended,
                Some(Err(e)) => first_error = first_error.or(Some(e)),
                None => {}
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Releases whatever sessions were started and marks the run failed.
    async fn fail(&mut self, error: SyncError, client: bool, server: bool) -> SyncError {
        if let Err(e) = self.end_sessions(client, server).await {
            tracing::warn!("Sync {}: failed to end session: {}", self.session_id, e);
        }
        let state = self.state();
        self.publish(SyncEngineStatus::Failed, state.count, state.total);
        tracing::error!("Sync {} failed: {}", self.session_id, error);
        error
    }

    fn publish(&self, status: SyncEngineStatus, count: usize, total: usize) {
        self.state.send_replace(SyncEngineState {
            status,
            count,
            total,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration;

    use crate::converter::Actor;
    use crate::model::{
        IssueType, SyncBatch, SyncDirection, SyncEntity, SyncObject, SyncRepositoryFilter,
    };
    use crate::models::{
        Account, AccountConverter, AccountEntity, Address, AddressConverter, AddressEntity,
    };
    use crate::registry::SyncRegistry;
    use crate::repository::{EntityStore, MemoryRepository};
    use crate::sync::{LocalSyncClient, SyncClientSettings};

    /// Wraps a participant to count calls and inject failures.
    struct Probe {
        inner: LocalSyncClient<MemoryRepository>,
        get_changes_calls: AtomicUsize,
        end_calls: AtomicUsize,
        /// 1-based `get_changes` call from which every call fails.
        fail_get_changes_from: AtomicUsize,
        /// Cancelled once the next applied batch has been stored.
        cancel_after_apply: std::sync::Mutex<Option<CancellationToken>>,
    }

    impl Probe {
        fn new(inner: LocalSyncClient<MemoryRepository>) -> Arc<Self> {
            Arc::new(Self {
                inner,
                get_changes_calls: AtomicUsize::new(0),
                end_calls: AtomicUsize::new(0),
                fail_get_changes_from: AtomicUsize::new(usize::MAX),
                cancel_after_apply: std::sync::Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl SyncClient for Probe {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn begin_sync(&self, id: Uuid, options: SyncOptions) -> Result<SyncSession, SyncError> {
            self.inner.begin_sync(id, options).await
        }

        async fn get_changes(&self, id: Uuid, request: SyncRequest) -> Result<SyncBatch, SyncError> {
            let call = self.get_changes_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.fail_get_changes_from.load(Ordering::SeqCst) {
                return Err(SyncError::HttpError("connection reset".to_string()));
            }
            self.inner.get_changes(id, request).await
        }

        async fn apply_changes(&self, id: Uuid, objects: Vec<SyncObject>) -> Result<Vec<SyncIssue>, SyncError> {
            let issues = self.inner.apply_changes(id, objects).await?;
            if let Some(token) = self.cancel_after_apply.lock().unwrap().take() {
                token.cancel();
            }
            Ok(issues)
        }

        async fn get_corrections(&self, id: Uuid, issues: Vec<SyncIssue>) -> Result<Vec<SyncObject>, SyncError> {
            self.inner.get_corrections(id, issues).await
        }

        async fn apply_corrections(&self, id: Uuid, objects: Vec<SyncObject>) -> Result<Vec<SyncIssue>, SyncError> {
            self.inner.apply_corrections(id, objects).await
        }

        async fn end_sync(&self, id: Uuid) -> Result<SyncStatistics, SyncError> {
            self.end_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.end_sync(id).await
        }
    }

    struct Replicas {
        client_repo: Arc<MemoryRepository>,
        server_repo: Arc<MemoryRepository>,
        client: Arc<Probe>,
        server: Arc<Probe>,
    }

    fn replicas() -> Replicas {
        let registry = Arc::new(
            SyncRegistry::new()
                .register::<AccountEntity, Account, _>(AccountConverter)
                .register::<AddressEntity, Address, _>(AddressConverter),
        );
        let client_repo = Arc::new(MemoryRepository::new());
        let server_repo = Arc::new(MemoryRepository::authoritative());
        let client = LocalSyncClient::new(
            "client",
            client_repo.clone(),
            registry.clone(),
            SyncClientSettings::replica(),
            Actor::administrator("local"),
        );
        let server = LocalSyncClient::new(
            "server",
            server_repo.clone(),
            registry,
            SyncClientSettings::authoritative(),
            Actor::new("john"),
        );
        Replicas {
            client_repo,
            server_repo,
            client: Probe::new(client),
            server: Probe::new(server),
        }
    }

    impl Replicas {
        fn engine(&self, options: SyncOptions) -> SyncEngine {
            SyncEngine::new(self.client.clone(), self.server.clone(), options)
        }
    }

    async fn seed(repo: &MemoryRepository, name: &str, line1: &str) -> (AccountEntity, AddressEntity) {
        let mut account = AccountEntity::new(name);
        account.meta.created_on = account.meta.created_on - Duration::seconds(5);
        account.meta.modified_on = account.meta.created_on;
        let account = repo.add(account).await.unwrap();
        let mut address = AddressEntity::new(account.meta.sync_id, line1);
        address.meta.created_on = address.meta.created_on - Duration::seconds(5);
        address.meta.modified_on = address.meta.created_on;
        let address = repo.add(address).await.unwrap();
        (account, address)
    }

    #[tokio::test]
    async fn test_pull_down_leaves_server_unchanged() {
        let replicas = replicas();
        seed(&replicas.client_repo, "Client", "Hello World").await;
        let (_, foo) = seed(&replicas.server_repo, "Server", "Foo Bar").await;

        let mut engine = replicas.engine(SyncOptions::new(SyncDirection::PullDown));
        let status = engine.run().await.unwrap();

        assert_eq!(status, SyncEngineStatus::Completed);
        assert_eq!(replicas.client_repo.count::<AddressEntity>().await, 2);
        assert_eq!(replicas.server_repo.count::<AddressEntity>().await, 1);

        let pulled: AddressEntity = replicas
            .client_repo
            .get_by_sync_id(foo.meta.sync_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pulled.line1, "Foo Bar");
        assert_eq!(pulled.meta.created_on, foo.meta.created_on);
        assert!(engine.issues().is_empty());
        assert_eq!(engine.client_statistics().get(AddressEntity::TYPE_NAME).added, 1);
    }

    #[tokio::test]
    async fn test_push_up_leaves_client_unchanged() {
        let replicas = replicas();
        let (_, hello) = seed(&replicas.client_repo, "Client", "Hello World").await;
        seed(&replicas.server_repo, "Server", "Foo Bar").await;

        let mut engine = replicas.engine(SyncOptions::new(SyncDirection::PushUp));
        engine.run().await.unwrap();

        assert_eq!(replicas.client_repo.count::<AddressEntity>().await, 1);
        assert_eq!(replicas.server_repo.count::<AddressEntity>().await, 2);
        let pushed: Option<AddressEntity> = replicas
            .server_repo
            .get_by_sync_id(hello.meta.sync_id)
            .await
            .unwrap();
        assert!(pushed.is_some());
        assert_eq!(replicas.server.get_changes_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_both_directions_converge() {
        let replicas = replicas();
        seed(&replicas.client_repo, "Client", "Hello World").await;
        seed(&replicas.server_repo, "Server", "Foo Bar").await;

        let mut engine = replicas.engine(SyncOptions::new(SyncDirection::Both));
        engine.run().await.unwrap();

        assert_eq!(replicas.client_repo.count::<AddressEntity>().await, 2);
        assert_eq!(replicas.server_repo.count::<AddressEntity>().await, 2);
        assert!(engine.options().last_synced_on_client.is_some());
        assert!(engine.options().last_synced_on_server.is_some());
        assert_eq!(engine.state().status, SyncEngineStatus::Completed);
        assert_eq!(engine.state().percent(), 100);
    }

    #[tokio::test]
    async fn test_second_run_applies_nothing_new() {
        let replicas = replicas();
        seed(&replicas.client_repo, "Client", "Hello World").await;
        seed(&replicas.server_repo, "Server", "Foo Bar").await;

        let mut first = replicas.engine(SyncOptions::new(SyncDirection::Both));
        first.run().await.unwrap();
        let before = replicas.client_repo.all::<AddressEntity>().await;

        let mut second = replicas.engine(first.options().clone());
        second.run().await.unwrap();

        let statistics = second.statistics();
        for stats in statistics.types.values() {
            assert_eq!(stats.added + stats.updated + stats.deleted, 0);
        }
        let after = replicas.client_repo.all::<AddressEntity>().await;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_missing_parent_is_corrected() {
        let replicas = replicas();
        let (account, address) = seed(&replicas.server_repo, "Server", "Foo Bar").await;

        let options = SyncOptions::new(SyncDirection::PullDown)
            .with_filter(SyncRepositoryFilter::of::<AddressEntity>());
        let mut engine = replicas.engine(options);
        engine.run().await.unwrap();

        assert!(engine.issues().is_empty());
        let parent: Option<AccountEntity> = replicas
            .client_repo
            .get_by_sync_id(account.meta.sync_id)
            .await
            .unwrap();
        assert!(parent.is_some());
        let child: Option<AddressEntity> = replicas
            .client_repo
            .get_by_sync_id(address.meta.sync_id)
            .await
            .unwrap();
        assert!(child.is_some());
    }

    #[tokio::test]
    async fn test_without_corrections_issue_is_reported() {
        let replicas = replicas();
        let (_, address) = seed(&replicas.server_repo, "Server", "Foo Bar").await;

        let options = SyncOptions::new(SyncDirection::PullDown)
            .with_filter(SyncRepositoryFilter::of::<AddressEntity>());
        let mut engine = replicas.engine(options).with_correction_retries(0);
        let status = engine.run().await.unwrap();

        assert_eq!(status, SyncEngineStatus::Completed);
        assert_eq!(engine.issues().len(), 1);
        assert_eq!(engine.issues()[0].sync_id, address.meta.sync_id);
        assert_eq!(engine.issues()[0].issue_type, IssueType::RelationshipConstraint);
        assert_eq!(replicas.client_repo.count::<AddressEntity>().await, 0);
    }

    #[tokio::test]
    async fn test_pulls_301_changes_in_two_batches() {
        let replicas = replicas();
        let base = chrono::Utc::now() - Duration::minutes(30);
        for i in 0..301 {
            let mut account = AccountEntity::new(format!("account {}", i));
            account.meta.created_on = base + Duration::milliseconds(i);
            account.meta.modified_on = account.meta.created_on;
            replicas.server_repo.add(account).await.unwrap();
        }

        let mut engine = replicas.engine(SyncOptions::new(SyncDirection::PullDown));
        engine.run().await.unwrap();

        assert_eq!(replicas.server.get_changes_calls.load(Ordering::SeqCst), 2);
        assert_eq!(replicas.client_repo.count::<AccountEntity>().await, 301);
        assert_eq!(engine.state().count, 301);
        assert_eq!(engine.state().total, 301);
    }

    #[tokio::test]
    async fn test_cancelled_run_keeps_watermarks() {
        let replicas = replicas();
        seed(&replicas.server_repo, "Server", "Foo Bar").await;

        let mut engine = replicas.engine(SyncOptions::new(SyncDirection::Both));
        engine.cancellation_token().cancel();
        let status = engine.run().await.unwrap();

        assert_eq!(status, SyncEngineStatus::Cancelled);
        assert_eq!(engine.state().status, SyncEngineStatus::Cancelled);
        assert!(engine.options().last_synced_on_server.is_none());
        assert_eq!(replicas.client_repo.count::<AddressEntity>().await, 0);
        assert_eq!(replicas.client.end_calls.load(Ordering::SeqCst), 1);
        assert_eq!(replicas.server.end_calls.load(Ordering::SeqCst), 1);
    }

    async fn seed_accounts(repo: &MemoryRepository, count: i64) {
        let base = chrono::Utc::now() - Duration::minutes(10);
        for i in 0..count {
            let mut account = AccountEntity::new(format!("account {}", i));
            account.meta.created_on = base + Duration::seconds(i);
            account.meta.modified_on = account.meta.created_on;
            repo.add(account).await.unwrap();
        }
    }

    fn one_per_batch() -> SyncOptions {
        let mut options = SyncOptions::new(SyncDirection::PullDown);
        options.items_per_sync_request = 1;
        options
    }

    #[tokio::test]
    async fn test_cancelled_run_keeps_statistics_of_applied_batches() {
        let replicas = replicas();
        seed_accounts(&replicas.server_repo, 3).await;

        let mut engine = replicas.engine(one_per_batch());
        *replicas.client.cancel_after_apply.lock().unwrap() = Some(engine.cancellation_token());
        let status = engine.run().await.unwrap();

        assert_eq!(status, SyncEngineStatus::Cancelled);
        assert_eq!(engine.client_statistics().get(AccountEntity::TYPE_NAME).added, 1);
        assert_eq!(replicas.client_repo.count::<AccountEntity>().await, 1);
        assert_eq!(engine.state().count, 1);
        assert!(engine.options().last_synced_on_server.is_none());
    }

    #[tokio::test]
    async fn test_failed_run_keeps_statistics_of_applied_batches() {
        let replicas = replicas();
        seed_accounts(&replicas.server_repo, 3).await;
        replicas.server.fail_get_changes_from.store(2, Ordering::SeqCst);

        let mut engine = replicas.engine(one_per_batch());
        let result = engine.run().await;

        assert!(matches!(result, Err(SyncError::HttpError(_))));
        assert_eq!(engine.state().status, SyncEngineStatus::Failed);
        assert_eq!(engine.client_statistics().get(AccountEntity::TYPE_NAME).added, 1);
        assert_eq!(replicas.client_repo.count::<AccountEntity>().await, 1);
        assert_eq!(replicas.client.end_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_releases_both_sessions() {
        let replicas = replicas();
        replicas.server.fail_get_changes_from.store(1, Ordering::SeqCst);

        let mut engine = replicas.engine(SyncOptions::new(SyncDirection::Both));
        let mut progress = engine.subscribe();
        let result = engine.run().await;

        assert!(matches!(result, Err(SyncError::HttpError(_))));
        assert_eq!(progress.borrow_and_update().status, SyncEngineStatus::Failed);
        assert_eq!(replicas.client.end_calls.load(Ordering::SeqCst), 1);
        assert_eq!(replicas.server.end_calls.load(Ordering::SeqCst), 1);
        assert!(engine.options().last_synced_on_server.is_none());
    }

    #[tokio::test]
    async fn test_server_rejection_fails_before_transfer() {
        let replicas = replicas();
        let options = SyncOptions::new(SyncDirection::Both)
            .with_filter(SyncRepositoryFilter::of::<AddressEntity>())
            .with_filter(SyncRepositoryFilter::of::<AccountEntity>());

        let mut engine = replicas.engine(options);
        assert!(matches!(
            engine.run().await,
            Err(SyncError::InvalidOptions(_))
        ));
        assert_eq!(engine.state().status, SyncEngineStatus::Failed);
        assert_eq!(replicas.server.get_changes_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_server_soft_deletes_pushed_deletions() {
        let replicas = replicas();
        let (account, _) = seed(&replicas.server_repo, "Server", "Foo Bar").await;

        let mut first = replicas.engine(SyncOptions::new(SyncDirection::PullDown));
        first.run().await.unwrap();

        // The client marks the account deleted; the server actor may not delete accounts.
        let mut local: AccountEntity = replicas
            .client_repo
            .get_by_sync_id(account.meta.sync_id)
            .await
            .unwrap()
            .unwrap();
        local.meta.is_deleted = true;
        local.meta.modified_on = chrono::Utc::now();
        replicas.client_repo.update(local).await.unwrap();

        let mut options = first.options().clone();
        options.direction = SyncDirection::PushUp;
        options.permanent_deletions = true;
        let mut second = replicas.engine(options);
        second.run().await.unwrap();

        let stored: AccountEntity = replicas
            .server_repo
            .get_by_sync_id(account.meta.sync_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.meta.is_deleted);
        assert!(second.issues().is_empty());
        assert_eq!(second.server_statistics().get(AccountEntity::TYPE_NAME).skipped, 1);
    }
}
