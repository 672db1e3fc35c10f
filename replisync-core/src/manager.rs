//! Scheduling of named sync types over the life of a process.
//!
//! Every sync type runs through a single execution slot. A request for a type
//! that is strictly narrower than the one running is dropped (its callback
//! still fires, with no results); every other request waits its turn.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bitflags::bitflags;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::{SyncEngine, DEFAULT_CORRECTION_RETRIES};
use crate::model::{
    SyncEngineState, SyncEngineStatus, SyncIssue, SyncOptions, SyncRepositoryFilter,
    SyncStatistics,
};
use crate::sync::{SyncClient, SyncError};

/// Errors raised by the sync manager.
#[derive(Error, Debug)]
pub enum SyncManagerError {
    #[error("Unknown sync type: {0}")]
    UnknownSyncType(String),

    #[error("Sync type {sync_type} failed: {source}")]
    Failed {
        sync_type: String,
        #[source]
        source: SyncError,
    },

    #[error("Sync task failed: {0}")]
    Join(String),
}

bitflags! {
    /// How far a requested sync got.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncStatus: u8 {
        const STARTED = 1;
        const COMPLETED = 1 << 1;
        const SUCCESSFUL = 1 << 2;
        const CANCELLED = 1 << 3;
    }
}

/// Outcome of one sync request.
#[derive(Debug, Clone)]
pub struct SyncResults {
    pub sync_type: String,
    pub status: SyncStatus,
    /// Options the run actually used, after clamping and watermark updates.
    pub options: SyncOptions,
    pub issues: Vec<SyncIssue>,
    pub statistics: SyncStatistics,
    pub elapsed: Duration,
}

impl SyncResults {
    fn not_started(sync_type: &str, options: SyncOptions) -> Self {
        Self {
            sync_type: sync_type.to_string(),
            status: SyncStatus::empty(),
            options,
            issues: Vec::new(),
            statistics: SyncStatistics::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.status.contains(SyncStatus::SUCCESSFUL)
    }
}

/// Run statistics for one sync type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncTimer {
    /// Duration of the most recent run.
    pub elapsed: Duration,
    /// Runs contributing to `average`. Cancelled runs are not counted.
    pub samples: u32,
    pub average: Duration,
    pub successful_syncs: u32,
    pub failed_syncs: u32,
    pub cancelled_syncs: u32,
}

impl SyncTimer {
    fn record(&mut self, elapsed: Duration, status: SyncStatus) {
        self.elapsed = elapsed;
        if status.contains(SyncStatus::CANCELLED) {
            self.cancelled_syncs += 1;
            return;
        }

        if status.contains(SyncStatus::SUCCESSFUL) {
            self.successful_syncs += 1;
        } else {
            self.failed_syncs += 1;
        }
        let total = self.average * self.samples + elapsed;
        self.samples += 1;
        self.average = total / self.samples;
    }
}

struct SyncProfile {
    options: SyncOptions,
    timer: SyncTimer,
}

struct Running {
    sync_type: String,
    filters: Vec<SyncRepositoryFilter>,
    cancel: CancellationToken,
}

struct Inner {
    client: Arc<dyn SyncClient>,
    server: Arc<dyn SyncClient>,
    correction_retries: usize,
    profiles: Mutex<HashMap<String, SyncProfile>>,
    slot: Arc<tokio::sync::Mutex<()>>,
    running: Mutex<Option<Running>>,
    progress: Arc<watch::Sender<SyncEngineState>>,
}

/// Serialises named sync types through one engine at a time.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

/// Whether a run over `broad` filters covers everything `narrow` touches.
/// An empty filter list means every type.
fn covers(broad: &[SyncRepositoryFilter], narrow: &[SyncRepositoryFilter]) -> bool {
    if broad.is_empty() {
        return true;
    }
    if narrow.is_empty() {
        return false;
    }
    narrow.iter().all(|n| {
        broad.iter().any(|b| {
            b.type_name == n.type_name
                && match (&b.sync_ids, &n.sync_ids) {
                    (None, _) => true,
                    (Some(_), None) => false,
                    (Some(b_ids), Some(n_ids)) => {
                        let b_ids: BTreeSet<_> = b_ids.iter().collect();
                        n_ids.iter().all(|id| b_ids.contains(id))
                    }
                }
        })
    })
}

impl SyncManager {
    pub fn new(client: Arc<dyn SyncClient>, server: Arc<dyn SyncClient>) -> Self {
        Self::with_correction_retries(client, server, DEFAULT_CORRECTION_RETRIES)
    }

    pub fn with_correction_retries(
        client: Arc<dyn SyncClient>,
        server: Arc<dyn SyncClient>,
        correction_retries: usize,
    ) -> Self {
        let (progress, _) = watch::channel(SyncEngineState::default());
        Self {
            inner: Arc::new(Inner {
                client,
                server,
                correction_retries,
                profiles: Mutex::new(HashMap::new()),
                slot: Arc::new(tokio::sync::Mutex::new(())),
                running: Mutex::new(None),
                progress: Arc::new(progress),
            }),
        }
    }

    /// Registers or replaces a named sync type. Its timer is kept.
    pub fn add_sync_type(&self, sync_type: impl Into<String>, options: SyncOptions) {
        let mut profiles = lock(&self.inner.profiles);
        profiles
            .entry(sync_type.into())
            .and_modify(|p| p.options = options.clone())
            .or_insert(SyncProfile {
                options,
                timer: SyncTimer::default(),
            });
    }

    pub fn sync_types(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.profiles).keys().cloned().collect();
        names.sort();
        names
    }

    /// Current options for a type, including watermarks from completed runs.
    pub fn options(&self, sync_type: &str) -> Option<SyncOptions> {
        lock(&self.inner.profiles)
            .get(sync_type)
            .map(|p| p.options.clone())
    }

    pub fn timer(&self, sync_type: &str) -> Option<SyncTimer> {
        lock(&self.inner.profiles).get(sync_type).map(|p| p.timer)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.running).is_some()
    }

    /// The sync type currently holding the execution slot.
    pub fn running_sync_type(&self) -> Option<String> {
        lock(&self.inner.running)
            .as_ref()
            .map(|r| r.sync_type.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncEngineState> {
        self.inner.progress.subscribe()
    }

    /// Requests cancellation of the running sync. Returns false if idle.
    pub fn cancel_sync(&self) -> bool {
        match lock(&self.inner.running).as_ref() {
            Some(running) => {
                tracing::info!("Cancelling sync type {}", running.sync_type);
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Waits until a run has begun starting.
    pub async fn wait_for_sync_to_start(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |state| state.status.is_running())
            .await
    }

    /// Waits until a run is transferring changes.
    pub async fn wait_for_sync_to_running(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |state| {
            matches!(
                state.status,
                SyncEngineStatus::Pulling | SyncEngineStatus::Pushing
            )
        })
        .await
    }

    /// Waits until no run is in progress.
    pub async fn wait_for_sync_to_complete(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |state| !state.status.is_running())
            .await
    }

    async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: FnMut(&SyncEngineState) -> bool,
    {
        let mut progress = self.inner.progress.subscribe();
        let reached = tokio::time::timeout(timeout, progress.wait_for(predicate))
            .await
            .is_ok_and(|changed| changed.is_ok());
        reached
    }

    /// Runs a sync type in the background.
    pub fn sync_async<F>(
        &self,
        sync_type: impl Into<String>,
        timeout: Option<Duration>,
        callback: F,
    ) -> JoinHandle<Result<SyncResults, SyncManagerError>>
    where
        F: FnOnce(Option<&SyncResults>) + Send + 'static,
    {
        let manager = self.clone();
        let sync_type = sync_type.into();
        tokio::spawn(async move { manager.sync(&sync_type, timeout, callback).await })
    }

    /// Runs a sync type, waiting for the execution slot if needed.
    ///
    /// `callback` is invoked exactly once for every request that reaches the
    /// slot or is skipped: with `None` when a broader type was running,
    /// otherwise with the results of the run.
    ///
    /// Once the slot is acquired the run proceeds in its own task, so dropping
    /// this future does not abandon open sessions or leave the slot marked busy.
    pub async fn sync<F>(
        &self,
        sync_type: &str,
        timeout: Option<Duration>,
        callback: F,
    ) -> Result<SyncResults, SyncManagerError>
    where
        F: FnOnce(Option<&SyncResults>) + Send + 'static,
    {
        let options = self
            .options(sync_type)
            .ok_or_else(|| SyncManagerError::UnknownSyncType(sync_type.to_string()))?;

        if let Some(running) = self.broader_running(&options.filters) {
            tracing::info!(
                "Sync type {} not started, sync type {} running",
                sync_type,
                running
            );
            callback(None);
            return Ok(SyncResults::not_started(sync_type, options));
        }

        let slot = Arc::clone(&self.inner.slot).lock_owned().await;
        let manager = self.clone();
        let name = sync_type.to_string();
        let run = tokio::spawn(async move {
            let _slot = slot;
            manager.run_exclusive(&name, options, timeout, callback).await
        });
        run.await
            .map_err(|e| SyncManagerError::Join(e.to_string()))?
    }

    async fn run_exclusive<F>(
        &self,
        sync_type: &str,
        options: SyncOptions,
        timeout: Option<Duration>,
        callback: F,
    ) -> Result<SyncResults, SyncManagerError>
    where
        F: FnOnce(Option<&SyncResults>),
    {
        // Watermarks may have moved while this request waited.
        let options = self.options(sync_type).unwrap_or(options);

        let cancel = CancellationToken::new();
        *lock(&self.inner.running) = Some(Running {
            sync_type: sync_type.to_string(),
            filters: options.filters.clone(),
            cancel: cancel.clone(),
        });
        let running = RunningGuard {
            running: &self.inner.running,
            cancel: cancel.clone(),
        };
        tracing::info!("Sync type {} started", sync_type);

        let timer = timeout.map(|limit| {
            let token = cancel.clone();
            let name = sync_type.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                tracing::warn!("Sync type {} timed out after {:?}", name, limit);
                token.cancel();
            })
        });

        let mut engine = SyncEngine::new(
            Arc::clone(&self.inner.client),
            Arc::clone(&self.inner.server),
            options,
        )
        .with_correction_retries(self.inner.correction_retries)
        .with_cancellation(cancel)
        .with_progress(Arc::clone(&self.inner.progress));

        let started = Instant::now();
        let outcome = engine.run().await;
        let elapsed = started.elapsed();

        if let Some(timer) = timer {
            timer.abort();
        }
        drop(running);

        let status = match &outcome {
            Ok(SyncEngineStatus::Cancelled) => SyncStatus::STARTED | SyncStatus::CANCELLED,
            Ok(_) => SyncStatus::STARTED | SyncStatus::COMPLETED | SyncStatus::SUCCESSFUL,
            Err(_) => SyncStatus::STARTED | SyncStatus::COMPLETED,
        };
        let results = SyncResults {
            sync_type: sync_type.to_string(),
            status,
            options: engine.options().clone(),
            issues: engine.issues().to_vec(),
            statistics: engine.statistics(),
            elapsed,
        };

        {
            let mut profiles = lock(&self.inner.profiles);
            if let Some(profile) = profiles.get_mut(sync_type) {
                profile.timer.record(elapsed, status);
                if results.is_successful() {
                    profile.options = results.options.clone();
                }
            }
        }
        tracing::info!(
            "Sync type {} finished in {:?} ({:?})",
            sync_type,
            elapsed,
            status
        );

        callback(Some(&results));
        match outcome {
            Ok(_) => Ok(results),
            Err(source) => Err(SyncManagerError::Failed {
                sync_type: sync_type.to_string(),
                source,
            }),
        }
    }

    /// Name of the running type if it strictly covers `filters`.
    fn broader_running(&self, filters: &[SyncRepositoryFilter]) -> Option<String> {
        let running = lock(&self.inner.running);
        running.as_ref().and_then(|r| {
            (covers(&r.filters, filters) && !covers(filters, &r.filters))
                .then(|| r.sync_type.clone())
        })
    }
}

/// Frees the running marker when a run ends, including by panic.
struct RunningGuard<'a> {
    running: &'a Mutex<Option<Running>>,
    cancel: CancellationToken,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.cancel.cancel();
        *lock(self.running) = None;
    }
}

/// Locks a std mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
