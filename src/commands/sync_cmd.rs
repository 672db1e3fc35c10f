//! Sync CLI commands for synchronizing with the server.

use clap::{Args, Subcommand, ValueEnum};
use sqlx::SqlitePool;
use std::sync::Arc;

use replisync::config::Config;
use replisync::db::{SqliteRepository, SyncStateRepository};
use replisync_core::{
    check_server, default_registry, AccountEntity, Actor, AddressEntity, LocalSyncClient,
    SyncClientSettings, SyncDirection, SyncError, SyncManager, SyncManagerError, SyncOptions,
    SyncRepositoryFilter, SyncResults, SyncStatistics, SyncStatus, WebSyncClient,
};

/// Sync with remote server
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,

    /// What to sync
    #[arg(long = "type", value_enum, default_value = "all", ignore_case = true)]
    sync_type: SyncType,

    /// Which way changes flow
    #[arg(long, value_enum, default_value = "both", ignore_case = true)]
    direction: Direction,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration and server status
    Status,
}

/// Named sync types, each a set of filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SyncType {
    All,
    Accounts,
    Addresses,
}

impl SyncType {
    pub fn name(self) -> &'static str {
        match self {
            SyncType::All => "All",
            SyncType::Accounts => "Accounts",
            SyncType::Addresses => "Addresses",
        }
    }

    /// Filters for this type; `All` leaves them empty, meaning every registered type.
    pub fn filters(self) -> Vec<SyncRepositoryFilter> {
        match self {
            SyncType::All => Vec::new(),
            SyncType::Accounts => vec![SyncRepositoryFilter::of::<AccountEntity>()],
            SyncType::Addresses => vec![SyncRepositoryFilter::of::<AddressEntity>()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Direction {
    Pull,
    Push,
    Both,
}

impl From<Direction> for SyncDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Pull => SyncDirection::PullDown,
            Direction::Push => SyncDirection::PushUp,
            Direction::Both => SyncDirection::Both,
        }
    }
}

impl SyncCommand {
    pub async fn run(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.sync(pool, config).await,
            Some(SyncSubcommand::Status) => self.status(pool, config).await,
        }
    }

    async fn sync(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        println!(
            "Syncing {} ({:?}) with {}...",
            self.sync_type.name(),
            self.direction,
            config.sync.server_url.as_deref().unwrap_or("<not configured>")
        );
        println!();

        let results = run_sync(pool, config, self.sync_type, self.direction.into()).await?;

        for line in statistics_lines(&results.statistics) {
            println!("  {}", line);
        }
        if !results.issues.is_empty() {
            println!();
            println!("Issues:");
            for issue in &results.issues {
                println!(
                    "  {} {} ({}): {}",
                    issue.type_name, issue.sync_id, issue.issue_type, issue.message
                );
            }
        }

        println!();
        if results.status.contains(SyncStatus::CANCELLED) {
            println!("Sync cancelled.");
        } else if results.statistics.is_empty() {
            println!("Already up to date.");
        } else {
            println!("Sync complete in {:.1}s.", results.elapsed.as_secs_f64());
        }
        Ok(())
    }

    async fn status(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        println!("Sync Configuration");
        println!("==================");
        println!();

        let (server_url, api_key) = match (&config.sync.server_url, &config.sync.api_key) {
            (Some(url), Some(key)) => (url, key),
            _ => {
                println!("Status: Not configured");
                println!();
                println!("To enable sync, add to your config file:");
                println!();
                println!("  sync:");
                println!("    server_url: \"http://localhost:8080\"");
                println!("    api_key: \"your-api-key\"");
                println!();
                println!("Or set environment variables:");
                println!("  REPLISYNC_SYNC_URL");
                println!("  REPLISYNC_SYNC_API_KEY");
                return Ok(());
            }
        };

        println!("Server:          {}", server_url);
        println!("API Key:         {}...", api_key.chars().take(8).collect::<String>());
        println!("Items/request:   {}", config.sync.items_per_request);
        println!("Corrections:     {}", config.sync.correction_retries);
        if let Some(timeout) = config.sync.timeout_secs {
            println!("Timeout:         {}s", timeout);
        }
        println!();

        let history = SyncStateRepository::new(pool.clone()).last_synced().await?;
        if history.is_empty() {
            println!("Last synced:     never");
        } else {
            for (sync_type, at) in history {
                println!("Last synced:     {} at {}", sync_type, at.to_rfc3339());
            }
        }
        println!();

        print!("Server status: ");
        match check_server(server_url).await {
            Ok(()) => println!("✓ connected"),
            Err(SyncError::HttpError(e)) => println!("✗ unreachable ({})", e),
            Err(e) => println!("✗ error: {}", e),
        }

        Ok(())
    }
}

/// Runs one sync type against the configured server and persists the new
/// watermarks when it succeeds. Ctrl-C cancels the run at the next batch.
pub async fn run_sync(
    pool: &SqlitePool,
    config: &Config,
    sync_type: SyncType,
    direction: SyncDirection,
) -> Result<SyncResults, SyncCommandError> {
    let (server_url, api_key) = match (&config.sync.server_url, &config.sync.api_key) {
        (Some(url), Some(key)) => (url.clone(), key.clone()),
        _ => return Err(SyncError::NotConfigured.into()),
    };
    let server = WebSyncClient::new(server_url, api_key)?;

    let repository = Arc::new(SqliteRepository::new(pool.clone()));
    let client = LocalSyncClient::new(
        "local",
        repository,
        Arc::new(default_registry()),
        SyncClientSettings::replica().with_max_items(config.sync.items_per_request),
        Actor::administrator(config.actor.value.clone()),
    );

    let manager = SyncManager::with_correction_retries(
        Arc::new(client),
        Arc::new(server),
        config.sync.correction_retries,
    );

    let state = SyncStateRepository::new(pool.clone());
    let mut options = SyncOptions::new(direction);
    options.items_per_sync_request = config.sync.items_per_request;
    options.filters = sync_type.filters();
    state.load_into(sync_type.name(), &mut options).await?;
    manager.add_sync_type(sync_type.name(), options);

    let progress = {
        let mut receiver = manager.subscribe();
        tokio::spawn(async move {
            let mut last = None;
            while receiver.changed().await.is_ok() {
                let state = *receiver.borrow();
                if last != Some(state.status) {
                    tracing::info!("Sync {}", state.status);
                    last = Some(state.status);
                }
                tracing::debug!("{} of {} ({}%)", state.count, state.total, state.percent());
            }
        })
    };
    let interrupt = {
        let manager = manager.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling sync");
                manager.cancel_sync();
            }
        })
    };

    let handle = manager.sync_async(sync_type.name(), config.sync.timeout(), |_| {});
    let outcome = handle.await;
    interrupt.abort();
    progress.abort();

    let results = outcome.map_err(|e| SyncManagerError::Join(e.to_string()))??;
    if results.is_successful() {
        state.save(sync_type.name(), &results.options).await?;
    }
    Ok(results)
}

/// One summary line per synced type.
fn statistics_lines(statistics: &SyncStatistics) -> Vec<String> {
    statistics
        .types
        .iter()
        .filter(|(_, stats)| stats.total() > 0)
        .map(|(type_name, stats)| {
            format!(
                "{}: {} added, {} updated, {} deleted, {} skipped",
                type_name, stats.added, stats.updated, stats.deleted, stats.skipped
            )
        })
        .collect()
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    SyncError(SyncError),
    ManagerError(SyncManagerError),
    DatabaseError(sqlx::Error),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::SyncError(e) => write!(f, "{}", e),
            SyncCommandError::ManagerError(e) => write!(f, "{}", e),
            SyncCommandError::DatabaseError(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::SyncError(e) => Some(e),
            SyncCommandError::ManagerError(e) => Some(e),
            SyncCommandError::DatabaseError(e) => Some(e),
        }
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::SyncError(e)
    }
}

impl From<SyncManagerError> for SyncCommandError {
    fn from(e: SyncManagerError) -> Self {
        SyncCommandError::ManagerError(e)
    }
}

impl From<sqlx::Error> for SyncCommandError {
    fn from(e: sqlx::Error) -> Self {
        SyncCommandError::DatabaseError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replisync::config::{ConfigSource, ConfigValue, SyncConfig};
    use replisync::db::init_db;
    use replisync::server::{router, ApiKeyEntry, ApiKeyStore, AppState};
    use replisync_core::{EntityStore, SyncEntity, SyncModel, TypeStatistics};
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    async fn serve() -> (String, Arc<SqliteRepository>, TempDir) {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("server.db")).await.unwrap();
        let repository = Arc::new(SqliteRepository::authoritative(pool));
        let sync = LocalSyncClient::new(
            "server",
            Arc::clone(&repository),
            Arc::new(default_registry()),
            SyncClientSettings::authoritative(),
            Actor::new("server"),
        );
        let state = AppState {
            api_keys: Arc::new(ApiKeyStore::from_entries(vec![ApiKeyEntry {
                key: "secret".to_string(),
                user_id: "john".to_string(),
                roles: vec!["Administrator".to_string()],
            }])),
            sync: Arc::new(sync),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), repository, temp_dir)
    }

    fn config(server_url: Option<String>, db: PathBuf) -> Config {
        Config {
            database_path: ConfigValue::new(db, ConfigSource::Default),
            actor: ConfigValue::new("tester".to_string(), ConfigSource::Default),
            config_file: None,
            sync: SyncConfig {
                server_url,
                api_key: Some("secret".to_string()),
                ..SyncConfig::default()
            },
        }
    }

    #[test]
    fn test_sync_type_filters() {
        assert!(SyncType::All.filters().is_empty());
        assert_eq!(
            SyncType::Accounts.filters()[0].type_name,
            AccountEntity::TYPE_NAME
        );
        assert_eq!(
            SyncType::Addresses.filters()[0].type_name,
            AddressEntity::TYPE_NAME
        );
        assert_eq!(SyncType::Addresses.name(), "Addresses");
    }

    #[test]
    fn test_direction_mapping() {
        assert_eq!(SyncDirection::from(Direction::Pull), SyncDirection::PullDown);
        assert_eq!(SyncDirection::from(Direction::Push), SyncDirection::PushUp);
        assert_eq!(SyncDirection::from(Direction::Both), SyncDirection::Both);
    }

    #[test]
    fn test_statistics_lines_skip_empty_types() {
        let mut statistics = SyncStatistics::new();
        statistics.types.insert(
            "replisync.Account".to_string(),
            TypeStatistics {
                added: 2,
                updated: 1,
                deleted: 0,
                skipped: 3,
            },
        );
        statistics
            .types
            .insert("replisync.Address".to_string(), TypeStatistics::default());

        assert_eq!(
            statistics_lines(&statistics),
            vec!["replisync.Account: 2 added, 1 updated, 0 deleted, 3 skipped".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unconfigured_sync_fails() {
        let temp_dir = tempdir().unwrap();
        let db = temp_dir.path().join("local.db");
        let pool = init_db(&db).await.unwrap();

        let err = run_sync(&pool, &config(None, db), SyncType::All, SyncDirection::Both)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncCommandError::SyncError(SyncError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_sync_round_trip_persists_watermarks() {
        let (url, server_repo, _server_dir) = serve().await;
        let account = server_repo
            .add(AccountEntity::new("From Server"))
            .await
            .unwrap();
        server_repo
            .add(AddressEntity::new(account.sync_id(), "1 Main St"))
            .await
            .unwrap();

        let temp_dir = tempdir().unwrap();
        let db = temp_dir.path().join("local.db");
        let pool = init_db(&db).await.unwrap();
        let local = SqliteRepository::new(pool.clone());
        local.add(AccountEntity::new("From Client")).await.unwrap();
        let config = config(Some(url), db);

        let results = run_sync(&pool, &config, SyncType::All, SyncDirection::Both)
            .await
            .unwrap();
        assert!(results.is_successful());
        assert!(results.issues.is_empty());

        assert_eq!(local.list_accounts(false).await.unwrap().len(), 2);
        assert_eq!(local.list_addresses(None, false).await.unwrap().len(), 1);
        assert_eq!(server_repo.list_accounts(false).await.unwrap().len(), 2);

        let mut stored = SyncOptions::default();
        SyncStateRepository::new(pool.clone())
            .load_into("All", &mut stored)
            .await
            .unwrap();
        assert!(stored.last_synced_on_server.is_some());
        assert!(stored.last_synced_on_client.is_some());

        // Nothing new on either side: the next run only re-checks the windows.
        let again = run_sync(&pool, &config, SyncType::All, SyncDirection::Both)
            .await
            .unwrap();
        assert!(again.is_successful());
        let changed: usize = again
            .statistics
            .types
            .values()
            .map(|s| s.added + s.updated + s.deleted)
            .sum();
        assert_eq!(changed, 0);
    }

    #[tokio::test]
    async fn test_pull_only_leaves_server_untouched() {
        let (url, server_repo, _server_dir) = serve().await;
        server_repo
            .add(AccountEntity::new("From Server"))
            .await
            .unwrap();

        let temp_dir = tempdir().unwrap();
        let db = temp_dir.path().join("local.db");
        let pool = init_db(&db).await.unwrap();
        let local = SqliteRepository::new(pool.clone());
        local.add(AccountEntity::new("Local Only")).await.unwrap();

        let results = run_sync(
            &pool,
            &config(Some(url), db),
            SyncType::Accounts,
            SyncDirection::PullDown,
        )
        .await
        .unwrap();
        assert!(results.is_successful());
        assert_eq!(local.list_accounts(false).await.unwrap().len(), 2);
        assert_eq!(server_repo.list_accounts(false).await.unwrap().len(), 1);
    }
}
