//! Replisync Sync Server
//!
//! Authoritative side of the sync protocol, backed by SQLite.
//!
//! # Configuration
//!
//! Environment variables:
//! - `REPLISYNC_PORT`: Port to listen on (default: 8080)
//! - `REPLISYNC_DATA_DIR`: Directory holding the database (default: ~/.local/share/replisync-server)
//! - `REPLISYNC_CONFIG`: Path to config file (default: ~/.config/replisync-server/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     user_id: "john"
//!     roles: ["Administrator"]
//! max_items_per_request: 300
//! tombstone_retention_days: 90
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `POST /api/sync/{operation}/{session_id}`: Sync protocol operations (auth required)

use chrono::{Duration, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use replisync::db::{init_db, SqliteRepository};
use replisync::server::{router, ApiKeyStore, AppState, ServerConfig, ServerConfigFile};
use replisync_core::{
    default_registry, Actor, LocalSyncClient, SyncClientSettings, TombstoneStore,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "replisync=info,replisync_server=info,replisync_core=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("Server failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env();

    std::fs::create_dir_all(&config.data_dir)?;
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Config file: {}", config.config_path.display());

    let file = ServerConfigFile::load(&config.config_path);
    let api_keys = Arc::new(ApiKeyStore::from_entries(file.api_keys));

    let pool = init_db(&config.database_path()).await?;
    let repository = Arc::new(SqliteRepository::authoritative(pool));

    if let Some(days) = file.tombstone_retention_days {
        let purged = repository
            .purge_tombstones(Utc::now() - Duration::days(days))
            .await?;
        tracing::info!("Purged {} tombstone(s) older than {} days", purged, days);
    }

    let mut settings = SyncClientSettings::authoritative();
    if let Some(max_items) = file.max_items_per_request {
        settings = settings.with_max_items(max_items);
    }

    let sync = LocalSyncClient::new(
        "replisync-server",
        repository,
        Arc::new(default_registry()),
        settings,
        Actor::new("replisync-server"),
    );

    let state = AppState {
        api_keys,
        sync: Arc::new(sync),
    };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
