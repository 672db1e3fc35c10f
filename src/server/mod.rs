//! HTTP surface of the sync server: bearer API-key auth in front of the six
//! protocol operations, plus an unauthenticated health check.

mod auth;
mod config;
mod handlers;

pub use auth::{auth_middleware, ApiKeyStore};
pub use config::{ApiKeyEntry, ServerConfig, ServerConfigFile};
pub use handlers::ApiError;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use replisync_core::sync::Operation;
use replisync_core::LocalSyncClient;

use crate::db::SqliteRepository;

const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api_keys: Arc<ApiKeyStore>,
    /// Participant acting as the server; rebound to each caller's actor.
    pub sync: Arc<LocalSyncClient<SqliteRepository>>,
}

pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route("/health", get(handlers::health));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(&Operation::BeginSync.route(), post(handlers::begin_sync))
        .route(&Operation::GetChanges.route(), post(handlers::get_changes))
        .route(&Operation::ApplyChanges.route(), post(handlers::apply_changes))
        .route(&Operation::GetCorrections.route(), post(handlers::get_corrections))
        .route(
            &Operation::ApplyCorrections.route(),
            post(handlers::apply_corrections),
        )
        .route(&Operation::EndSync.route(), post(handlers::end_sync))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
