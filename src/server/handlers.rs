use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use uuid::Uuid;

use replisync_core::sync::ErrorResponse;
use replisync_core::{
    Actor, SyncBatch, SyncClient, SyncError, SyncIssue, SyncObject, SyncOptions, SyncRequest,
    SyncSession, SyncStatistics,
};

use super::AppState;

/// A protocol failure rendered as `{error, message}` JSON.
pub struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            SyncError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            SyncError::SessionConflict(_) => StatusCode::CONFLICT,
            SyncError::IncompatibleVersion { .. } | SyncError::InvalidOptions(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Sync operation failed: {}", self.0);
        } else {
            tracing::debug!("Sync operation rejected: {}", self.0);
        }
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn begin_sync(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(session_id): Path<Uuid>,
    Json(options): Json<SyncOptions>,
) -> ApiResult<SyncSession> {
    tracing::info!("Begin sync {} for {}", session_id, actor.id);
    let session = state
        .sync
        .for_actor(actor)
        .begin_sync(session_id, options)
        .await?;
    Ok(Json(session))
}

pub async fn get_changes(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SyncRequest>,
) -> ApiResult<SyncBatch> {
    let batch = state
        .sync
        .for_actor(actor)
        .get_changes(session_id, request)
        .await?;
    Ok(Json(batch))
}

pub async fn apply_changes(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(session_id): Path<Uuid>,
    Json(objects): Json<Vec<SyncObject>>,
) -> ApiResult<Vec<SyncIssue>> {
    let issues = state
        .sync
        .for_actor(actor)
        .apply_changes(session_id, objects)
        .await?;
    Ok(Json(issues))
}

pub async fn get_corrections(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(session_id): Path<Uuid>,
    Json(issues): Json<Vec<SyncIssue>>,
) -> ApiResult<Vec<SyncObject>> {
    let corrections = state
        .sync
        .for_actor(actor)
        .get_corrections(session_id, issues)
        .await?;
    Ok(Json(corrections))
}

pub async fn apply_corrections(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(session_id): Path<Uuid>,
    Json(objects): Json<Vec<SyncObject>>,
) -> ApiResult<Vec<SyncIssue>> {
    let issues = state
        .sync
        .for_actor(actor)
        .apply_corrections(session_id, objects)
        .await?;
    Ok(Json(issues))
}

/// Ends a session. Ending an unknown session is not an error.
pub async fn end_sync(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<SyncStatistics> {
    tracing::info!("End sync {} for {}", session_id, actor.id);
    let statistics = state.sync.for_actor(actor).end_sync(session_id).await?;
    Ok(Json(statistics))
}
