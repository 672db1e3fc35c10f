//! Sync error types.

use thiserror::Error;
use uuid::Uuid;

use crate::repository::RepositoryError;

/// Errors surfaced at a protocol operation boundary or by a failed run.
///
/// Per-item problems are never errors; they travel as
/// [`SyncIssue`](crate::model::SyncIssue) values.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Sync session {0} is already in use")]
    SessionConflict(Uuid),

    #[error("Incompatible protocol version {requested:?}; supported versions are {min} to {max}")]
    IncompatibleVersion {
        requested: Option<String>,
        min: u32,
        max: u32,
    },

    #[error("Invalid sync options: {0}")]
    InvalidOptions(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sync not configured. Add server_url to config.")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Server returned status {status}: {message}")]
    ServerError { status: u16, message: String },
}

impl SyncError {
    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::SessionNotFound(_) => "session_not_found",
            SyncError::SessionConflict(_) => "session_conflict",
            SyncError::IncompatibleVersion { .. } => "incompatible_version",
            SyncError::InvalidOptions(_) => "invalid_options",
            SyncError::Repository(_) => "repository_error",
            SyncError::Serialization(_) => "serialization_error",
            SyncError::NotConfigured => "not_configured",
            SyncError::HttpError(_) => "http_error",
            SyncError::ServerError { .. } => "server_error",
        }
    }

    /// Session errors abort only the operation that raised them.
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            SyncError::SessionNotFound(_)
                | SyncError::SessionConflict(_)
                | SyncError::IncompatibleVersion { .. }
        )
    }
}
