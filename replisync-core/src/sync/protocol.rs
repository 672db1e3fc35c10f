//! Protocol constants, the version handshake and endpoint layout.
//!
//! The version travels in `SyncOptions::values` under
//! [`PROTOCOL_VERSION_KEY`] and is checked by `BeginSync`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::SyncError;
use crate::model::SyncOptions;

pub const PROTOCOL_VERSION_KEY: &str = "ProtocolVersion";

/// Version spoken by this build.
pub const PROTOCOL_VERSION: u32 = 1;

/// Oldest version this build still accepts.
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Returns options stamped with this build's protocol version.
pub fn with_protocol_version(options: SyncOptions) -> SyncOptions {
    options.with_value(PROTOCOL_VERSION_KEY, PROTOCOL_VERSION.to_string())
}

/// Checks the requested protocol version against `[min, max]`.
pub fn check_version(options: &SyncOptions, min: u32, max: u32) -> Result<u32, SyncError> {
    let requested = options.values.get(PROTOCOL_VERSION_KEY);
    let incompatible = || SyncError::IncompatibleVersion {
        requested: requested.cloned(),
        min,
        max,
    };

    let version: u32 = requested
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(incompatible)?;

    if version < min || version > max {
        return Err(incompatible());
    }
    Ok(version)
}

/// The six protocol operations as exposed over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    BeginSync,
    GetChanges,
    ApplyChanges,
    GetCorrections,
    ApplyCorrections,
    EndSync,
}

impl Operation {
    pub fn path_segment(self) -> &'static str {
        match self {
            Operation::BeginSync => "begin",
            Operation::GetChanges => "changes",
            Operation::ApplyChanges => "apply",
            Operation::GetCorrections => "corrections",
            Operation::ApplyCorrections => "applycorrections",
            Operation::EndSync => "end",
        }
    }

    /// Route template used by the server, e.g. `/api/sync/begin/{session_id}`.
    pub fn route(self) -> String {
        format!("/api/sync/{}/{{session_id}}", self.path_segment())
    }

    /// Concrete URL for a session against `base_url`.
    pub fn url(self, base_url: &str, session_id: Uuid) -> String {
        format!(
            "{}/api/sync/{}/{}",
            base_url.trim_end_matches('/'),
            self.path_segment(),
            session_id
        )
    }
}

/// Error body returned by the server for failed operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Supported version range, set for `incompatible_version`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported: Option<(u32, u32)>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            supported: None,
        }
    }
}

impl From<&SyncError> for ErrorResponse {
    fn from(err: &SyncError) -> Self {
        let mut response = ErrorResponse::new(err.code(), err.to_string());
        if let SyncError::IncompatibleVersion { min, max, .. } = err {
            response.supported = Some((*min, *max));
        }
        response
    }
}
