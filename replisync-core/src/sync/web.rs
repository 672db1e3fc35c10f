//! HTTP sync client for talking to a Replisync server.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::client::SyncClient;
use super::error::SyncError;
use super::protocol::{ErrorResponse, Operation, PROTOCOL_VERSION_KEY};
use crate::model::{
    SyncBatch, SyncIssue, SyncObject, SyncOptions, SyncRequest, SyncSession, SyncStatistics,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// [`SyncClient`] that forwards every operation to a remote server.
#[derive(Debug, Clone)]
pub struct WebSyncClient {
    server_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl WebSyncClient {
    /// Creates a new web client with explicit parameters.
    pub fn new(server_url: String, api_key: String) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::HttpError(e.to_string()))?;
        Ok(Self {
            server_url,
            api_key,
            http,
        })
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn post<B, T>(&self, operation: Operation, session_id: Uuid, body: &B) -> Result<T, SyncError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = operation.url(&self.server_url, session_id);
        tracing::debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| SyncError::HttpError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| SyncError::HttpError(e.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        Err(error_from_response(status.as_u16(), &text, session_id))
    }
}

/// Maps a failed response back onto the error the server raised.
fn error_from_response(status: u16, body: &str, session_id: Uuid) -> SyncError {
    let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().map(|r| r.error.clone()).unwrap_or_default();

    match (status, code.as_str()) {
        (404, "session_not_found") => SyncError::SessionNotFound(session_id),
        (409, _) => SyncError::SessionConflict(session_id),
        (400, "incompatible_version") => {
            let (min, max) = parsed
                .as_ref()
                .and_then(|r| r.supported)
                .unwrap_or((0, 0));
            SyncError::IncompatibleVersion {
                requested: None,
                min,
                max,
            }
        }
        (400, "invalid_options") => SyncError::InvalidOptions(
            parsed.map(|r| r.message).unwrap_or_default(),
        ),
        _ => SyncError::ServerError {
            status,
            message: parsed.map(|r| r.message).unwrap_or_else(|| body.to_string()),
        },
    }
}

#[async_trait]
impl SyncClient for WebSyncClient {
    fn name(&self) -> &str {
        &self.server_url
    }

    async fn begin_sync(&self, session_id: Uuid, options: SyncOptions) -> Result<SyncSession, SyncError> {
        let requested = options.values.get(PROTOCOL_VERSION_KEY).cloned();
        self.post(Operation::BeginSync, session_id, &options)
            .await
            .map_err(|e| match e {
                SyncError::IncompatibleVersion { min, max, .. } => SyncError::IncompatibleVersion {
                    requested,
                    min,
                    max,
                },
                other => other,
            })
    }

    async fn get_changes(&self, session_id: Uuid, request: SyncRequest) -> Result<SyncBatch, SyncError> {
        self.post(Operation::GetChanges, session_id, &request).await
    }

    async fn apply_changes(
        &self,
        session_id: Uuid,
        objects: Vec<SyncObject>,
    ) -> Result<Vec<SyncIssue>, SyncError> {
        self.post(Operation::ApplyChanges, session_id, &objects).await
    }

    async fn get_corrections(
        &self,
        session_id: Uuid,
        issues: Vec<SyncIssue>,
    ) -> Result<Vec<SyncObject>, SyncError> {
        self.post(Operation::GetCorrections, session_id, &issues).await
    }

    async fn apply_corrections(
        &self,
        session_id: Uuid,
        objects: Vec<SyncObject>,
    ) -> Result<Vec<SyncIssue>, SyncError> {
        self.post(Operation::ApplyCorrections, session_id, &objects)
            .await
    }

    async fn end_sync(&self, session_id: Uuid) -> Result<SyncStatistics, SyncError> {
        self.post(Operation::EndSync, session_id, &()).await
    }
}

/// Checks whether the sync server answers its health endpoint.
pub async fn check_server(server_url: &str) -> Result<(), SyncError> {
    let url = format!("{}/health", server_url.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| SyncError::HttpError(e.to_string()))?;

    if !response.status().is_success() {
        return Err(SyncError::HttpError(format!(
            "Server returned status {}",
            response.status()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_session_errors() {
        let id = Uuid::new_v4();
        let body = serde_json::to_string(&ErrorResponse::new("session_not_found", "gone")).unwrap();
        assert!(matches!(
            error_from_response(404, &body, id),
            SyncError::SessionNotFound(s) if s == id
        ));

        let body = serde_json::to_string(&ErrorResponse::new("session_conflict", "busy")).unwrap();
        assert!(matches!(
            error_from_response(409, &body, id),
            SyncError::SessionConflict(_)
        ));
    }

    #[test]
    fn test_maps_incompatible_version() {
        let err = SyncError::IncompatibleVersion {
            requested: None,
            min: 2,
            max: 3,
        };
        let body = serde_json::to_string(&ErrorResponse::from(&err)).unwrap();
        match error_from_response(400, &body, Uuid::nil()) {
            SyncError::IncompatibleVersion { min, max, .. } => assert_eq!((min, max), (2, 3)),
            other => panic!("Expected incompatible version, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_errors_keep_status() {
        match error_from_response(502, "Bad Gateway", Uuid::nil()) {
            SyncError::ServerError { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("Expected server error, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_404_is_not_a_session_error() {
        assert!(matches!(
            error_from_response(404, "not found", Uuid::nil()),
            SyncError::ServerError { status: 404, .. }
        ));
    }

    #[test]
    fn test_new_client_keeps_url() {
        let client =
            WebSyncClient::new("http://localhost:8080".to_string(), "key".to_string()).unwrap();
        assert_eq!(client.server_url(), "http://localhost:8080");
        assert_eq!(client.name(), "http://localhost:8080");
    }
}
