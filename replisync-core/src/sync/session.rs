//! Server-side session bookkeeping.
//!
//! Sessions are keyed by `(owner_id, session_id)`. A session is held by at
//! most one request at a time: a second request for a busy key fails with
//! `SessionConflict` instead of queueing behind the first.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::error::SyncError;
use crate::converter::Actor;
use crate::model::{SyncRepositoryFilter, SyncSession, SyncStatistics};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub owner_id: String,
    pub session_id: Uuid,
}

impl SessionKey {
    pub fn new(owner_id: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            owner_id: owner_id.into(),
            session_id,
        }
    }
}

/// State kept for one active session.
#[derive(Debug)]
pub struct SessionState {
    pub session: SyncSession,
    /// Filters resolved against the registry, in dependency order.
    pub filters: Vec<SyncRepositoryFilter>,
    pub actor: Actor,
    pub statistics: SyncStatistics,
}

/// Concurrent map of active sessions. Owned by whoever hosts the protocol;
/// there is no process-wide instance.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, Arc<Mutex<SessionState>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session. Fails if the key is already active.
    pub async fn begin(&self, key: SessionKey, state: SessionState) -> Result<(), SyncError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&key) {
            return Err(SyncError::SessionConflict(key.session_id));
        }
        sessions.insert(key, Arc::new(Mutex::new(state)));
        Ok(())
    }

    /// Takes exclusive hold of a session for the duration of one operation.
    pub async fn acquire(&self, key: &SessionKey) -> Result<OwnedMutexGuard<SessionState>, SyncError> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions
                .get(key)
                .cloned()
                .ok_or(SyncError::SessionNotFound(key.session_id))?
        };
        session
            .try_lock_owned()
            .map_err(|_| SyncError::SessionConflict(key.session_id))
    }

    /// Releases a session and hands back its final state.
    ///
    /// Returns `Ok(None)` when the session is already gone.
    pub async fn end(&self, key: &SessionKey) -> Result<Option<SessionState>, SyncError> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get(key).cloned() else {
            return Ok(None);
        };
        let mut guard = session
            .try_lock_owned()
            .map_err(|_| SyncError::SessionConflict(key.session_id))?;
        sessions.remove(key);

        Ok(Some(SessionState {
            session: guard.session.clone(),
            filters: std::mem::take(&mut guard.filters),
            actor: guard.actor.clone(),
            statistics: std::mem::take(&mut guard.statistics),
        }))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncOptions;
    use chrono::Utc;

    fn state(session_id: Uuid) -> SessionState {
        SessionState {
            session: SyncSession {
                session_id,
                started_on: Utc::now(),
                options: SyncOptions::default(),
            },
            filters: Vec::new(),
            actor: Actor::new("john"),
            statistics: SyncStatistics::new(),
        }
    }

    #[tokio::test]
    async fn test_begin_twice_conflicts() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();
        let key = SessionKey::new("john", id);

        store.begin(key.clone(), state(id)).await.unwrap();
        let result = store.begin(key, state(id)).await;
        assert!(matches!(result, Err(SyncError::SessionConflict(_))));
    }

    #[tokio::test]
    async fn test_same_session_id_different_owner() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();

        store.begin(SessionKey::new("john", id), state(id)).await.unwrap();
        store.begin(SessionKey::new("jane", id), state(id)).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_acquire_busy_session_fails_fast() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();
        let key = SessionKey::new("john", id);
        store.begin(key.clone(), state(id)).await.unwrap();

        let _held = store.acquire(&key).await.unwrap();
        assert!(matches!(
            store.acquire(&key).await,
            Err(SyncError::SessionConflict(_))
        ));
        assert!(matches!(
            store.end(&key).await,
            Err(SyncError::SessionConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_acquire_unknown_session() {
        let store = SessionStore::new();
        let key = SessionKey::new("john", Uuid::new_v4());
        assert!(matches!(
            store.acquire(&key).await,
            Err(SyncError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();
        let key = SessionKey::new("john", id);
        store.begin(key.clone(), state(id)).await.unwrap();

        assert!(store.end(&key).await.unwrap().is_some());
        assert!(store.end(&key).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }
}
