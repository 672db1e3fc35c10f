use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;

use replisync_core::Actor;

use super::config::ApiKeyEntry;
use super::AppState;

/// API key store - maps key -> Actor
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, Actor>,
}

impl ApiKeyStore {
    pub fn from_entries(entries: Vec<ApiKeyEntry>) -> Self {
        let keys: HashMap<String, Actor> = entries
            .into_iter()
            .map(|entry| {
                (
                    entry.key,
                    Actor {
                        id: entry.user_id,
                        roles: entry.roles,
                    },
                )
            })
            .collect();
        tracing::info!("Loaded {} API key(s)", keys.len());
        Self { keys }
    }

    /// Validate an API key and return the actor it authenticates
    pub fn validate(&self, key: &str) -> Option<Actor> {
        self.keys.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Serialize)]
struct AuthError {
    error: &'static str,
    message: &'static str,
}

fn unauthorized(error: &'static str, message: &'static str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(AuthError { error, message })).into_response()
}

/// Authentication middleware; inserts the authenticated [`Actor`] into the
/// request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) => match h.strip_prefix("Bearer ") {
            Some(key) => key,
            None => {
                return unauthorized(
                    "invalid_auth",
                    "Authorization header must use Bearer scheme",
                )
            }
        },
        None => return unauthorized("missing_auth", "Authorization header required"),
    };

    match state.api_keys.validate(api_key) {
        Some(actor) => {
            tracing::debug!("Authenticated {}", actor.id);
            request.extensions_mut().insert(actor);
            next.run(request).await
        }
        None => unauthorized("invalid_key", "Invalid API key"),
    }
}
