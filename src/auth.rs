// Fighter authentication: API key generation, hashing, and the axum
// extractor gating the fighter API.
//
// Raw keys are shown once at registration; only the SHA-256 hash is stored.
// The rate limit check runs before the store lookup, keyed by the key hash,
// so garbage keys cannot be used to probe the fighters table unmetered.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::db::{Database, Fighter};
use crate::error::ArenaError;
use crate::rate_limit::{LimitKind, RateLimiter};

pub const API_KEY_PREFIX: &str = "arena_sk_";

/// Generate a fresh raw API key. The caller must hand it to the fighter and
/// store only the hash.
pub fn generate_api_key() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    format!("{API_KEY_PREFIX}{suffix}")
}

pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Authenticate a Bearer API key against the fighters table.
pub async fn authenticate(
    db: &Database,
    limiter: &RateLimiter,
    auth_header: Option<&str>,
) -> Result<Fighter, ArenaError> {
    let header = auth_header.ok_or(ArenaError::Unauthorized("Missing Authorization header"))?;
    let key = header
        .strip_prefix("Bearer ")
        .ok_or(ArenaError::Unauthorized("Invalid Authorization header format"))?;

    if !key.starts_with(API_KEY_PREFIX) {
        return Err(ArenaError::Unauthorized("Invalid API key"));
    }

    let key_hash = hash_api_key(key);
    limiter.check(LimitKind::ApiCall, &key_hash)?;

    db.get_fighter_by_key_hash(&key_hash)
        .await?
        .ok_or(ArenaError::Unauthorized("Invalid API key"))
}

/// Extracts the authenticated fighter from the Authorization header.
/// Usage: `AuthFighter(fighter)` in handler parameters. The database and
/// rate limiter ride in request extensions, injected by middleware.
#[derive(Debug, Clone)]
pub struct AuthFighter(pub Fighter);

impl<S> FromRequestParts<S> for AuthFighter
where
    S: Send + Sync,
{
    type Rejection = axum::response::Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(db) = parts.extensions.get::<Arc<Database>>().cloned() else {
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Internal server error"})),
            )
                .into_response());
        };
        let Some(limiter) = parts.extensions.get::<RateLimiter>().cloned() else {
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Internal server error"})),
            )
                .into_response());
        };

        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok());

        match authenticate(&db, &limiter, auth_header).await {
            Ok(fighter) => Ok(AuthFighter(fighter)),
            Err(e) => Err(e.into_response()),
        }
    }
}
