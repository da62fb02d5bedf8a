//! Operator bearer authentication.
//!
//! Presented tokens are SHA-256 hashed and looked up in the token table;
//! plaintext is never persisted. The first operator token can be seeded
//! from the environment exactly once.

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};

use drover_store::Store;

use crate::error::{ApiError, Result};
use crate::state::ApiState;

/// SHA-256 hex digest of a token
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Whether a presented bearer token is a known operator token.
pub fn token_valid(store: &Store, token: &str) -> bool {
    store.token_exists(&hash_token(token)).unwrap_or(false)
}

/// Seed the first operator token from the environment, once.
pub fn seed_operator_token(store: &Store, seed: Option<&str>) -> Result<bool> {
    let Some(seed) = seed else {
        return Ok(false);
    };
    if store.has_tokens()? {
        return Ok(false);
    }
    store.insert_token(&hash_token(seed), Some("seeded"))?;
    tracing::info!("operator token seeded");
    Ok(true)
}

pub async fn require_operator_token(
    axum::extract::State(state): axum::extract::State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response> {
    let presented = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    if !token_valid(&state.store, presented) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_hex() {
        let hash = hash_token("tok-123");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("tok-123"));
        assert_ne!(hash, hash_token("tok-124"));
    }

    #[test]
    fn seed_inserts_once() {
        let store = Store::open_in_memory().unwrap();
        assert!(seed_operator_token(&store, Some("first")).unwrap());
        assert!(token_valid(&store, "first"));

        // a second seed attempt is ignored
        assert!(!seed_operator_token(&store, Some("second")).unwrap());
        assert!(!token_valid(&store, "second"));
    }

    #[test]
    fn seed_without_env_is_noop() {
        let store = Store::open_in_memory().unwrap();
        assert!(!seed_operator_token(&store, None).unwrap());
        assert!(!store.has_tokens().unwrap());
    }
}
