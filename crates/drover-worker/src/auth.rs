//! Bearer authentication with the worker token.
//!
//! Every request except the health probe carries
//! `Authorization: Bearer <worker_token>`; comparison is constant-time.

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::error::WorkerError;
use crate::server::WorkerState;

/// Extract the bearer value from an Authorization header.
pub fn bearer(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Constant-time token comparison.
pub fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

pub async fn require_worker_token(
    axum::extract::State(state): axum::extract::State<WorkerState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, WorkerError> {
    let presented = bearer(&request).ok_or(WorkerError::Unauthorized)?;
    if !token_matches(presented, &state.token) {
        return Err(WorkerError::Unauthorized);
    }
    Ok(next.run(request).await)
}
