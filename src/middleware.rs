//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;
use crate::ServerError;
use crate::error::Result;

const BEARER: &str = "Bearer ";

/// Compare without stopping at the first differing byte.
fn same_token(given: &[u8], expected: &[u8]) -> bool {
    given.len() == expected.len()
        && given
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Middleware guarding administrative routes with the configured bearer
/// token.
///
/// Administrative routes answer `401` to everyone while no token is
/// configured.
pub async fn require_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err(ServerError::Unauthorized);
    };

    let given = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix(BEARER))
        .ok_or(ServerError::Unauthorized)?;

    if expected.is_empty() || !same_token(given.as_bytes(), expected.as_bytes()) {
        tracing::warn!(path = %req.uri().path(), "rejected administrative request");
        return Err(ServerError::Unauthorized);
    }

    Ok(next.run(req).await)
}
