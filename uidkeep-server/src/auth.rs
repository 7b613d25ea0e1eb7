//! Admin key check for the mutating and query routes
//!
//! Every protected route must carry `?key=<admin key>`. The key is compared
//! in constant time against `UIDKEEP_ADMIN_KEY`. When `key` is repeated the
//! first occurrence wins.

use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::service::{ApiError, AppState};

const KEY_PARAM: &str = "key";

/// First value of the `key` query parameter
fn first_key(params: &[(String, String)]) -> Option<&str> {
    params
        .iter()
        .find(|(name, _)| name == KEY_PARAM)
        .map(|(_, value)| value.as_str())
}

/// Performs a constant-time comparison of two strings to prevent timing attacks.
/// Returns true if the strings are equal.
fn constant_time_compare(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    // The admin key length is not secret
    if a_bytes.len() != b_bytes.len() {
        return false;
    }

    a_bytes.ct_eq(b_bytes).into()
}

/// Middleware rejecting requests without the correct admin key
pub async fn require_admin_key(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match first_key(&params) {
        Some(provided) if constant_time_compare(provided, state.admin_key()) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            tracing::warn!("Invalid admin key for {}", request.uri().path());
            Err(ApiError::forbidden())
        }
        None => {
            tracing::warn!("Missing admin key for {}", request.uri().path());
            Err(ApiError::forbidden())
        }
    }
}
