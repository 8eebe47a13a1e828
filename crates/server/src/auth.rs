//! `X-API-Key` check for the index and query routes

use crate::rest_server::{ApiError, AppState};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use fleetindex_core::{AuthFailure, Error};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Rejects requests without a key (401) or with an unknown key (403)
pub(crate) async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.require_auth {
        return Ok(next.run(request).await);
    }

    let key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    match key {
        None => Err(Error::Auth(AuthFailure::Missing).into()),
        Some(key) if state.api_keys.iter().any(|k| k == key) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!("Rejected request with an unknown API key");
            Err(Error::Auth(AuthFailure::Invalid).into())
        }
    }
}
