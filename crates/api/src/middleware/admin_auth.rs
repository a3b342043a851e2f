//! Bearer-token guard for the admin API.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::app::AppState;
use crate::error::ApiError;

/// Requires `Authorization: Bearer <security.admin_token>`. With no token
/// configured every admin request is refused.
pub async fn require_admin(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let expected = state.config.security.admin_token.as_bytes();
    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if !expected.is_empty() && bool::from(token.as_bytes().ct_eq(expected)) => {
            next.run(req).await
        }
        Some(_) => {
            warn!(path = %req.uri().path(), "Admin request with invalid token");
            ApiError::Unauthorized("Invalid admin token".to_string()).into_response()
        }
        None => ApiError::Unauthorized("Admin token required".to_string()).into_response(),
    }
}
