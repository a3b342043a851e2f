//! Request gate for the public API.
//!
//! Runs, in order: key presence, key verification, client status, IP
//! allowlist, rate limit. Scope checks happen in handlers through
//! [`AuthenticatedClient::require_scope`] once the client is known.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use domain::models::api_client::{ClientIdentityResponse, RateLimitTier};
use domain::services::access::{has_any_scope, has_scope, is_ip_allowed};
use persistence::entities::ApiClientEntity;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::rate_limit::RateDecision;
use crate::app::AppState;
use crate::error::ErrorBody;
use crate::services::{KeyRejection, KeyValidation};

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Why the gate turned a request away.
#[derive(Debug, Clone, Error)]
pub enum GateRejection {
    #[error("API key required")]
    MissingKey,

    #[error("Invalid API key")]
    InvalidKey,

    #[error("API client is not active")]
    InactiveClient,

    #[error("Request IP is not in the client allowlist")]
    IpNotAllowed,

    #[error("Rate limit exceeded")]
    RateLimited(RateDecision),

    #[error("Missing required scope: {0}")]
    InsufficientScope(String),
}

impl GateRejection {
    pub fn code(&self) -> &'static str {
        match self {
            GateRejection::MissingKey => "API_KEY_MISSING",
            GateRejection::InvalidKey => "API_KEY_INVALID",
            GateRejection::InactiveClient => "API_KEY_INACTIVE",
            GateRejection::IpNotAllowed => "IP_NOT_ALLOWED",
            GateRejection::RateLimited(_) => "RATE_LIMIT_EXCEEDED",
            GateRejection::InsufficientScope(_) => "INSUFFICIENT_SCOPE",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GateRejection::MissingKey
            | GateRejection::InvalidKey
            | GateRejection::InactiveClient => StatusCode::UNAUTHORIZED,
            GateRejection::IpNotAllowed | GateRejection::InsufficientScope(_) => {
                StatusCode::FORBIDDEN
            }
            GateRejection::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        let code = self.code();
        metrics::counter!("api_gate_rejections_total", "code" => code).increment(1);

        let body = ErrorBody {
            error: code,
            message: self.to_string(),
            details: None,
        };
        let mut response = (self.status(), Json(body)).into_response();

        if let GateRejection::RateLimited(decision) = &self {
            let headers = response.headers_mut();
            apply_rate_headers(headers, decision);
            headers.insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from(decision.retry_after_secs),
            );
        }
        response
    }
}

/// The caller, as established by the gate.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    pub client_id: Uuid,
    pub organisation_id: Uuid,
    pub name: String,
    pub scopes: Vec<String>,
    pub rate_limit_tier: RateLimitTier,
    pub ip: Option<IpAddr>,
}

impl AuthenticatedClient {
    fn from_entity(client: &ApiClientEntity, ip: Option<IpAddr>) -> Self {
        Self {
            client_id: client.id,
            organisation_id: client.organisation_id,
            name: client.name.clone(),
            scopes: client.scopes.clone(),
            rate_limit_tier: client.rate_limit_tier(),
            ip,
        }
    }

    pub fn require_scope(&self, scope: &str) -> Result<(), GateRejection> {
        if has_scope(&self.scopes, scope) {
            Ok(())
        } else {
            Err(GateRejection::InsufficientScope(scope.to_string()))
        }
    }

    pub fn require_any_scope(&self, scopes: &[&str]) -> Result<(), GateRejection> {
        if has_any_scope(&self.scopes, scopes) {
            Ok(())
        } else {
            Err(GateRejection::InsufficientScope(scopes.join(" or ")))
        }
    }

    pub fn identity(&self) -> ClientIdentityResponse {
        ClientIdentityResponse {
            client_id: self.client_id,
            organisation_id: self.organisation_id,
            name: self.name.clone(),
            scopes: self.scopes.clone(),
            rate_limit_tier: self.rate_limit_tier,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedClient
where
    S: Send + Sync,
{
    type Rejection = GateRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedClient>()
            .cloned()
            .ok_or(GateRejection::MissingKey)
    }
}

/// Middleware guarding every public route.
pub async fn api_gate(State(state): State<AppState>, mut req: Request<Body>, next: Next) -> Response {
    let raw_key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string);

    let Some(raw_key) = raw_key else {
        return GateRejection::MissingKey.into_response();
    };

    let client = match state.api_clients.validate_api_key(&raw_key).await {
        Ok(KeyValidation::Valid(client)) => client,
        Ok(KeyValidation::Rejected(reason)) => {
            debug!(reason = reason.as_str(), "API key rejected");
            return match reason {
                KeyRejection::NotFound | KeyRejection::KeyMismatch => GateRejection::InvalidKey,
                KeyRejection::Suspended | KeyRejection::Revoked => GateRejection::InactiveClient,
            }
            .into_response();
        }
        Err(e) => return e.into_response(),
    };

    let ip = client_ip(&req, state.config.security.trust_forwarded_for);
    if !client.ip_allowlist.is_empty() {
        let allowed = ip.is_some_and(|ip| is_ip_allowed(&client.ip_allowlist, ip));
        if !allowed {
            warn!(
                client_id = %client.id,
                ip = ?ip,
                "Request from IP outside client allowlist"
            );
            return GateRejection::IpNotAllowed.into_response();
        }
    }

    let limit = state.config.rate_limits.limit_for(client.rate_limit_tier());
    let decision = state.rate_limiter.check(client.id, limit);
    if !decision.allowed {
        debug!(client_id = %client.id, limit = limit, "Rate limit exceeded");
        return GateRejection::RateLimited(decision).into_response();
    }

    state.api_clients.record_usage(client.id, ip);
    req.extensions_mut()
        .insert(AuthenticatedClient::from_entity(&client, ip));

    let mut response = next.run(req).await;
    apply_rate_headers(response.headers_mut(), &decision);
    response
}

/// First `X-Forwarded-For` hop when trusted, else the socket peer.
fn client_ip(req: &Request<Body>, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn apply_rate_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset_at.timestamp()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn client(scopes: &[&str]) -> AuthenticatedClient {
        AuthenticatedClient {
            client_id: Uuid::new_v4(),
            organisation_id: Uuid::new_v4(),
            name: "Reporting".to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            rate_limit_tier: RateLimitTier::Standard,
            ip: None,
        }
    }

    #[test]
    fn test_rejection_statuses() {
        assert_eq!(GateRejection::MissingKey.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GateRejection::InactiveClient.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GateRejection::IpNotAllowed.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            GateRejection::InsufficientScope("actions:read".into()).code(),
            "INSUFFICIENT_SCOPE"
        );
    }

    #[test]
    fn test_rate_limited_response_headers() {
        let decision = RateDecision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_at: Utc::now(),
            retry_after_secs: 42,
        };
        let response = GateRejection::RateLimited(decision).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "42");
        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    }

    #[test]
    fn test_scope_checks() {
        let client = client(&["incidents:read"]);
        assert!(client.require_scope("incidents:read").is_ok());
        assert!(matches!(
            client.require_scope("actions:read"),
            Err(GateRejection::InsufficientScope(scope)) if scope == "actions:read"
        ));
        assert!(client
            .require_any_scope(&["actions:read", "incidents:read"])
            .is_ok());
    }

    #[test]
    fn test_client_ip_prefers_trusted_forwarded_for() {
        let mut req = Request::builder()
            .header(FORWARDED_FOR_HEADER, "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

        assert_eq!(
            client_ip(&req, true),
            Some("203.0.113.7".parse().unwrap())
        );
        assert_eq!(client_ip(&req, false), Some("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_client_ip_missing() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req, true), None);
    }
}
