//! API client domain models.
//!
//! Request/response DTOs for managing external API clients and the
//! status/tier enums shared with persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::pagination::{PageRequest, Pagination};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Scopes an API client may be granted.
pub const SUPPORTED_SCOPES: &[&str] = &[
    "incidents:read",
    "incidents:write",
    "actions:read",
    "actions:write",
    "inspections:read",
    "training:read",
    "risks:read",
    "chemicals:read",
    "users:read",
    "events:read",
    "events:write",
];

/// Returns true if `scope` is in the scope catalogue.
pub fn is_supported_scope(scope: &str) -> bool {
    SUPPORTED_SCOPES.contains(&scope)
}

/// Lifecycle status of an API client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Active,
    Suspended,
    /// Terminal. Set by delete; never reactivated.
    Revoked,
}

impl ClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Active => "active",
            ClientStatus::Suspended => "suspended",
            ClientStatus::Revoked => "revoked",
        }
    }

    /// Whether a move from `self` to `next` is permitted.
    pub fn can_transition_to(&self, next: ClientStatus) -> bool {
        !matches!(self, ClientStatus::Revoked) && *self != next
    }
}

impl FromStr for ClientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ClientStatus::Active),
            "suspended" => Ok(ClientStatus::Suspended),
            "revoked" => Ok(ClientStatus::Revoked),
            _ => Err(format!("Unknown client status: {}", s)),
        }
    }
}

impl std::fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named request-rate bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitTier {
    #[default]
    Standard,
    Elevated,
    Premium,
    Enterprise,
}

impl RateLimitTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitTier::Standard => "standard",
            RateLimitTier::Elevated => "elevated",
            RateLimitTier::Premium => "premium",
            RateLimitTier::Enterprise => "enterprise",
        }
    }
}

impl FromStr for RateLimitTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(RateLimitTier::Standard),
            "elevated" => Ok(RateLimitTier::Elevated),
            "premium" => Ok(RateLimitTier::Premium),
            "enterprise" => Ok(RateLimitTier::Enterprise),
            _ => Err(format!("Unknown rate limit tier: {}", s)),
        }
    }
}

impl std::fmt::Display for RateLimitTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn check_scopes(scopes: &[String]) -> Result<(), String> {
    match scopes.iter().find(|s| !is_supported_scope(s)) {
        Some(unknown) => Err(format!("Unsupported scope: {}", unknown)),
        None => Ok(()),
    }
}

fn check_ip_allowlist(entries: &[String]) -> Result<(), String> {
    shared::validation::validate_ip_allowlist(entries).map_err(|e| {
        e.message
            .map(|m| m.to_string())
            .unwrap_or_else(|| "Invalid IP allowlist entry".to_string())
    })
}

/// Request to create an API client.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApiClientRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,

    #[validate(length(min = 1, message = "At least one scope is required"))]
    pub scopes: Vec<String>,

    #[serde(default)]
    #[validate(length(max = 50, message = "At most 50 allowlist entries"))]
    pub ip_allowlist: Vec<String>,

    #[serde(default)]
    pub rate_limit_tier: RateLimitTier,
}

impl CreateApiClientRequest {
    /// Validates every scope against the catalogue.
    pub fn validate_scopes(&self) -> Result<(), String> {
        check_scopes(&self.scopes)
    }

    /// Validates that every allowlist entry is an IP or CIDR block.
    pub fn validate_ip_allowlist(&self) -> Result<(), String> {
        check_ip_allowlist(&self.ip_allowlist)
    }
}

/// Request to update an API client. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateApiClientRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,

    #[validate(length(min = 1, message = "At least one scope is required"))]
    pub scopes: Option<Vec<String>>,

    #[validate(length(max = 50, message = "At most 50 allowlist entries"))]
    pub ip_allowlist: Option<Vec<String>>,

    pub rate_limit_tier: Option<RateLimitTier>,
}

impl UpdateApiClientRequest {
    pub fn has_updates(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.scopes.is_some()
            || self.ip_allowlist.is_some()
            || self.rate_limit_tier.is_some()
    }

    pub fn validate_scopes(&self) -> Result<(), String> {
        self.scopes.as_deref().map_or(Ok(()), check_scopes)
    }

    pub fn validate_ip_allowlist(&self) -> Result<(), String> {
        self.ip_allowlist.as_deref().map_or(Ok(()), check_ip_allowlist)
    }
}

/// API client as returned by the admin API. Never carries key material
/// beyond the prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiClientResponse {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub key_prefix: String,
    pub scopes: Vec<String>,
    pub ip_allowlist: Vec<String>,
    pub rate_limit_tier: RateLimitTier,
    pub status: ClientStatus,
    pub request_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Response when creating a client (includes the full key, shown only once).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApiClientResponse {
    #[serde(flatten)]
    pub client: ApiClientResponse,

    /// The full API key. Store it securely; it cannot be retrieved again.
    pub api_key: String,
}

/// Response when regenerating a client key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerateKeyResponse {
    pub id: Uuid,
    pub api_key: String,
    pub key_prefix: String,
}

/// Query parameters for listing API clients.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListApiClientsQuery {
    pub status: Option<ClientStatus>,
    pub scope: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListApiClientsQuery {
    pub fn page_request(&self) -> PageRequest {
        let defaults = PageRequest::default();
        PageRequest::new(
            self.page.unwrap_or(defaults.page),
            self.per_page.unwrap_or(defaults.per_page),
        )
    }
}

/// Filter applied when listing API clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiClientFilter {
    pub status: Option<ClientStatus>,
    pub scope: Option<String>,
}

impl From<&ListApiClientsQuery> for ApiClientFilter {
    fn from(query: &ListApiClientsQuery) -> Self {
        Self {
            status: query.status,
            scope: query.scope.clone(),
        }
    }
}

/// Response for listing API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListApiClientsResponse {
    pub api_clients: Vec<ApiClientResponse>,
    pub pagination: Pagination,
}

/// Usage statistics for one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiClientStatsResponse {
    pub id: Uuid,
    pub status: ClientStatus,
    pub request_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Authenticated client description returned by `GET /api/public/v1/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIdentityResponse {
    pub client_id: Uuid,
    pub organisation_id: Uuid,
    pub name: String,
    pub scopes: Vec<String>,
    pub rate_limit_tier: RateLimitTier,
}
