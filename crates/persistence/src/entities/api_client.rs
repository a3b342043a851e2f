//! API client entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::api_client::{
    ApiClientResponse, ApiClientStatsResponse, ClientIdentityResponse, ClientStatus,
    RateLimitTier,
};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the api_clients table.
#[derive(Debug, Clone, FromRow)]
pub struct ApiClientEntity {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub key_prefix: String,
    pub key_hash: String,
    pub scopes: Vec<String>,
    pub ip_allowlist: Vec<String>,
    pub rate_limit_tier: String,
    pub status: String,
    pub request_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ApiClientEntity {
    /// Parsed status. Unknown values are treated as suspended.
    pub fn status(&self) -> ClientStatus {
        self.status.parse().unwrap_or(ClientStatus::Suspended)
    }

    /// Parsed tier. Unknown values fall back to the lowest tier.
    pub fn rate_limit_tier(&self) -> RateLimitTier {
        self.rate_limit_tier.parse().unwrap_or_default()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl From<ApiClientEntity> for ApiClientResponse {
    fn from(entity: ApiClientEntity) -> Self {
        Self {
            status: entity.status(),
            rate_limit_tier: entity.rate_limit_tier(),
            id: entity.id,
            organisation_id: entity.organisation_id,
            name: entity.name,
            description: entity.description,
            key_prefix: entity.key_prefix,
            scopes: entity.scopes,
            ip_allowlist: entity.ip_allowlist,
            request_count: entity.request_count,
            last_used_at: entity.last_used_at,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

impl From<&ApiClientEntity> for ApiClientStatsResponse {
    fn from(entity: &ApiClientEntity) -> Self {
        Self {
            id: entity.id,
            status: entity.status(),
            request_count: entity.request_count,
            last_used_at: entity.last_used_at,
            last_used_ip: entity.last_used_ip.clone(),
            created_at: entity.created_at,
        }
    }
}

impl From<&ApiClientEntity> for ClientIdentityResponse {
    fn from(entity: &ApiClientEntity) -> Self {
        Self {
            client_id: entity.id,
            organisation_id: entity.organisation_id,
            name: entity.name.clone(),
            scopes: entity.scopes.clone(),
            rate_limit_tier: entity.rate_limit_tier(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> ApiClientEntity {
        ApiClientEntity {
            id: Uuid::new_v4(),
            organisation_id: Uuid::new_v4(),
            name: "Power BI".to_string(),
            description: None,
            key_prefix: "ehs_abcdefgh".to_string(),
            key_hash: "$argon2id$...".to_string(),
            scopes: vec!["incidents:read".to_string()],
            ip_allowlist: vec![],
            rate_limit_tier: "premium".to_string(),
            status: "active".to_string(),
            request_count: 12,
            last_used_at: None,
            last_used_ip: Some("203.0.113.1".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_parsed_fields() {
        let mut e = entity();
        assert_eq!(e.status(), ClientStatus::Active);
        assert_eq!(e.rate_limit_tier(), RateLimitTier::Premium);

        e.status = "unknown".to_string();
        e.rate_limit_tier = "gold".to_string();
        assert_eq!(e.status(), ClientStatus::Suspended);
        assert_eq!(e.rate_limit_tier(), RateLimitTier::Standard);
    }

    #[test]
    fn test_response_omits_hash() {
        let response = ApiClientResponse::from(entity());
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("ehs_abcdefgh"));
    }

    #[test]
    fn test_stats_conversion() {
        let e = entity();
        let stats = ApiClientStatsResponse::from(&e);
        assert_eq!(stats.request_count, 12);
        assert_eq!(stats.last_used_ip.as_deref(), Some("203.0.113.1"));
    }
}
