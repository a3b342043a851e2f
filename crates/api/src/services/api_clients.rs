//! API client registry.
//!
//! Issues and verifies API keys. Raw keys leave this service exactly once, in
//! the create/regenerate response; only the Argon2id hash and the lookup
//! prefix are stored.

use std::net::IpAddr;
use std::sync::Arc;

use domain::models::api_client::{
    ApiClientFilter, ApiClientResponse, ApiClientStatsResponse, ClientStatus,
    CreateApiClientRequest, CreateApiClientResponse, ListApiClientsQuery,
    ListApiClientsResponse, RegenerateKeyResponse, UpdateApiClientRequest,
};
use persistence::entities::ApiClientEntity;
use persistence::{ApiClientChanges, ApiClientStore, NewApiClient};
use shared::api_key::{extract_key_prefix, generate_api_key, verify_api_key, GeneratedApiKey};
use shared::hashing::SecretHasher;
use shared::pagination::Pagination;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiError;

/// Why a presented key was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRejection {
    NotFound,
    KeyMismatch,
    Suspended,
    Revoked,
}

impl KeyRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyRejection::NotFound => "not_found",
            KeyRejection::KeyMismatch => "key_mismatch",
            KeyRejection::Suspended => "suspended",
            KeyRejection::Revoked => "revoked",
        }
    }
}

/// Result of validating a raw API key.
#[derive(Debug, Clone)]
pub enum KeyValidation {
    Valid(Box<ApiClientEntity>),
    Rejected(KeyRejection),
}

#[derive(Clone)]
pub struct ApiClientService {
    store: Arc<dyn ApiClientStore>,
    hasher: SecretHasher,
}

impl ApiClientService {
    pub fn new(store: Arc<dyn ApiClientStore>, hasher: SecretHasher) -> Self {
        Self { store, hasher }
    }

    pub async fn create(
        &self,
        organisation_id: Uuid,
        request: CreateApiClientRequest,
    ) -> Result<CreateApiClientResponse, ApiError> {
        request.validate()?;
        request.validate_scopes().map_err(ApiError::InvalidScope)?;
        request
            .validate_ip_allowlist()
            .map_err(ApiError::InvalidIpAllowlist)?;

        let generated = self.issue_key().await?;
        let client = self
            .store
            .insert(NewApiClient {
                organisation_id,
                name: request.name,
                description: request.description,
                key_prefix: generated.prefix,
                key_hash: generated.hash,
                scopes: request.scopes,
                ip_allowlist: request.ip_allowlist,
                rate_limit_tier: request.rate_limit_tier,
            })
            .await?;

        info!(
            organisation_id = %organisation_id,
            client_id = %client.id,
            key_prefix = %client.key_prefix,
            "API client created"
        );

        Ok(CreateApiClientResponse {
            client: client.into(),
            api_key: generated.key,
        })
    }

    pub async fn get(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> Result<ApiClientResponse, ApiError> {
        Ok(self.find(organisation_id, id).await?.into())
    }

    pub async fn list(
        &self,
        organisation_id: Uuid,
        query: &ListApiClientsQuery,
    ) -> Result<ListApiClientsResponse, ApiError> {
        let page = query.page_request();
        let filter = ApiClientFilter::from(query);
        let (clients, total) = self
            .store
            .list(organisation_id, &filter, page.limit(), page.offset())
            .await?;

        Ok(ListApiClientsResponse {
            api_clients: clients.into_iter().map(Into::into).collect(),
            pagination: Pagination::new(&page, total),
        })
    }

    pub async fn update(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        request: UpdateApiClientRequest,
    ) -> Result<ApiClientResponse, ApiError> {
        request.validate()?;
        if !request.has_updates() {
            return Err(ApiError::validation("No fields to update"));
        }
        request.validate_scopes().map_err(ApiError::InvalidScope)?;
        request
            .validate_ip_allowlist()
            .map_err(ApiError::InvalidIpAllowlist)?;

        let changes = ApiClientChanges {
            name: request.name,
            description: request.description,
            scopes: request.scopes,
            ip_allowlist: request.ip_allowlist,
            rate_limit_tier: request.rate_limit_tier,
        };

        let client = self
            .store
            .update(organisation_id, id, &changes)
            .await?
            .ok_or_else(not_found)?;
        Ok(client.into())
    }

    /// Issues a new key. The previous key stops verifying immediately.
    pub async fn regenerate_key(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> Result<RegenerateKeyResponse, ApiError> {
        self.find(organisation_id, id).await?;

        let generated = self.issue_key().await?;
        let client = self
            .store
            .replace_key(organisation_id, id, &generated.prefix, &generated.hash)
            .await?
            .ok_or_else(not_found)?;

        info!(client_id = %client.id, key_prefix = %client.key_prefix, "API key regenerated");

        Ok(RegenerateKeyResponse {
            id: client.id,
            api_key: generated.key,
            key_prefix: client.key_prefix,
        })
    }

    pub async fn set_status(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        status: ClientStatus,
    ) -> Result<ApiClientResponse, ApiError> {
        let current = self.find(organisation_id, id).await?.status();
        if !current.can_transition_to(status) {
            return Err(ApiError::InvalidStatusTransition(format!(
                "Cannot change API client status from {} to {}",
                current, status
            )));
        }

        let client = self
            .store
            .set_status(organisation_id, id, status)
            .await?
            .ok_or_else(not_found)?;

        info!(client_id = %client.id, status = %status, "API client status changed");
        Ok(client.into())
    }

    /// Soft-deletes the client; its key stops working immediately.
    pub async fn delete(&self, organisation_id: Uuid, id: Uuid) -> Result<(), ApiError> {
        if !self.store.soft_delete(organisation_id, id).await? {
            return Err(not_found());
        }
        info!(client_id = %id, "API client revoked");
        Ok(())
    }

    pub async fn stats(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> Result<ApiClientStatsResponse, ApiError> {
        let client = self.find(organisation_id, id).await?;
        Ok(ApiClientStatsResponse::from(&client))
    }

    /// Looks a raw key up by prefix and verifies it against each candidate.
    /// The hash is checked before the status so a wrong key never reveals
    /// whether a client is suspended.
    pub async fn validate_api_key(&self, raw_key: &str) -> Result<KeyValidation, ApiError> {
        let Some(prefix) = extract_key_prefix(raw_key) else {
            return Ok(KeyValidation::Rejected(KeyRejection::NotFound));
        };

        let candidates = self.store.find_by_prefix(prefix).await?;
        if candidates.is_empty() {
            return Ok(KeyValidation::Rejected(KeyRejection::NotFound));
        }

        let hasher = self.hasher;
        let key = raw_key.to_string();
        let matched = tokio::task::spawn_blocking(move || {
            candidates
                .into_iter()
                .find(|client| verify_api_key(&hasher, &key, &client.key_hash))
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Key verification task failed: {}", e)))?;

        Ok(match matched {
            None => KeyValidation::Rejected(KeyRejection::KeyMismatch),
            Some(client) => match client.status() {
                ClientStatus::Active if !client.is_deleted() => {
                    KeyValidation::Valid(Box::new(client))
                }
                ClientStatus::Suspended => KeyValidation::Rejected(KeyRejection::Suspended),
                _ => KeyValidation::Rejected(KeyRejection::Revoked),
            },
        })
    }

    /// Records a successful authentication without blocking the request.
    pub fn record_usage(&self, client_id: Uuid, ip: Option<IpAddr>) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store
                .record_usage(client_id, ip.map(|ip| ip.to_string()))
                .await
            {
                warn!(client_id = %client_id, error = %e, "Failed to record API client usage");
            }
        });
    }

    async fn find(&self, organisation_id: Uuid, id: Uuid) -> Result<ApiClientEntity, ApiError> {
        self.store
            .find_by_id(organisation_id, id)
            .await?
            .ok_or_else(not_found)
    }

    /// Argon2id is deliberately slow, so hashing runs off the async workers.
    async fn issue_key(&self) -> Result<GeneratedApiKey, ApiError> {
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || generate_api_key(&hasher))
            .await
            .map_err(|e| ApiError::Internal(format!("Key generation task failed: {}", e)))?
            .map_err(|e| ApiError::Internal(format!("Key generation failed: {}", e)))
    }
}

fn not_found() -> ApiError {
    ApiError::NotFound("API client not found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::api_client::RateLimitTier;
    use persistence::memory::MemoryApiClientStore;
    use shared::hashing::HashCost;

    fn service() -> ApiClientService {
        ApiClientService::new(
            Arc::new(MemoryApiClientStore::default()),
            SecretHasher::new(HashCost {
                memory_kib: 1024,
                iterations: 1,
            }),
        )
    }

    fn request(scopes: &[&str]) -> CreateApiClientRequest {
        CreateApiClientRequest {
            name: "Reporting".to_string(),
            description: None,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            ip_allowlist: vec![],
            rate_limit_tier: RateLimitTier::Standard,
        }
    }

    #[tokio::test]
    async fn test_created_key_validates() {
        let service = service();
        let org = Uuid::new_v4();
        let created = service.create(org, request(&["incidents:read"])).await.unwrap();

        assert!(created.api_key.starts_with(&created.client.key_prefix));
        match service.validate_api_key(&created.api_key).await.unwrap() {
            KeyValidation::Valid(client) => assert_eq!(client.id, created.client.id),
            other => panic!("expected valid key, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tampered_key_is_rejected() {
        let service = service();
        let created = service
            .create(Uuid::new_v4(), request(&["incidents:read"]))
            .await
            .unwrap();

        let tampered = format!("{}x", created.api_key);
        assert!(matches!(
            service.validate_api_key(&tampered).await.unwrap(),
            KeyValidation::Rejected(KeyRejection::KeyMismatch)
        ));
        assert!(matches!(
            service.validate_api_key("not-a-key").await.unwrap(),
            KeyValidation::Rejected(KeyRejection::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_unknown_scope_is_rejected() {
        let result = service()
            .create(Uuid::new_v4(), request(&["incidents:read", "payroll:read"]))
            .await;
        assert!(matches!(result, Err(ApiError::InvalidScope(_))));
    }

    #[tokio::test]
    async fn test_bad_allowlist_is_rejected() {
        let mut req = request(&["incidents:read"]);
        req.ip_allowlist = vec!["not-an-ip".to_string()];
        let result = service().create(Uuid::new_v4(), req).await;
        assert!(matches!(result, Err(ApiError::InvalidIpAllowlist(_))));
    }

    #[tokio::test]
    async fn test_suspend_and_reactivate() {
        let service = service();
        let org = Uuid::new_v4();
        let created = service.create(org, request(&["incidents:read"])).await.unwrap();
        let id = created.client.id;

        service.set_status(org, id, ClientStatus::Suspended).await.unwrap();
        assert!(matches!(
            service.validate_api_key(&created.api_key).await.unwrap(),
            KeyValidation::Rejected(KeyRejection::Suspended)
        ));
        assert!(matches!(
            service.set_status(org, id, ClientStatus::Suspended).await,
            Err(ApiError::InvalidStatusTransition(_))
        ));

        service.set_status(org, id, ClientStatus::Active).await.unwrap();
        assert!(matches!(
            service.validate_api_key(&created.api_key).await.unwrap(),
            KeyValidation::Valid(_)
        ));
    }

    #[tokio::test]
    async fn test_regenerate_invalidates_old_key() {
        let service = service();
        let org = Uuid::new_v4();
        let created = service.create(org, request(&["incidents:read"])).await.unwrap();

        let regenerated = service.regenerate_key(org, created.client.id).await.unwrap();
        assert_ne!(regenerated.api_key, created.api_key);
        assert!(matches!(
            service.validate_api_key(&regenerated.api_key).await.unwrap(),
            KeyValidation::Valid(_)
        ));
        assert!(matches!(
            service.validate_api_key(&created.api_key).await.unwrap(),
            KeyValidation::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn test_deleted_client_is_revoked_and_hidden() {
        let service = service();
        let org = Uuid::new_v4();
        let created = service.create(org, request(&["incidents:read"])).await.unwrap();
        let id = created.client.id;

        service.delete(org, id).await.unwrap();
        assert!(matches!(service.get(org, id).await, Err(ApiError::NotFound(_))));
        assert!(matches!(
            service.validate_api_key(&created.api_key).await.unwrap(),
            KeyValidation::Rejected(KeyRejection::Revoked)
        ));
        assert!(matches!(service.delete(org, id).await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_other_organisation_cannot_see_client() {
        let service = service();
        let created = service
            .create(Uuid::new_v4(), request(&["incidents:read"]))
            .await
            .unwrap();
        assert!(matches!(
            service.get(Uuid::new_v4(), created.client.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_requires_changes() {
        let service = service();
        let org = Uuid::new_v4();
        let created = service.create(org, request(&["incidents:read"])).await.unwrap();

        let result = service
            .update(org, created.client.id, UpdateApiClientRequest::default())
            .await;
        assert!(matches!(result, Err(ApiError::Validation { .. })));

        let updated = service
            .update(
                org,
                created.client.id,
                UpdateApiClientRequest {
                    rate_limit_tier: Some(RateLimitTier::Premium),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.rate_limit_tier, RateLimitTier::Premium);
    }
}
