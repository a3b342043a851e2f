//! PostgreSQL repository for API clients.

use async_trait::async_trait;
use domain::models::api_client::{ApiClientFilter, ClientStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::ApiClientEntity;
use crate::metrics::QueryTimer;
use crate::store::{ApiClientChanges, ApiClientStore, NewApiClient, StoreResult};

/// Repository for API client operations.
#[derive(Clone)]
pub struct ApiClientRepository {
    pool: PgPool,
}

impl ApiClientRepository {
    /// Creates a new API client repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiClientStore for ApiClientRepository {
    async fn insert(&self, client: NewApiClient) -> StoreResult<ApiClientEntity> {
        let timer = QueryTimer::new("insert_api_client");
        let result = sqlx::query_as::<_, ApiClientEntity>(
            r#"
            INSERT INTO api_clients (id, organisation_id, name, description, key_prefix,
                                     key_hash, scopes, ip_allowlist, rate_limit_tier)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, organisation_id, name, description, key_prefix, key_hash, scopes,
                      ip_allowlist, rate_limit_tier, status, request_count, last_used_at,
                      last_used_ip, created_at, updated_at, deleted_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(client.organisation_id)
        .bind(&client.name)
        .bind(&client.description)
        .bind(&client.key_prefix)
        .bind(&client.key_hash)
        .bind(&client.scopes)
        .bind(&client.ip_allowlist)
        .bind(client.rate_limit_tier.as_str())
        .fetch_one(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn find_by_id(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<ApiClientEntity>> {
        let timer = QueryTimer::new("find_api_client_by_id");
        let result = sqlx::query_as::<_, ApiClientEntity>(
            r#"
            SELECT id, organisation_id, name, description, key_prefix, key_hash, scopes,
                   ip_allowlist, rate_limit_tier, status, request_count, last_used_at,
                   last_used_ip, created_at, updated_at, deleted_at
            FROM api_clients
            WHERE id = $1 AND organisation_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(organisation_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn find_by_prefix(&self, key_prefix: &str) -> StoreResult<Vec<ApiClientEntity>> {
        let timer = QueryTimer::new("find_api_clients_by_prefix");
        let result = sqlx::query_as::<_, ApiClientEntity>(
            r#"
            SELECT id, organisation_id, name, description, key_prefix, key_hash, scopes,
                   ip_allowlist, rate_limit_tier, status, request_count, last_used_at,
                   last_used_ip, created_at, updated_at, deleted_at
            FROM api_clients
            WHERE key_prefix = $1
            "#,
        )
        .bind(key_prefix)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn list(
        &self,
        organisation_id: Uuid,
        filter: &ApiClientFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<ApiClientEntity>, i64)> {
        let status = filter.status.map(|s| s.as_str());
        let timer = QueryTimer::new("list_api_clients");

        let total: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM api_clients
            WHERE organisation_id = $1 AND deleted_at IS NULL
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR $3 = ANY(scopes))
            "#,
        )
        .bind(organisation_id)
        .bind(status)
        .bind(&filter.scope)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, ApiClientEntity>(
            r#"
            SELECT id, organisation_id, name, description, key_prefix, key_hash, scopes,
                   ip_allowlist, rate_limit_tier, status, request_count, last_used_at,
                   last_used_ip, created_at, updated_at, deleted_at
            FROM api_clients
            WHERE organisation_id = $1 AND deleted_at IS NULL
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR $3 = ANY(scopes))
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(organisation_id)
        .bind(status)
        .bind(&filter.scope)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        Ok((rows?, total.0))
    }

    async fn update(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        changes: &ApiClientChanges,
    ) -> StoreResult<Option<ApiClientEntity>> {
        let timer = QueryTimer::new("update_api_client");
        let result = sqlx::query_as::<_, ApiClientEntity>(
            r#"
            UPDATE api_clients
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                scopes = COALESCE($5, scopes),
                ip_allowlist = COALESCE($6, ip_allowlist),
                rate_limit_tier = COALESCE($7, rate_limit_tier),
                updated_at = NOW()
            WHERE id = $1 AND organisation_id = $2 AND deleted_at IS NULL
            RETURNING id, organisation_id, name, description, key_prefix, key_hash, scopes,
                      ip_allowlist, rate_limit_tier, status, request_count, last_used_at,
                      last_used_ip, created_at, updated_at, deleted_at
            "#,
        )
        .bind(id)
        .bind(organisation_id)
        .bind(&changes.name)
        .bind(&changes.description)
        .bind(&changes.scopes)
        .bind(&changes.ip_allowlist)
        .bind(changes.rate_limit_tier.map(|t| t.as_str()))
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn replace_key(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        key_prefix: &str,
        key_hash: &str,
    ) -> StoreResult<Option<ApiClientEntity>> {
        let timer = QueryTimer::new("replace_api_client_key");
        let result = sqlx::query_as::<_, ApiClientEntity>(
            r#"
            UPDATE api_clients
            SET key_prefix = $3, key_hash = $4, updated_at = NOW()
            WHERE id = $1 AND organisation_id = $2 AND deleted_at IS NULL
            RETURNING id, organisation_id, name, description, key_prefix, key_hash, scopes,
                      ip_allowlist, rate_limit_tier, status, request_count, last_used_at,
                      last_used_ip, created_at, updated_at, deleted_at
            "#,
        )
        .bind(id)
        .bind(organisation_id)
        .bind(key_prefix)
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn set_status(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        status: ClientStatus,
    ) -> StoreResult<Option<ApiClientEntity>> {
        let timer = QueryTimer::new("set_api_client_status");
        let result = sqlx::query_as::<_, ApiClientEntity>(
            r#"
            UPDATE api_clients
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND organisation_id = $2 AND deleted_at IS NULL
            RETURNING id, organisation_id, name, description, key_prefix, key_hash, scopes,
                      ip_allowlist, rate_limit_tier, status, request_count, last_used_at,
                      last_used_ip, created_at, updated_at, deleted_at
            "#,
        )
        .bind(id)
        .bind(organisation_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn soft_delete(&self, organisation_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let timer = QueryTimer::new("soft_delete_api_client");
        let result = sqlx::query(
            r#"
            UPDATE api_clients
            SET status = 'revoked', deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND organisation_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(organisation_id)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected() > 0)
    }

    async fn record_usage(&self, id: Uuid, ip: Option<String>) -> StoreResult<()> {
        let timer = QueryTimer::new("record_api_client_usage");
        let result = sqlx::query(
            r#"
            UPDATE api_clients
            SET request_count = request_count + 1,
                last_used_at = NOW(),
                last_used_ip = COALESCE($2, last_used_ip)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(ip)
        .execute(&self.pool)
        .await;
        timer.record();
        result?;
        Ok(())
    }
}
