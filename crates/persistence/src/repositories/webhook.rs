//! PostgreSQL repository for webhook subscriptions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::WebhookEntity;
use crate::metrics::QueryTimer;
use crate::store::{NewWebhook, StoreResult, WebhookChanges, WebhookStore};

/// Repository for webhook operations.
#[derive(Clone)]
pub struct WebhookRepository {
    pool: PgPool,
}

impl WebhookRepository {
    /// Creates a new webhook repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookStore for WebhookRepository {
    async fn insert(&self, webhook: NewWebhook) -> StoreResult<WebhookEntity> {
        let timer = QueryTimer::new("insert_webhook");
        let result = sqlx::query_as::<_, WebhookEntity>(
            r#"
            INSERT INTO webhooks (id, organisation_id, name, description, target_url,
                                  event_types, secret_encrypted, headers_encrypted, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, organisation_id, name, description, target_url, event_types,
                      secret_encrypted, headers_encrypted, is_active, consecutive_failures, last_triggered_at,
                      last_success_at, last_failure_at, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(webhook.organisation_id)
        .bind(&webhook.name)
        .bind(&webhook.description)
        .bind(&webhook.target_url)
        .bind(&webhook.event_types)
        .bind(&webhook.secret_encrypted)
        .bind(&webhook.headers_encrypted)
        .bind(webhook.is_active)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn find_by_id(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<WebhookEntity>> {
        let timer = QueryTimer::new("find_webhook_by_id");
        let result = sqlx::query_as::<_, WebhookEntity>(
            r#"
            SELECT id, organisation_id, name, description, target_url, event_types,
                   secret_encrypted, headers_encrypted, is_active, consecutive_failures, last_triggered_at,
                   last_success_at, last_failure_at, created_at, updated_at
            FROM webhooks
            WHERE id = $1 AND organisation_id = $2
            "#,
        )
        .bind(id)
        .bind(organisation_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn find_any(&self, id: Uuid) -> StoreResult<Option<WebhookEntity>> {
        let timer = QueryTimer::new("find_webhook_any");
        let result = sqlx::query_as::<_, WebhookEntity>(
            r#"
            SELECT id, organisation_id, name, description, target_url, event_types,
                   secret_encrypted, headers_encrypted, is_active, consecutive_failures, last_triggered_at,
                   last_success_at, last_failure_at, created_at, updated_at
            FROM webhooks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn list(
        &self,
        organisation_id: Uuid,
        is_active: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<WebhookEntity>, i64)> {
        let timer = QueryTimer::new("list_webhooks");

        let total: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM webhooks
            WHERE organisation_id = $1 AND ($2::boolean IS NULL OR is_active = $2)
            "#,
        )
        .bind(organisation_id)
        .bind(is_active)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, WebhookEntity>(
            r#"
            SELECT id, organisation_id, name, description, target_url, event_types,
                   secret_encrypted, headers_encrypted, is_active, consecutive_failures, last_triggered_at,
                   last_success_at, last_failure_at, created_at, updated_at
            FROM webhooks
            WHERE organisation_id = $1 AND ($2::boolean IS NULL OR is_active = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(organisation_id)
        .bind(is_active)
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
        changes: &WebhookChanges,
    ) -> StoreResult<Option<WebhookEntity>> {
        let timer = QueryTimer::new("update_webhook");
        // Reactivation clears the failure streak
        let result = sqlx::query_as::<_, WebhookEntity>(
            r#"
            UPDATE webhooks
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                target_url = COALESCE($5, target_url),
                event_types = COALESCE($6, event_types),
                consecutive_failures = CASE WHEN $7 IS TRUE AND NOT is_active
                                            THEN 0 ELSE consecutive_failures END,
                is_active = COALESCE($7, is_active),
                headers_encrypted = CASE WHEN $8 THEN $9 ELSE headers_encrypted END,
                updated_at = NOW()
            WHERE id = $1 AND organisation_id = $2
            RETURNING id, organisation_id, name, description, target_url, event_types,
                      secret_encrypted, headers_encrypted, is_active, consecutive_failures, last_triggered_at,
                      last_success_at, last_failure_at, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(organisation_id)
        .bind(&changes.name)
        .bind(&changes.description)
        .bind(&changes.target_url)
        .bind(&changes.event_types)
        .bind(changes.is_active)
        .bind(changes.headers_encrypted.is_some())
        .bind(changes.headers_encrypted.clone().flatten())
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn set_active(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        is_active: bool,
    ) -> StoreResult<Option<WebhookEntity>> {
        let timer = QueryTimer::new("set_webhook_active");
        let result = sqlx::query_as::<_, WebhookEntity>(
            r#"
            UPDATE webhooks
            SET consecutive_failures = CASE WHEN $3 AND NOT is_active
                                            THEN 0 ELSE consecutive_failures END,
                is_active = $3,
                updated_at = NOW()
            WHERE id = $1 AND organisation_id = $2
            RETURNING id, organisation_id, name, description, target_url, event_types,
                      secret_encrypted, headers_encrypted, is_active, consecutive_failures, last_triggered_at,
                      last_success_at, last_failure_at, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(organisation_id)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn replace_secret(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        secret_encrypted: &str,
    ) -> StoreResult<Option<WebhookEntity>> {
        let timer = QueryTimer::new("replace_webhook_secret");
        let result = sqlx::query_as::<_, WebhookEntity>(
            r#"
            UPDATE webhooks
            SET secret_encrypted = $3, updated_at = NOW()
            WHERE id = $1 AND organisation_id = $2
            RETURNING id, organisation_id, name, description, target_url, event_types,
                      secret_encrypted, headers_encrypted, is_active, consecutive_failures, last_triggered_at,
                      last_success_at, last_failure_at, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(organisation_id)
        .bind(secret_encrypted)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn delete(&self, organisation_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let timer = QueryTimer::new("delete_webhook");
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1 AND organisation_id = $2")
            .bind(id)
            .bind(organisation_id)
            .execute(&self.pool)
            .await;
        timer.record();
        Ok(result?.rows_affected() > 0)
    }

    async fn find_matching(
        &self,
        organisation_id: Uuid,
        event_type: &str,
    ) -> StoreResult<Vec<WebhookEntity>> {
        let timer = QueryTimer::new("find_matching_webhooks");
        let result = sqlx::query_as::<_, WebhookEntity>(
            r#"
            SELECT id, organisation_id, name, description, target_url, event_types,
                   secret_encrypted, headers_encrypted, is_active, consecutive_failures, last_triggered_at,
                   last_success_at, last_failure_at, created_at, updated_at
            FROM webhooks
            WHERE organisation_id = $1
              AND is_active = TRUE
              AND ($2 = ANY(event_types) OR '*' = ANY(event_types))
            ORDER BY created_at
            "#,
        )
        .bind(organisation_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn record_success(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let timer = QueryTimer::new("record_webhook_success");
        let result = sqlx::query(
            r#"
            UPDATE webhooks
            SET consecutive_failures = 0, last_triggered_at = $2, last_success_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await;
        timer.record();
        result?;
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<i32> {
        let timer = QueryTimer::new("record_webhook_failure");
        let result: Result<Option<(i32,)>, sqlx::Error> = sqlx::query_as(
            r#"
            UPDATE webhooks
            SET consecutive_failures = consecutive_failures + 1,
                last_triggered_at = $2,
                last_failure_at = $2
            WHERE id = $1
            RETURNING consecutive_failures
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?.map(|(count,)| count).unwrap_or(0))
    }

    async fn deactivate(&self, id: Uuid) -> StoreResult<()> {
        let timer = QueryTimer::new("deactivate_webhook");
        let result =
            sqlx::query("UPDATE webhooks SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await;
        timer.record();
        result?;
        Ok(())
    }
}
