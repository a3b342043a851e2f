//! PostgreSQL repository for webhook deliveries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::delivery::{DeliveryCounts, DeliveryStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::WebhookDeliveryEntity;
use crate::metrics::QueryTimer;
use crate::store::{AttemptRecord, DeliveryStore, NewDelivery, StoreResult};

/// Repository for webhook delivery operations.
#[derive(Clone)]
pub struct DeliveryRepository {
    pool: PgPool,
}

impl DeliveryRepository {
    /// Creates a new delivery repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryStore for DeliveryRepository {
    async fn insert(&self, delivery: NewDelivery) -> StoreResult<Option<WebhookDeliveryEntity>> {
        let timer = QueryTimer::new("insert_webhook_delivery");
        let result = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"
            INSERT INTO webhook_deliveries (id, webhook_id, integration_event_id,
                                            organisation_id, event_type, payload,
                                            status, next_retry_at, redelivery_of)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (integration_event_id, webhook_id) WHERE redelivery_of IS NULL
            DO NOTHING
            RETURNING id, webhook_id, integration_event_id, organisation_id, event_type,
                      payload, status, attempt_count, response_status_code, response_body,
                      response_time_ms, error_message, last_attempt_at, next_retry_at,
                      delivered_at, redelivery_of, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(delivery.webhook_id)
        .bind(delivery.integration_event_id)
        .bind(delivery.organisation_id)
        .bind(&delivery.event_type)
        .bind(&delivery.payload)
        .bind(delivery.status.as_str())
        .bind(delivery.next_retry_at)
        .bind(delivery.redelivery_of)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<WebhookDeliveryEntity>> {
        let timer = QueryTimer::new("claim_due_deliveries");
        let result = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"
            UPDATE webhook_deliveries
            SET status = 'delivering', next_retry_at = $2, updated_at = NOW()
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE status IN ('pending', 'delivering', 'retrying') AND next_retry_at <= $1
                ORDER BY next_retry_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, webhook_id, integration_event_id, organisation_id, event_type,
                      payload, status, attempt_count, response_status_code, response_body,
                      response_time_ms, error_message, last_attempt_at, next_retry_at,
                      delivered_at, redelivery_of, created_at, updated_at
            "#,
        )
        .bind(now)
        .bind(lease_until)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn record_attempt(
        &self,
        id: Uuid,
        attempt: &AttemptRecord,
    ) -> StoreResult<Option<WebhookDeliveryEntity>> {
        let delivered_at = (attempt.status == DeliveryStatus::Delivered).then_some(attempt.attempted_at);
        let timer = QueryTimer::new("record_delivery_attempt");
        let result = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"
            UPDATE webhook_deliveries
            SET status = $2,
                attempt_count = $3,
                response_status_code = $4,
                response_body = $5,
                response_time_ms = $6,
                error_message = $7,
                last_attempt_at = $8,
                next_retry_at = $9,
                delivered_at = COALESCE($10, delivered_at),
                updated_at = NOW()
            WHERE id = $1 AND status = 'delivering' AND attempt_count <= $3
            RETURNING id, webhook_id, integration_event_id, organisation_id, event_type,
                      payload, status, attempt_count, response_status_code, response_body,
                      response_time_ms, error_message, last_attempt_at, next_retry_at,
                      delivered_at, redelivery_of, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(attempt.status.as_str())
        .bind(attempt.attempt_count)
        .bind(attempt.response_status_code)
        .bind(&attempt.response_body)
        .bind(attempt.response_time_ms)
        .bind(&attempt.error_message)
        .bind(attempt.attempted_at)
        .bind(attempt.next_retry_at)
        .bind(delivered_at)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn find_by_id(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<WebhookDeliveryEntity>> {
        let timer = QueryTimer::new("find_webhook_delivery_by_id");
        let result = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"
            SELECT id, webhook_id, integration_event_id, organisation_id, event_type,
                   payload, status, attempt_count, response_status_code, response_body,
                   response_time_ms, error_message, last_attempt_at, next_retry_at,
                   delivered_at, redelivery_of, created_at, updated_at
            FROM webhook_deliveries
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

    async fn list_for_webhook(
        &self,
        webhook_id: Uuid,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<WebhookDeliveryEntity>, i64)> {
        let status = status.map(|s| s.as_str());
        let timer = QueryTimer::new("list_webhook_deliveries");

        let total: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM webhook_deliveries
            WHERE webhook_id = $1 AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(webhook_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"
            SELECT id, webhook_id, integration_event_id, organisation_id, event_type,
                   payload, status, attempt_count, response_status_code, response_body,
                   response_time_ms, error_message, last_attempt_at, next_retry_at,
                   delivered_at, redelivery_of, created_at, updated_at
            FROM webhook_deliveries
            WHERE webhook_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(webhook_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        Ok((rows?, total.0))
    }

    async fn counts_for_webhook(
        &self,
        webhook_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<DeliveryCounts> {
        let timer = QueryTimer::new("webhook_delivery_counts");
        let result: Result<(i64, i64, i64, i64, Option<f64>), sqlx::Error> = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE status = 'delivered'),
                   COUNT(*) FILTER (WHERE status IN ('exhausted', 'failed')),
                   COUNT(*) FILTER (WHERE status IN ('pending', 'delivering', 'retrying')),
                   (AVG(response_time_ms) FILTER (WHERE status = 'delivered'))::float8
            FROM webhook_deliveries
            WHERE webhook_id = $1 AND created_at > $2
            "#,
        )
        .bind(webhook_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await;
        timer.record();

        let (total, delivered, failed, pending, avg_response_time_ms) = result?;
        Ok(DeliveryCounts {
            total,
            delivered,
            failed,
            pending,
            avg_response_time_ms,
        })
    }

    async fn make_due(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<WebhookDeliveryEntity>> {
        let timer = QueryTimer::new("make_delivery_due");
        let result = sqlx::query_as::<_, WebhookDeliveryEntity>(
            r#"
            UPDATE webhook_deliveries
            SET next_retry_at = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'retrying')
            RETURNING id, webhook_id, integration_event_id, organisation_id, event_type,
                      payload, status, attempt_count, response_status_code, response_body,
                      response_time_ms, error_message, last_attempt_at, next_retry_at,
                      delivered_at, redelivery_of, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let timer = QueryTimer::new("delete_old_webhook_deliveries");
        let result = sqlx::query("DELETE FROM webhook_deliveries WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await;
        timer.record();
        Ok(result?.rows_affected())
    }
}
