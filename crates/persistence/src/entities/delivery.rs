//! Webhook delivery entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::delivery::{DeliveryResponse, DeliveryStatus};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the webhook_deliveries table.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookDeliveryEntity {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub integration_event_id: Uuid,
    pub organisation_id: Uuid,
    pub event_type: String,
    /// Serialized webhook payload, sent verbatim on every attempt.
    pub payload: serde_json::Value,
    pub status: String,
    pub attempt_count: i32,
    pub response_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub redelivery_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookDeliveryEntity {
    /// Parsed status. Unknown values are treated as terminal failures.
    pub fn status(&self) -> DeliveryStatus {
        self.status.parse().unwrap_or(DeliveryStatus::Failed)
    }
}

impl From<WebhookDeliveryEntity> for DeliveryResponse {
    fn from(entity: WebhookDeliveryEntity) -> Self {
        Self {
            status: entity.status(),
            id: entity.id,
            webhook_id: entity.webhook_id,
            integration_event_id: entity.integration_event_id,
            event_type: entity.event_type,
            attempt_count: entity.attempt_count,
            response_status_code: entity.response_status_code,
            response_body: entity.response_body,
            response_time_ms: entity.response_time_ms,
            error_message: entity.error_message,
            last_attempt_at: entity.last_attempt_at,
            next_retry_at: entity.next_retry_at,
            delivered_at: entity.delivered_at,
            redelivery_of: entity.redelivery_of,
            created_at: entity.created_at,
        }
    }
}
