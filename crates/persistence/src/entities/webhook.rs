//! Webhook entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::webhook::WebhookResponse;
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the webhooks table.
///
/// `secret_encrypted` holds a Secret Codec envelope, never plaintext, and so
/// does `headers_encrypted` when the webhook has custom headers.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookEntity {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub target_url: String,
    pub event_types: Vec<String>,
    pub secret_encrypted: String,
    pub headers_encrypted: Option<String>,
    pub is_active: bool,
    pub consecutive_failures: i32,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WebhookEntity> for WebhookResponse {
    fn from(entity: WebhookEntity) -> Self {
        Self {
            id: entity.id,
            organisation_id: entity.organisation_id,
            name: entity.name,
            description: entity.description,
            target_url: entity.target_url,
            event_types: entity.event_types,
            is_active: entity.is_active,
            has_custom_headers: entity.headers_encrypted.is_some(),
            consecutive_failures: entity.consecutive_failures,
            last_triggered_at: entity.last_triggered_at,
            last_success_at: entity.last_success_at,
            last_failure_at: entity.last_failure_at,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}
