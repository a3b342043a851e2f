//! Integration event entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::integration_event::{EventSource, IntegrationEventResponse};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the integration_events table.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct IntegrationEventEntity {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub source: String,
    pub triggered_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl IntegrationEventEntity {
    pub fn source(&self) -> EventSource {
        self.source.parse().unwrap_or_default()
    }
}

impl From<IntegrationEventEntity> for IntegrationEventResponse {
    fn from(entity: IntegrationEventEntity) -> Self {
        Self {
            source: entity.source(),
            id: entity.id,
            organisation_id: entity.organisation_id,
            event_type: entity.event_type,
            entity_type: entity.entity_type,
            entity_id: entity.entity_id,
            payload: entity.payload,
            triggered_by: entity.triggered_by,
            created_at: entity.created_at,
        }
    }
}
