//! Integration event retention.

use std::sync::Arc;

use chrono::{Duration, Utc};
use persistence::DeliveryStore;
use tracing::info;

use super::scheduler::{Job, JobFrequency};
use crate::services::IntegrationEventService;

/// Purges deliveries and integration events older than the retention window.
pub struct IntegrationEventCleanupJob {
    events: IntegrationEventService,
    deliveries: Arc<dyn DeliveryStore>,
    frequency: JobFrequency,
    retention_days: u32,
}

impl IntegrationEventCleanupJob {
    pub fn new(
        events: IntegrationEventService,
        deliveries: Arc<dyn DeliveryStore>,
        frequency: JobFrequency,
        retention_days: u32,
    ) -> Self {
        Self {
            events,
            deliveries,
            frequency,
            retention_days,
        }
    }
}

#[async_trait::async_trait]
impl Job for IntegrationEventCleanupJob {
    fn name(&self) -> &'static str {
        "integration_event_cleanup"
    }

    fn frequency(&self) -> JobFrequency {
        self.frequency.clone()
    }

    async fn execute(&self) -> Result<(), String> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.retention_days));

        // Deliveries first: they reference the events.
        let deliveries = self
            .deliveries
            .delete_older_than(cutoff)
            .await
            .map_err(|e| format!("Failed to purge webhook deliveries: {}", e))?;
        let events = self
            .events
            .delete_older_than(cutoff)
            .await
            .map_err(|e| format!("Failed to purge integration events: {}", e))?;

        info!(
            retention_days = self.retention_days,
            deliveries_deleted = deliveries,
            events_deleted = events,
            "Integration event cleanup completed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::NewIntegrationEvent;
    use persistence::Stores;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_recent_events_survive() {
        let stores = Stores::in_memory();
        let events = IntegrationEventService::new(stores.events.clone());
        let org = Uuid::new_v4();
        events
            .record(NewIntegrationEvent::system(
                org,
                "incident.created",
                "incident",
                "INC-1",
                json!({}),
            ))
            .await
            .unwrap();

        let job = IntegrationEventCleanupJob::new(
            events.clone(),
            stores.deliveries.clone(),
            JobFrequency::Every(std::time::Duration::from_secs(86400)),
            90,
        );
        assert_eq!(job.name(), "integration_event_cleanup");
        tokio_test::assert_ok!(job.execute().await);

        let stats = events.stats(org, 1).await.unwrap();
        assert_eq!(stats.total_events, 1);
    }
}
