//! Integration event log.
//!
//! Append-only. Recording from domain code is fire-and-forget: a failed
//! write is logged and never surfaces to the operation that produced it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domain::models::integration_event::{
    EntityEventsQuery, EventSource, EventSummaryResponse, IntegrationEventFilter,
    IntegrationEventResponse, IntegrationEventStats, ListIntegrationEventsQuery,
    ListIntegrationEventsResponse, NewIntegrationEvent, RecordEventRequest,
};
use persistence::entities::IntegrationEventEntity;
use persistence::IntegrationEventStore;
use shared::pagination::{PageRequest, Pagination};
use tracing::{debug, error};
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiError;

#[derive(Clone)]
pub struct IntegrationEventService {
    store: Arc<dyn IntegrationEventStore>,
}

impl IntegrationEventService {
    pub fn new(store: Arc<dyn IntegrationEventStore>) -> Self {
        Self { store }
    }

    /// Appends an event and waits for the write.
    pub async fn record(
        &self,
        event: NewIntegrationEvent,
    ) -> Result<IntegrationEventEntity, ApiError> {
        let source = event.source;
        let stored = self.store.insert(event).await?;

        metrics::counter!("integration_events_recorded_total", "source" => source.as_str())
            .increment(1);
        debug!(
            event_id = %stored.id,
            event_type = %stored.event_type,
            organisation_id = %stored.organisation_id,
            "Integration event recorded"
        );
        Ok(stored)
    }

    /// Appends an event in the background. The caller never waits or fails.
    pub fn record_detached(&self, event: NewIntegrationEvent) {
        let service = self.clone();
        tokio::spawn(async move {
            let event_type = event.event_type.clone();
            let organisation_id = event.organisation_id;
            if let Err(e) = service.record(event).await {
                error!(
                    organisation_id = %organisation_id,
                    event_type = %event_type,
                    error = %e,
                    "Failed to record integration event"
                );
            }
        });
    }

    /// Records an event submitted through the public API.
    pub async fn record_from_api(
        &self,
        organisation_id: Uuid,
        request: RecordEventRequest,
    ) -> Result<IntegrationEventResponse, ApiError> {
        request.validate()?;
        request
            .validate_event_type()
            .map_err(ApiError::InvalidEventType)?;

        let event = NewIntegrationEvent {
            organisation_id,
            event_type: request.event_type,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            payload: request.payload,
            source: EventSource::Api,
            triggered_by: None,
        };
        Ok(self.record(event).await?.into())
    }

    pub async fn get(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> Result<IntegrationEventResponse, ApiError> {
        self.store
            .find_by_id(organisation_id, id)
            .await?
            .map(Into::into)
            .ok_or_else(|| ApiError::NotFound("Integration event not found".to_string()))
    }

    pub async fn query(
        &self,
        organisation_id: Uuid,
        query: &ListIntegrationEventsQuery,
    ) -> Result<ListIntegrationEventsResponse, ApiError> {
        self.query_filtered(
            organisation_id,
            &IntegrationEventFilter::from(query),
            query.page_request(),
        )
        .await
    }

    pub async fn query_filtered(
        &self,
        organisation_id: Uuid,
        filter: &IntegrationEventFilter,
        page: PageRequest,
    ) -> Result<ListIntegrationEventsResponse, ApiError> {
        if let (Some(start), Some(end)) = (filter.start, filter.end) {
            if start > end {
                return Err(ApiError::validation("start_date must not be after end_date"));
            }
        }

        let (events, total) = self
            .store
            .query(organisation_id, filter, page.limit(), page.offset())
            .await?;

        Ok(ListIntegrationEventsResponse {
            events: events.into_iter().map(Into::into).collect(),
            pagination: Pagination::new(&page, total),
        })
    }

    pub async fn for_entity(
        &self,
        organisation_id: Uuid,
        entity_type: &str,
        entity_id: &str,
        query: &EntityEventsQuery,
    ) -> Result<Vec<IntegrationEventResponse>, ApiError> {
        let events = self
            .store
            .for_entity(organisation_id, entity_type, entity_id, query.limit())
            .await?;
        Ok(events.into_iter().map(Into::into).collect())
    }

    pub async fn stats(
        &self,
        organisation_id: Uuid,
        days: u32,
    ) -> Result<IntegrationEventStats, ApiError> {
        let since = Utc::now() - Duration::days(i64::from(days));
        let mut stats = self.store.stats(organisation_id, since).await?;
        stats.days = days;
        Ok(stats)
    }

    pub async fn summary(
        &self,
        organisation_id: Uuid,
        hours: u32,
    ) -> Result<EventSummaryResponse, ApiError> {
        let since = Utc::now() - Duration::hours(i64::from(hours));
        let event_types = self.store.summary(organisation_id, since).await?;
        Ok(EventSummaryResponse { hours, event_types })
    }

    /// Purges events created before `cutoff`.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ApiError> {
        Ok(self.store.delete_older_than(cutoff).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::models::integration_event::EventTypeSummary;
    use persistence::memory::MemoryIntegrationEventStore;
    use persistence::{StoreError, StoreResult};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration as StdDuration, Instant};

    /// Store whose writes stall, then fail.
    #[derive(Default)]
    struct UnavailableStore {
        inserts: AtomicUsize,
    }

    fn unavailable<T>() -> StoreResult<T> {
        Err(StoreError::Conflict("database unavailable".to_string()))
    }

    #[async_trait]
    impl IntegrationEventStore for UnavailableStore {
        async fn insert(&self, _event: NewIntegrationEvent) -> StoreResult<IntegrationEventEntity> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(StdDuration::from_millis(200)).await;
            unavailable()
        }

        async fn find_by_id(
            &self,
            _organisation_id: Uuid,
            _id: Uuid,
        ) -> StoreResult<Option<IntegrationEventEntity>> {
            unavailable()
        }

        async fn query(
            &self,
            _organisation_id: Uuid,
            _filter: &IntegrationEventFilter,
            _limit: i64,
            _offset: i64,
        ) -> StoreResult<(Vec<IntegrationEventEntity>, i64)> {
            unavailable()
        }

        async fn for_entity(
            &self,
            _organisation_id: Uuid,
            _entity_type: &str,
            _entity_id: &str,
            _limit: i64,
        ) -> StoreResult<Vec<IntegrationEventEntity>> {
            unavailable()
        }

        async fn stats(
            &self,
            _organisation_id: Uuid,
            _since: DateTime<Utc>,
        ) -> StoreResult<IntegrationEventStats> {
            unavailable()
        }

        async fn summary(
            &self,
            _organisation_id: Uuid,
            _since: DateTime<Utc>,
        ) -> StoreResult<Vec<EventTypeSummary>> {
            unavailable()
        }

        async fn claim_undispatched(&self, _limit: i64) -> StoreResult<Vec<IntegrationEventEntity>> {
            unavailable()
        }

        async fn mark_dispatched(&self, _event_id: Uuid, _webhook_count: i32) -> StoreResult<()> {
            unavailable()
        }

        async fn delete_older_than(&self, _cutoff: DateTime<Utc>) -> StoreResult<u64> {
            unavailable()
        }
    }

    fn service() -> IntegrationEventService {
        IntegrationEventService::new(Arc::new(MemoryIntegrationEventStore::default()))
    }

    fn api_request(event_type: &str) -> RecordEventRequest {
        RecordEventRequest {
            event_type: event_type.to_string(),
            entity_type: "incident".to_string(),
            entity_id: "INC-7".to_string(),
            payload: json!({"severity": "high"}),
        }
    }

    #[tokio::test]
    async fn test_record_and_get() {
        let service = service();
        let org = Uuid::new_v4();
        let stored = service
            .record(NewIntegrationEvent::system(
                org,
                "incident.created",
                "incident",
                "INC-1",
                json!({}),
            ))
            .await
            .unwrap();

        let fetched = service.get(org, stored.id).await.unwrap();
        assert_eq!(fetched.event_type, "incident.created");
        assert_eq!(fetched.source, EventSource::System);
        assert!(matches!(
            service.get(Uuid::new_v4(), stored.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_detached_record_failure_stays_with_the_task() {
        let store = Arc::new(UnavailableStore::default());
        let service = IntegrationEventService::new(store.clone());

        let started = Instant::now();
        service.record_detached(NewIntegrationEvent::system(
            Uuid::new_v4(),
            "incident.closed",
            "incident",
            "INC-3",
            json!({}),
        ));
        assert!(started.elapsed() < StdDuration::from_millis(100));

        // Let the write stall and fail in the background.
        tokio::time::sleep(StdDuration::from_millis(300)).await;
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);

        // The service is still usable afterwards.
        assert!(service.get(Uuid::new_v4(), Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_detached_record_reaches_store() {
        let service = service();
        let org = Uuid::new_v4();
        service.record_detached(NewIntegrationEvent::system(
            org,
            "action.overdue",
            "action",
            "ACT-12",
            json!({"days_overdue": 3}),
        ));

        let mut events = Vec::new();
        for _ in 0..50 {
            events = service
                .for_entity(org, "action", "ACT-12", &EntityEventsQuery::default())
                .await
                .unwrap();
            if !events.is_empty() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "action.overdue");
        assert_eq!(events[0].source, EventSource::System);
    }

    #[tokio::test]
    async fn test_record_from_api_sets_source() {
        let service = service();
        let org = Uuid::new_v4();
        let event = service
            .record_from_api(org, api_request("incident.updated"))
            .await
            .unwrap();
        assert_eq!(event.source, EventSource::Api);
        assert_eq!(event.organisation_id, org);
    }

    #[tokio::test]
    async fn test_record_from_api_rejects_unknown_type() {
        let result = service()
            .record_from_api(Uuid::new_v4(), api_request("incident.exploded"))
            .await;
        assert!(matches!(result, Err(ApiError::InvalidEventType(_))));
    }

    #[tokio::test]
    async fn test_query_rejects_inverted_range() {
        let now = Utc::now();
        let query = ListIntegrationEventsQuery {
            start_date: Some(now),
            end_date: Some(now - Duration::days(1)),
            ..Default::default()
        };
        let result = service().query(Uuid::new_v4(), &query).await;
        assert!(matches!(result, Err(ApiError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_query_filters_by_entity_type() {
        let service = service();
        let org = Uuid::new_v4();
        for (event_type, entity_type) in [
            ("incident.created", "incident"),
            ("action.created", "action"),
            ("incident.closed", "incident"),
        ] {
            service
                .record(NewIntegrationEvent::system(
                    org,
                    event_type,
                    entity_type,
                    "1",
                    json!({}),
                ))
                .await
                .unwrap();
        }

        let response = service
            .query_filtered(
                org,
                &IntegrationEventFilter::for_entity_type("incident"),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(response.pagination.total, 2);
        assert!(response.events.iter().all(|e| e.entity_type == "incident"));
    }

    #[tokio::test]
    async fn test_stats_and_summary_windows() {
        let service = service();
        let org = Uuid::new_v4();
        service
            .record_from_api(org, api_request("incident.created"))
            .await
            .unwrap();

        let stats = service.stats(org, 7).await.unwrap();
        assert_eq!(stats.days, 7);
        assert_eq!(stats.total_events, 1);

        let summary = service.summary(org, 24).await.unwrap();
        assert_eq!(summary.hours, 24);
        assert_eq!(summary.event_types.len(), 1);
        assert_eq!(summary.event_types[0].count, 1);
    }
}
