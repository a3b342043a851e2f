//! PostgreSQL repository for integration events and their dispatch records.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use domain::models::integration_event::{
    DailyEventCount, EventTypeCount, EventTypeSummary, IntegrationEventFilter,
    IntegrationEventStats, NewIntegrationEvent,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::IntegrationEventEntity;
use crate::metrics::QueryTimer;
use crate::store::{IntegrationEventStore, StoreResult};

/// Repository for integration event operations.
#[derive(Clone)]
pub struct IntegrationEventRepository {
    pool: PgPool,
}

impl IntegrationEventRepository {
    /// Creates a new integration event repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IntegrationEventStore for IntegrationEventRepository {
    async fn insert(&self, event: NewIntegrationEvent) -> StoreResult<IntegrationEventEntity> {
        let timer = QueryTimer::new("insert_integration_event");
        let result = sqlx::query_as::<_, IntegrationEventEntity>(
            r#"
            INSERT INTO integration_events (id, organisation_id, event_type, entity_type,
                                            entity_id, payload, source, triggered_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, organisation_id, event_type, entity_type, entity_id, payload,
                      source, triggered_by, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.organisation_id)
        .bind(&event.event_type)
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(&event.payload)
        .bind(event.source.as_str())
        .bind(event.triggered_by)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn find_by_id(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<IntegrationEventEntity>> {
        let timer = QueryTimer::new("find_integration_event_by_id");
        let result = sqlx::query_as::<_, IntegrationEventEntity>(
            r#"
            SELECT id, organisation_id, event_type, entity_type, entity_id, payload,
                   source, triggered_by, created_at
            FROM integration_events
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

    async fn query(
        &self,
        organisation_id: Uuid,
        filter: &IntegrationEventFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<IntegrationEventEntity>, i64)> {
        let source = filter.source.map(|s| s.as_str());
        let timer = QueryTimer::new("query_integration_events");

        let total: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM integration_events
            WHERE organisation_id = $1
              AND ($2::text IS NULL OR event_type = $2)
              AND ($3::text IS NULL OR source = $3)
              AND ($4::text IS NULL OR entity_type = $4)
              AND ($5::text IS NULL OR entity_id = $5)
              AND ($6::timestamptz IS NULL OR created_at >= $6)
              AND ($7::timestamptz IS NULL OR created_at <= $7)
            "#,
        )
        .bind(organisation_id)
        .bind(&filter.event_type)
        .bind(source)
        .bind(&filter.entity_type)
        .bind(&filter.entity_id)
        .bind(filter.start)
        .bind(filter.end)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, IntegrationEventEntity>(
            r#"
            SELECT id, organisation_id, event_type, entity_type, entity_id, payload,
                   source, triggered_by, created_at
            FROM integration_events
            WHERE organisation_id = $1
              AND ($2::text IS NULL OR event_type = $2)
              AND ($3::text IS NULL OR source = $3)
              AND ($4::text IS NULL OR entity_type = $4)
              AND ($5::text IS NULL OR entity_id = $5)
              AND ($6::timestamptz IS NULL OR created_at >= $6)
              AND ($7::timestamptz IS NULL OR created_at <= $7)
            ORDER BY created_at DESC, id
            LIMIT $8 OFFSET $9
            "#,
        )
        .bind(organisation_id)
        .bind(&filter.event_type)
        .bind(source)
        .bind(&filter.entity_type)
        .bind(&filter.entity_id)
        .bind(filter.start)
        .bind(filter.end)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        Ok((rows?, total.0))
    }

    async fn for_entity(
        &self,
        organisation_id: Uuid,
        entity_type: &str,
        entity_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<IntegrationEventEntity>> {
        let timer = QueryTimer::new("integration_events_for_entity");
        let result = sqlx::query_as::<_, IntegrationEventEntity>(
            r#"
            SELECT id, organisation_id, event_type, entity_type, entity_id, payload,
                   source, triggered_by, created_at
            FROM integration_events
            WHERE organisation_id = $1 AND entity_type = $2 AND entity_id = $3
            ORDER BY created_at DESC
            LIMIT $4
            "#,
        )
        .bind(organisation_id)
        .bind(entity_type)
        .bind(entity_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn stats(
        &self,
        organisation_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<IntegrationEventStats> {
        let timer = QueryTimer::new("integration_event_stats");

        let (total_events, entity_types, active_days): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(DISTINCT entity_type),
                   COUNT(DISTINCT (created_at AT TIME ZONE 'UTC')::date)
            FROM integration_events
            WHERE organisation_id = $1 AND created_at > $2
            "#,
        )
        .bind(organisation_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let by_type: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT event_type, COUNT(*) AS count
            FROM integration_events
            WHERE organisation_id = $1 AND created_at > $2
            GROUP BY event_type
            ORDER BY count DESC, event_type
            LIMIT 10
            "#,
        )
        .bind(organisation_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let by_day: Vec<(NaiveDate, i64)> = sqlx::query_as(
            r#"
            SELECT (created_at AT TIME ZONE 'UTC')::date AS day, COUNT(*)
            FROM integration_events
            WHERE organisation_id = $1 AND created_at > $2
            GROUP BY day
            ORDER BY day DESC
            "#,
        )
        .bind(organisation_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        timer.record();

        Ok(IntegrationEventStats {
            days: 0,
            total_events,
            entity_types,
            active_days,
            by_event_type: by_type
                .into_iter()
                .map(|(event_type, count)| EventTypeCount { event_type, count })
                .collect(),
            by_day: by_day
                .into_iter()
                .map(|(date, count)| DailyEventCount { date, count })
                .collect(),
        })
    }

    async fn summary(
        &self,
        organisation_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<EventTypeSummary>> {
        let timer = QueryTimer::new("integration_event_summary");
        let rows: Result<Vec<(String, i64, DateTime<Utc>)>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT event_type, COUNT(*) AS count, MAX(created_at)
            FROM integration_events
            WHERE organisation_id = $1 AND created_at > $2
            GROUP BY event_type
            ORDER BY count DESC, event_type
            "#,
        )
        .bind(organisation_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        Ok(rows?
            .into_iter()
            .map(|(event_type, count, latest)| EventTypeSummary {
                event_type,
                count,
                latest,
            })
            .collect())
    }

    async fn claim_undispatched(&self, limit: i64) -> StoreResult<Vec<IntegrationEventEntity>> {
        let timer = QueryTimer::new("claim_undispatched_events");
        let result = sqlx::query_as::<_, IntegrationEventEntity>(
            r#"
            SELECT e.id, e.organisation_id, e.event_type, e.entity_type, e.entity_id,
                   e.payload, e.source, e.triggered_by, e.created_at
            FROM integration_events e
            WHERE NOT EXISTS (
                SELECT 1 FROM integration_event_dispatches d WHERE d.event_id = e.id
            )
            ORDER BY e.created_at, e.id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        Ok(result?)
    }

    async fn mark_dispatched(&self, event_id: Uuid, webhook_count: i32) -> StoreResult<()> {
        let timer = QueryTimer::new("mark_event_dispatched");
        let result = sqlx::query(
            r#"
            INSERT INTO integration_event_dispatches (event_id, webhook_count)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(webhook_count)
        .execute(&self.pool)
        .await;
        timer.record();
        result?;
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let timer = QueryTimer::new("delete_old_integration_events");
        let result = sqlx::query("DELETE FROM integration_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await;
        timer.record();
        Ok(result?.rows_affected())
    }
}
