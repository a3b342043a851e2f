//! Storage abstraction for the integration pipeline.
//!
//! Every service talks to these traits. `repositories` implements them on
//! PostgreSQL and `memory` implements them in process for tests and
//! embedding.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::api_client::{ApiClientFilter, ClientStatus, RateLimitTier};
use domain::models::delivery::{DeliveryCounts, DeliveryStatus};
use domain::models::integration_event::{
    EventTypeSummary, IntegrationEventFilter, IntegrationEventStats, NewIntegrationEvent,
};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::entities::{
    ApiClientEntity, IntegrationEventEntity, WebhookDeliveryEntity, WebhookEntity,
};

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Record not found")]
    NotFound,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Input for inserting an API client.
#[derive(Debug, Clone)]
pub struct NewApiClient {
    pub organisation_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub key_prefix: String,
    pub key_hash: String,
    pub scopes: Vec<String>,
    pub ip_allowlist: Vec<String>,
    pub rate_limit_tier: RateLimitTier,
}

/// Partial update of an API client. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ApiClientChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub ip_allowlist: Option<Vec<String>>,
    pub rate_limit_tier: Option<RateLimitTier>,
}

/// Input for inserting a webhook.
#[derive(Debug, Clone)]
pub struct NewWebhook {
    pub organisation_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub target_url: String,
    pub event_types: Vec<String>,
    pub secret_encrypted: String,
    pub headers_encrypted: Option<String>,
    pub is_active: bool,
}

/// Partial update of a webhook. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct WebhookChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub target_url: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub is_active: Option<bool>,
    /// `Some(None)` removes the custom headers.
    pub headers_encrypted: Option<Option<String>>,
}

/// Input for queueing a delivery.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub webhook_id: Uuid,
    pub integration_event_id: Uuid,
    pub organisation_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    /// `Delivering` when the caller attempts the row straight away,
    /// `Pending` when it is left for the retry sweep.
    pub status: DeliveryStatus,
    /// Lease expiry for a claimed row, due time for a queued one.
    pub next_retry_at: DateTime<Utc>,
    /// Terminal delivery this one re-sends. `None` for fan-out rows.
    pub redelivery_of: Option<Uuid>,
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub status: DeliveryStatus,
    pub attempt_count: i32,
    pub response_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// API client storage.
#[async_trait]
pub trait ApiClientStore: Send + Sync {
    async fn insert(&self, client: NewApiClient) -> StoreResult<ApiClientEntity>;

    /// Finds a client that has not been deleted.
    async fn find_by_id(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<ApiClientEntity>>;

    /// All clients sharing a key prefix, including revoked ones.
    async fn find_by_prefix(&self, key_prefix: &str) -> StoreResult<Vec<ApiClientEntity>>;

    /// Lists non-deleted clients, newest first, with the total match count.
    async fn list(
        &self,
        organisation_id: Uuid,
        filter: &ApiClientFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<ApiClientEntity>, i64)>;

    async fn update(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        changes: &ApiClientChanges,
    ) -> StoreResult<Option<ApiClientEntity>>;

    /// Swaps the key prefix and hash in one write.
    async fn replace_key(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        key_prefix: &str,
        key_hash: &str,
    ) -> StoreResult<Option<ApiClientEntity>>;

    async fn set_status(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        status: ClientStatus,
    ) -> StoreResult<Option<ApiClientEntity>>;

    /// Marks the client revoked and deleted. Returns false if nothing matched.
    async fn soft_delete(&self, organisation_id: Uuid, id: Uuid) -> StoreResult<bool>;

    /// Bumps the request counter and last-used fields.
    async fn record_usage(&self, id: Uuid, ip: Option<String>) -> StoreResult<()>;
}

/// Integration event storage. Events are append-only.
#[async_trait]
pub trait IntegrationEventStore: Send + Sync {
    async fn insert(&self, event: NewIntegrationEvent) -> StoreResult<IntegrationEventEntity>;

    async fn find_by_id(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<IntegrationEventEntity>>;

    /// Filtered events, newest first, with the total match count.
    async fn query(
        &self,
        organisation_id: Uuid,
        filter: &IntegrationEventFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<IntegrationEventEntity>, i64)>;

    async fn for_entity(
        &self,
        organisation_id: Uuid,
        entity_type: &str,
        entity_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<IntegrationEventEntity>>;

    /// Aggregates for events created after `since`. `days` is left 0.
    async fn stats(
        &self,
        organisation_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<IntegrationEventStats>;

    /// Per event type count and latest timestamp since `since`, by count desc.
    async fn summary(
        &self,
        organisation_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<EventTypeSummary>>;

    /// Oldest events that have not been fanned out yet.
    async fn claim_undispatched(&self, limit: i64) -> StoreResult<Vec<IntegrationEventEntity>>;

    /// Records that an event was fanned out to `webhook_count` webhooks.
    async fn mark_dispatched(&self, event_id: Uuid, webhook_count: i32) -> StoreResult<()>;

    /// Purges events created before `cutoff`. Returns the number removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

/// Webhook subscription storage.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn insert(&self, webhook: NewWebhook) -> StoreResult<WebhookEntity>;

    async fn find_by_id(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<WebhookEntity>>;

    /// Unscoped lookup used by the dispatcher.
    async fn find_any(&self, id: Uuid) -> StoreResult<Option<WebhookEntity>>;

    async fn list(
        &self,
        organisation_id: Uuid,
        is_active: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<WebhookEntity>, i64)>;

    async fn update(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        changes: &WebhookChanges,
    ) -> StoreResult<Option<WebhookEntity>>;

    async fn set_active(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        is_active: bool,
    ) -> StoreResult<Option<WebhookEntity>>;

    async fn replace_secret(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        secret_encrypted: &str,
    ) -> StoreResult<Option<WebhookEntity>>;

    async fn delete(&self, organisation_id: Uuid, id: Uuid) -> StoreResult<bool>;

    /// Active webhooks subscribed to `event_type` exactly or via `*`.
    async fn find_matching(
        &self,
        organisation_id: Uuid,
        event_type: &str,
    ) -> StoreResult<Vec<WebhookEntity>>;

    /// Resets the failure streak.
    async fn record_success(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Extends the failure streak and returns its new length.
    async fn record_failure(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<i32>;

    async fn deactivate(&self, id: Uuid) -> StoreResult<()>;
}

/// Delivery storage.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Queues a delivery. A fan-out row (`redelivery_of` unset) is queued at
    /// most once per (event, webhook); `None` means it already exists.
    async fn insert(&self, delivery: NewDelivery) -> StoreResult<Option<WebhookDeliveryEntity>>;

    /// Claims queued rows due at `now`, and `delivering` rows whose lease
    /// ran out. Claimed rows become `delivering` with `next_retry_at` set to
    /// `lease_until`.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<WebhookDeliveryEntity>>;

    /// Applies an attempt outcome to a `delivering` row. Any other row, or
    /// one already past `attempt.attempt_count`, is left alone and `None` is
    /// returned.
    async fn record_attempt(
        &self,
        id: Uuid,
        attempt: &AttemptRecord,
    ) -> StoreResult<Option<WebhookDeliveryEntity>>;

    async fn find_by_id(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<WebhookDeliveryEntity>>;

    async fn list_for_webhook(
        &self,
        webhook_id: Uuid,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<WebhookDeliveryEntity>, i64)>;

    async fn counts_for_webhook(
        &self,
        webhook_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<DeliveryCounts>;

    /// Makes a pending/retrying row due at `now`. Rows being delivered or
    /// terminal are left alone and `None` is returned.
    async fn make_due(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<WebhookDeliveryEntity>>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

/// Bundle of every store the service needs.
#[derive(Clone)]
pub struct Stores {
    pub api_clients: Arc<dyn ApiClientStore>,
    pub events: Arc<dyn IntegrationEventStore>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub deliveries: Arc<dyn DeliveryStore>,
    pool: Option<PgPool>,
}

impl Stores {
    /// PostgreSQL-backed stores sharing one pool.
    pub fn postgres(pool: PgPool) -> Self {
        use crate::repositories::{
            ApiClientRepository, DeliveryRepository, IntegrationEventRepository,
            WebhookRepository,
        };

        Self {
            api_clients: Arc::new(ApiClientRepository::new(pool.clone())),
            events: Arc::new(IntegrationEventRepository::new(pool.clone())),
            webhooks: Arc::new(WebhookRepository::new(pool.clone())),
            deliveries: Arc::new(DeliveryRepository::new(pool.clone())),
            pool: Some(pool),
        }
    }

    /// Process-local stores. Purging events removes their deliveries, as
    /// the schema's cascade does.
    pub fn in_memory() -> Self {
        use crate::memory::{
            MemoryApiClientStore, MemoryDeliveryStore, MemoryIntegrationEventStore,
            MemoryWebhookStore,
        };

        let deliveries = Arc::new(MemoryDeliveryStore::default());
        Self {
            api_clients: Arc::new(MemoryApiClientStore::default()),
            events: Arc::new(MemoryIntegrationEventStore::cascading_to(deliveries.clone())),
            webhooks: Arc::new(MemoryWebhookStore::default()),
            deliveries,
            pool: None,
        }
    }

    pub fn pool(&self) -> Option<&PgPool> {
        self.pool.as_ref()
    }

    /// Round-trips the database. Always succeeds for in-memory stores.
    pub async fn ping(&self) -> StoreResult<()> {
        if let Some(pool) = &self.pool {
            sqlx::query("SELECT 1").execute(pool).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores")
            .field("postgres", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}
