//! In-process store implementations.
//!
//! They mirror the PostgreSQL repositories row for row and are used by the
//! API test suite and for running the service without a database.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use domain::models::api_client::{ApiClientFilter, ClientStatus};
use domain::models::delivery::{DeliveryCounts, DeliveryStatus};
use domain::models::integration_event::{
    DailyEventCount, EventTypeCount, EventTypeSummary, IntegrationEventFilter,
    IntegrationEventStats, NewIntegrationEvent,
};
use domain::models::webhook::subscription_matches;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::entities::{
    ApiClientEntity, IntegrationEventEntity, WebhookDeliveryEntity, WebhookEntity,
};
use crate::store::{
    ApiClientChanges, ApiClientStore, AttemptRecord, DeliveryStore, IntegrationEventStore,
    NewApiClient, NewDelivery, NewWebhook, StoreResult, WebhookChanges, WebhookStore,
};

fn page<T>(rows: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    rows.into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[derive(Debug, Default)]
pub struct MemoryApiClientStore {
    clients: RwLock<HashMap<Uuid, ApiClientEntity>>,
}

#[async_trait]
impl ApiClientStore for MemoryApiClientStore {
    async fn insert(&self, client: NewApiClient) -> StoreResult<ApiClientEntity> {
        let now = Utc::now();
        let entity = ApiClientEntity {
            id: Uuid::new_v4(),
            organisation_id: client.organisation_id,
            name: client.name,
            description: client.description,
            key_prefix: client.key_prefix,
            key_hash: client.key_hash,
            scopes: client.scopes,
            ip_allowlist: client.ip_allowlist,
            rate_limit_tier: client.rate_limit_tier.as_str().to_string(),
            status: ClientStatus::Active.as_str().to_string(),
            request_count: 0,
            last_used_at: None,
            last_used_ip: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.clients.write().await.insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn find_by_id(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<ApiClientEntity>> {
        Ok(self
            .clients
            .read()
            .await
            .get(&id)
            .filter(|c| c.organisation_id == organisation_id && !c.is_deleted())
            .cloned())
    }

    async fn find_by_prefix(&self, key_prefix: &str) -> StoreResult<Vec<ApiClientEntity>> {
        Ok(self
            .clients
            .read()
            .await
            .values()
            .filter(|c| c.key_prefix == key_prefix)
            .cloned()
            .collect())
    }

    async fn list(
        &self,
        organisation_id: Uuid,
        filter: &ApiClientFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<ApiClientEntity>, i64)> {
        let mut rows: Vec<ApiClientEntity> = self
            .clients
            .read()
            .await
            .values()
            .filter(|c| c.organisation_id == organisation_id && !c.is_deleted())
            .filter(|c| filter.status.map_or(true, |s| c.status() == s))
            .filter(|c| {
                filter
                    .scope
                    .as_ref()
                    .map_or(true, |scope| c.scopes.contains(scope))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = rows.len() as i64;
        Ok((page(rows, limit, offset), total))
    }

    async fn update(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        changes: &ApiClientChanges,
    ) -> StoreResult<Option<ApiClientEntity>> {
        let mut clients = self.clients.write().await;
        let Some(client) = clients
            .get_mut(&id)
            .filter(|c| c.organisation_id == organisation_id && !c.is_deleted())
        else {
            return Ok(None);
        };
        if let Some(name) = &changes.name {
            client.name = name.clone();
        }
        if let Some(description) = &changes.description {
            client.description = Some(description.clone());
        }
        if let Some(scopes) = &changes.scopes {
            client.scopes = scopes.clone();
        }
        if let Some(ip_allowlist) = &changes.ip_allowlist {
            client.ip_allowlist = ip_allowlist.clone();
        }
        if let Some(tier) = changes.rate_limit_tier {
            client.rate_limit_tier = tier.as_str().to_string();
        }
        client.updated_at = Utc::now();
        Ok(Some(client.clone()))
    }

    async fn replace_key(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        key_prefix: &str,
        key_hash: &str,
    ) -> StoreResult<Option<ApiClientEntity>> {
        let mut clients = self.clients.write().await;
        let Some(client) = clients
            .get_mut(&id)
            .filter(|c| c.organisation_id == organisation_id && !c.is_deleted())
        else {
            return Ok(None);
        };
        client.key_prefix = key_prefix.to_string();
        client.key_hash = key_hash.to_string();
        client.updated_at = Utc::now();
        Ok(Some(client.clone()))
    }

    async fn set_status(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        status: ClientStatus,
    ) -> StoreResult<Option<ApiClientEntity>> {
        let mut clients = self.clients.write().await;
        let Some(client) = clients
            .get_mut(&id)
            .filter(|c| c.organisation_id == organisation_id && !c.is_deleted())
        else {
            return Ok(None);
        };
        client.status = status.as_str().to_string();
        client.updated_at = Utc::now();
        Ok(Some(client.clone()))
    }

    async fn soft_delete(&self, organisation_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut clients = self.clients.write().await;
        let Some(client) = clients
            .get_mut(&id)
            .filter(|c| c.organisation_id == organisation_id && !c.is_deleted())
        else {
            return Ok(false);
        };
        let now = Utc::now();
        client.status = ClientStatus::Revoked.as_str().to_string();
        client.deleted_at = Some(now);
        client.updated_at = now;
        Ok(true)
    }

    async fn record_usage(&self, id: Uuid, ip: Option<String>) -> StoreResult<()> {
        if let Some(client) = self.clients.write().await.get_mut(&id) {
            client.request_count += 1;
            client.last_used_at = Some(Utc::now());
            if ip.is_some() {
                client.last_used_ip = ip;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct EventLog {
    /// Insertion order doubles as creation order.
    events: Vec<IntegrationEventEntity>,
    dispatched: HashMap<Uuid, i32>,
}

#[derive(Debug, Default)]
pub struct MemoryIntegrationEventStore {
    log: RwLock<EventLog>,
    /// Deliveries purged together with their events.
    deliveries: Option<Arc<MemoryDeliveryStore>>,
}

impl MemoryIntegrationEventStore {
    /// Event store whose purges cascade into `deliveries`.
    pub fn cascading_to(deliveries: Arc<MemoryDeliveryStore>) -> Self {
        Self {
            log: RwLock::default(),
            deliveries: Some(deliveries),
        }
    }

    fn matches(filter: &IntegrationEventFilter, event: &IntegrationEventEntity) -> bool {
        filter.event_type.as_ref().map_or(true, |t| &event.event_type == t)
            && filter.source.map_or(true, |s| event.source() == s)
            && filter.entity_type.as_ref().map_or(true, |t| &event.entity_type == t)
            && filter.entity_id.as_ref().map_or(true, |i| &event.entity_id == i)
            && filter.start.map_or(true, |start| event.created_at >= start)
            && filter.end.map_or(true, |end| event.created_at <= end)
    }

    /// Events of one organisation created after `since`.
    async fn window(&self, organisation_id: Uuid, since: DateTime<Utc>) -> Vec<IntegrationEventEntity> {
        self.log
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.organisation_id == organisation_id && e.created_at > since)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl IntegrationEventStore for MemoryIntegrationEventStore {
    async fn insert(&self, event: NewIntegrationEvent) -> StoreResult<IntegrationEventEntity> {
        let entity = IntegrationEventEntity {
            id: Uuid::new_v4(),
            organisation_id: event.organisation_id,
            event_type: event.event_type,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            payload: event.payload,
            source: event.source.as_str().to_string(),
            triggered_by: event.triggered_by,
            created_at: Utc::now(),
        };
        self.log.write().await.events.push(entity.clone());
        Ok(entity)
    }

    async fn find_by_id(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<IntegrationEventEntity>> {
        Ok(self
            .log
            .read()
            .await
            .events
            .iter()
            .find(|e| e.id == id && e.organisation_id == organisation_id)
            .cloned())
    }

    async fn query(
        &self,
        organisation_id: Uuid,
        filter: &IntegrationEventFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<IntegrationEventEntity>, i64)> {
        let rows: Vec<IntegrationEventEntity> = self
            .log
            .read()
            .await
            .events
            .iter()
            .rev()
            .filter(|e| e.organisation_id == organisation_id && Self::matches(filter, e))
            .cloned()
            .collect();
        let total = rows.len() as i64;
        Ok((page(rows, limit, offset), total))
    }

    async fn for_entity(
        &self,
        organisation_id: Uuid,
        entity_type: &str,
        entity_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<IntegrationEventEntity>> {
        let rows = self
            .log
            .read()
            .await
            .events
            .iter()
            .rev()
            .filter(|e| {
                e.organisation_id == organisation_id
                    && e.entity_type == entity_type
                    && e.entity_id == entity_id
            })
            .cloned()
            .collect();
        Ok(page(rows, limit, 0))
    }

    async fn stats(
        &self,
        organisation_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<IntegrationEventStats> {
        let events = self.window(organisation_id, since).await;

        let entity_types: HashSet<&str> = events.iter().map(|e| e.entity_type.as_str()).collect();
        let mut by_type: HashMap<&str, i64> = HashMap::new();
        let mut by_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
        for event in &events {
            *by_type.entry(event.event_type.as_str()).or_default() += 1;
            *by_day.entry(event.created_at.date_naive()).or_default() += 1;
        }

        let mut by_event_type: Vec<EventTypeCount> = by_type
            .into_iter()
            .map(|(event_type, count)| EventTypeCount {
                event_type: event_type.to_string(),
                count,
            })
            .collect();
        by_event_type.sort_by(|a, b| b.count.cmp(&a.count).then(a.event_type.cmp(&b.event_type)));
        by_event_type.truncate(10);

        Ok(IntegrationEventStats {
            days: 0,
            total_events: events.len() as i64,
            entity_types: entity_types.len() as i64,
            active_days: by_day.len() as i64,
            by_event_type,
            by_day: by_day
                .into_iter()
                .rev()
                .map(|(date, count)| DailyEventCount { date, count })
                .collect(),
        })
    }

    async fn summary(
        &self,
        organisation_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<EventTypeSummary>> {
        let events = self.window(organisation_id, since).await;

        let mut grouped: HashMap<&str, (i64, DateTime<Utc>)> = HashMap::new();
        for event in &events {
            let entry = grouped
                .entry(event.event_type.as_str())
                .or_insert((0, event.created_at));
            entry.0 += 1;
            entry.1 = entry.1.max(event.created_at);
        }

        let mut summary: Vec<EventTypeSummary> = grouped
            .into_iter()
            .map(|(event_type, (count, latest))| EventTypeSummary {
                event_type: event_type.to_string(),
                count,
                latest,
            })
            .collect();
        summary.sort_by(|a, b| b.count.cmp(&a.count).then(a.event_type.cmp(&b.event_type)));
        Ok(summary)
    }

    async fn claim_undispatched(&self, limit: i64) -> StoreResult<Vec<IntegrationEventEntity>> {
        let log = self.log.read().await;
        let rows = log
            .events
            .iter()
            .filter(|e| !log.dispatched.contains_key(&e.id))
            .cloned()
            .collect();
        Ok(page(rows, limit, 0))
    }

    async fn mark_dispatched(&self, event_id: Uuid, webhook_count: i32) -> StoreResult<()> {
        self.log
            .write()
            .await
            .dispatched
            .entry(event_id)
            .or_insert(webhook_count);
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut removed = HashSet::new();
        {
            let mut log = self.log.write().await;
            let EventLog { events, dispatched } = &mut *log;
            events.retain(|e| {
                let keep = e.created_at >= cutoff;
                if !keep {
                    dispatched.remove(&e.id);
                    removed.insert(e.id);
                }
                keep
            });
        }

        if let Some(deliveries) = &self.deliveries {
            deliveries.remove_for_events(&removed).await;
        }
        Ok(removed.len() as u64)
    }
}

#[derive(Debug, Default)]
pub struct MemoryWebhookStore {
    webhooks: RwLock<HashMap<Uuid, WebhookEntity>>,
}

impl MemoryWebhookStore {
    fn apply_active(webhook: &mut WebhookEntity, is_active: bool) {
        if is_active && !webhook.is_active {
            webhook.consecutive_failures = 0;
        }
        webhook.is_active = is_active;
    }
}

#[async_trait]
impl WebhookStore for MemoryWebhookStore {
    async fn insert(&self, webhook: NewWebhook) -> StoreResult<WebhookEntity> {
        let now = Utc::now();
        let entity = WebhookEntity {
            id: Uuid::new_v4(),
            organisation_id: webhook.organisation_id,
            name: webhook.name,
            description: webhook.description,
            target_url: webhook.target_url,
            event_types: webhook.event_types,
            secret_encrypted: webhook.secret_encrypted,
            headers_encrypted: webhook.headers_encrypted,
            is_active: webhook.is_active,
            consecutive_failures: 0,
            last_triggered_at: None,
            last_success_at: None,
            last_failure_at: None,
            created_at: now,
            updated_at: now,
        };
        self.webhooks.write().await.insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn find_by_id(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<WebhookEntity>> {
        Ok(self
            .webhooks
            .read()
            .await
            .get(&id)
            .filter(|w| w.organisation_id == organisation_id)
            .cloned())
    }

    async fn find_any(&self, id: Uuid) -> StoreResult<Option<WebhookEntity>> {
        Ok(self.webhooks.read().await.get(&id).cloned())
    }

    async fn list(
        &self,
        organisation_id: Uuid,
        is_active: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<WebhookEntity>, i64)> {
        let mut rows: Vec<WebhookEntity> = self
            .webhooks
            .read()
            .await
            .values()
            .filter(|w| w.organisation_id == organisation_id)
            .filter(|w| is_active.map_or(true, |active| w.is_active == active))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = rows.len() as i64;
        Ok((page(rows, limit, offset), total))
    }

    async fn update(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        changes: &WebhookChanges,
    ) -> StoreResult<Option<WebhookEntity>> {
        let mut webhooks = self.webhooks.write().await;
        let Some(webhook) = webhooks
            .get_mut(&id)
            .filter(|w| w.organisation_id == organisation_id)
        else {
            return Ok(None);
        };
        if let Some(name) = &changes.name {
            webhook.name = name.clone();
        }
        if let Some(description) = &changes.description {
            webhook.description = Some(description.clone());
        }
        if let Some(target_url) = &changes.target_url {
            webhook.target_url = target_url.clone();
        }
        if let Some(event_types) = &changes.event_types {
            webhook.event_types = event_types.clone();
        }
        if let Some(is_active) = changes.is_active {
            Self::apply_active(webhook, is_active);
        }
        if let Some(headers_encrypted) = &changes.headers_encrypted {
            webhook.headers_encrypted = headers_encrypted.clone();
        }
        webhook.updated_at = Utc::now();
        Ok(Some(webhook.clone()))
    }

    async fn set_active(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        is_active: bool,
    ) -> StoreResult<Option<WebhookEntity>> {
        let mut webhooks = self.webhooks.write().await;
        let Some(webhook) = webhooks
            .get_mut(&id)
            .filter(|w| w.organisation_id == organisation_id)
        else {
            return Ok(None);
        };
        Self::apply_active(webhook, is_active);
        webhook.updated_at = Utc::now();
        Ok(Some(webhook.clone()))
    }

    async fn replace_secret(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        secret_encrypted: &str,
    ) -> StoreResult<Option<WebhookEntity>> {
        let mut webhooks = self.webhooks.write().await;
        let Some(webhook) = webhooks
            .get_mut(&id)
            .filter(|w| w.organisation_id == organisation_id)
        else {
            return Ok(None);
        };
        webhook.secret_encrypted = secret_encrypted.to_string();
        webhook.updated_at = Utc::now();
        Ok(Some(webhook.clone()))
    }

    async fn delete(&self, organisation_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut webhooks = self.webhooks.write().await;
        if webhooks
            .get(&id)
            .is_some_and(|w| w.organisation_id == organisation_id)
        {
            webhooks.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn find_matching(
        &self,
        organisation_id: Uuid,
        event_type: &str,
    ) -> StoreResult<Vec<WebhookEntity>> {
        let mut rows: Vec<WebhookEntity> = self
            .webhooks
            .read()
            .await
            .values()
            .filter(|w| w.organisation_id == organisation_id && w.is_active)
            .filter(|w| subscription_matches(&w.event_types, event_type))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn record_success(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(webhook) = self.webhooks.write().await.get_mut(&id) {
            webhook.consecutive_failures = 0;
            webhook.last_triggered_at = Some(at);
            webhook.last_success_at = Some(at);
        }
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<i32> {
        let mut webhooks = self.webhooks.write().await;
        let Some(webhook) = webhooks.get_mut(&id) else {
            return Ok(0);
        };
        webhook.consecutive_failures += 1;
        webhook.last_triggered_at = Some(at);
        webhook.last_failure_at = Some(at);
        Ok(webhook.consecutive_failures)
    }

    async fn deactivate(&self, id: Uuid) -> StoreResult<()> {
        if let Some(webhook) = self.webhooks.write().await.get_mut(&id) {
            webhook.is_active = false;
            webhook.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryDeliveryStore {
    deliveries: RwLock<HashMap<Uuid, WebhookDeliveryEntity>>,
}

impl MemoryDeliveryStore {
    fn is_open(delivery: &WebhookDeliveryEntity) -> bool {
        !delivery.status().is_terminal()
    }

    /// Drops every delivery of the given events, like the foreign key
    /// cascade on `webhook_deliveries.integration_event_id`.
    async fn remove_for_events(&self, event_ids: &HashSet<Uuid>) {
        self.deliveries
            .write()
            .await
            .retain(|_, d| !event_ids.contains(&d.integration_event_id));
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    async fn insert(&self, delivery: NewDelivery) -> StoreResult<Option<WebhookDeliveryEntity>> {
        let mut deliveries = self.deliveries.write().await;
        if delivery.redelivery_of.is_none()
            && deliveries.values().any(|d| {
                d.redelivery_of.is_none()
                    && d.integration_event_id == delivery.integration_event_id
                    && d.webhook_id == delivery.webhook_id
            })
        {
            return Ok(None);
        }

        let now = Utc::now();
        let entity = WebhookDeliveryEntity {
            id: Uuid::new_v4(),
            webhook_id: delivery.webhook_id,
            integration_event_id: delivery.integration_event_id,
            organisation_id: delivery.organisation_id,
            event_type: delivery.event_type,
            payload: delivery.payload,
            status: delivery.status.as_str().to_string(),
            attempt_count: 0,
            response_status_code: None,
            response_body: None,
            response_time_ms: None,
            error_message: None,
            last_attempt_at: None,
            next_retry_at: Some(delivery.next_retry_at),
            delivered_at: None,
            redelivery_of: delivery.redelivery_of,
            created_at: now,
            updated_at: now,
        };
        deliveries.insert(entity.id, entity.clone());
        Ok(Some(entity))
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<WebhookDeliveryEntity>> {
        let mut deliveries = self.deliveries.write().await;
        let mut due: Vec<&mut WebhookDeliveryEntity> = deliveries
            .values_mut()
            .filter(|d| Self::is_open(d) && d.next_retry_at.is_some_and(|at| at <= now))
            .collect();
        due.sort_by_key(|d| d.next_retry_at);

        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|d| {
                d.status = DeliveryStatus::Delivering.as_str().to_string();
                d.next_retry_at = Some(lease_until);
                d.updated_at = Utc::now();
                d.clone()
            })
            .collect())
    }

    async fn record_attempt(
        &self,
        id: Uuid,
        attempt: &AttemptRecord,
    ) -> StoreResult<Option<WebhookDeliveryEntity>> {
        let mut deliveries = self.deliveries.write().await;
        let Some(delivery) = deliveries.get_mut(&id).filter(|d| {
            d.status() == DeliveryStatus::Delivering && d.attempt_count <= attempt.attempt_count
        }) else {
            return Ok(None);
        };
        delivery.status = attempt.status.as_str().to_string();
        delivery.attempt_count = attempt.attempt_count;
        delivery.response_status_code = attempt.response_status_code;
        delivery.response_body = attempt.response_body.clone();
        delivery.response_time_ms = attempt.response_time_ms;
        delivery.error_message = attempt.error_message.clone();
        delivery.last_attempt_at = Some(attempt.attempted_at);
        delivery.next_retry_at = attempt.next_retry_at;
        if attempt.status == DeliveryStatus::Delivered {
            delivery.delivered_at = Some(attempt.attempted_at);
        }
        delivery.updated_at = Utc::now();
        Ok(Some(delivery.clone()))
    }

    async fn find_by_id(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> StoreResult<Option<WebhookDeliveryEntity>> {
        Ok(self
            .deliveries
            .read()
            .await
            .get(&id)
            .filter(|d| d.organisation_id == organisation_id)
            .cloned())
    }

    async fn list_for_webhook(
        &self,
        webhook_id: Uuid,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<WebhookDeliveryEntity>, i64)> {
        let mut rows: Vec<WebhookDeliveryEntity> = self
            .deliveries
            .read()
            .await
            .values()
            .filter(|d| d.webhook_id == webhook_id)
            .filter(|d| status.map_or(true, |s| d.status() == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = rows.len() as i64;
        Ok((page(rows, limit, offset), total))
    }

    async fn counts_for_webhook(
        &self,
        webhook_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<DeliveryCounts> {
        let deliveries = self.deliveries.read().await;
        let mut counts = DeliveryCounts::default();
        let mut response_times = Vec::new();

        for delivery in deliveries
            .values()
            .filter(|d| d.webhook_id == webhook_id && d.created_at > since)
        {
            counts.total += 1;
            match delivery.status() {
                DeliveryStatus::Delivered => {
                    counts.delivered += 1;
                    if let Some(ms) = delivery.response_time_ms {
                        response_times.push(ms as f64);
                    }
                }
                DeliveryStatus::Exhausted | DeliveryStatus::Failed => counts.failed += 1,
                DeliveryStatus::Pending
                | DeliveryStatus::Delivering
                | DeliveryStatus::Retrying => counts.pending += 1,
            }
        }

        if !response_times.is_empty() {
            counts.avg_response_time_ms =
                Some(response_times.iter().sum::<f64>() / response_times.len() as f64);
        }
        Ok(counts)
    }

    async fn make_due(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<WebhookDeliveryEntity>> {
        let mut deliveries = self.deliveries.write().await;
        let Some(delivery) = deliveries.get_mut(&id).filter(|d| d.status().is_queued()) else {
            return Ok(None);
        };
        delivery.next_retry_at = Some(now);
        delivery.updated_at = Utc::now();
        Ok(Some(delivery.clone()))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut deliveries = self.deliveries.write().await;
        let before = deliveries.len();
        deliveries.retain(|_, d| d.created_at >= cutoff);
        Ok((before - deliveries.len()) as u64)
    }
}
