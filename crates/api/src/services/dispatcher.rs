//! Webhook dispatcher.
//!
//! Fans integration events out to matching webhooks and drives every
//! (event, webhook) delivery through
//! `delivering -> (retrying -> delivering)* -> delivered | exhausted`, or
//! `failed` when the webhook is gone or its secret is unreadable.
//!
//! A row is `delivering` for as long as one attempt is in flight, and only
//! that attempt may write its outcome. Its `next_retry_at` holds a lease past
//! the time any attempt could take, so a crash mid-batch leaves the row for
//! the retry sweep instead of losing it. Errors from a single attempt are
//! recorded on its row and never abort the batch.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use domain::models::delivery::{DeliveryStatus, DispatchSummary, WebhookPayload};
use domain::models::webhook::{
    is_reserved_header, CustomHeaders, TestWebhookResponse, TEST_EVENT_TYPE,
};
use domain::services::retry::{RetryDecision, RetryPolicy};
use futures::stream::{self, StreamExt};
use persistence::entities::{IntegrationEventEntity, WebhookDeliveryEntity, WebhookEntity};
use persistence::{
    AttemptRecord, DeliveryStore, IntegrationEventStore, NewDelivery, Stores, WebhookStore,
};
use serde_json::json;
use shared::crypto::SecretCodec;
use shared::signing::sign;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::transport::{OutboundRequest, TransportResponse, WebhookTransport};
use crate::config::WebhookConfig;
use crate::error::ApiError;

pub const USER_AGENT: &str = "EHS-Webhook/1.0";
pub const EVENT_HEADER: &str = "X-EHS-Event";
pub const DELIVERY_HEADER: &str = "X-EHS-Delivery";
pub const SIGNATURE_HEADER: &str = "X-EHS-Signature";
pub const TIMESTAMP_HEADER: &str = "X-EHS-Timestamp";

const TRUNCATION_MARKER: &str = "... (truncated)";

/// How long a claimed delivery stays invisible to the retry sweep.
const DELIVERY_LEASE_SECS: i64 = 600;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub retry: RetryPolicy,
    /// Failure streak that switches a webhook off. 0 never does.
    pub auto_disable_after: u32,
    pub concurrency: usize,
    pub response_body_limit: usize,
    pub lease: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            auto_disable_after: config.auto_disable_after_failures,
            concurrency: config.delivery_concurrency.max(1),
            response_body_limit: config.response_body_limit,
            lease: Duration::seconds(DELIVERY_LEASE_SECS),
        }
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered,
    Retrying,
    Exhausted,
    /// Terminal without a request being sent.
    Failed,
    /// Storage failed mid-attempt; the lease hands the row to a later sweep.
    Deferred,
}

impl AttemptOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Delivered => "delivered",
            AttemptOutcome::Retrying => "retrying",
            AttemptOutcome::Exhausted => "exhausted",
            AttemptOutcome::Failed => "failed",
            AttemptOutcome::Deferred => "deferred",
        }
    }

    fn tally(self, summary: &mut DispatchSummary) {
        summary.processed += 1;
        match self {
            AttemptOutcome::Delivered => summary.delivered += 1,
            AttemptOutcome::Exhausted | AttemptOutcome::Failed => summary.failed += 1,
            AttemptOutcome::Retrying | AttemptOutcome::Deferred => summary.retrying += 1,
        }
    }
}

pub struct WebhookDispatcher {
    events: Arc<dyn IntegrationEventStore>,
    webhooks: Arc<dyn WebhookStore>,
    deliveries: Arc<dyn DeliveryStore>,
    codec: SecretCodec,
    transport: Arc<dyn WebhookTransport>,
    settings: DispatchSettings,
}

impl WebhookDispatcher {
    pub fn new(
        stores: &Stores,
        codec: SecretCodec,
        transport: Arc<dyn WebhookTransport>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            events: stores.events.clone(),
            webhooks: stores.webhooks.clone(),
            deliveries: stores.deliveries.clone(),
            codec,
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Fans out up to `batch_size` undispatched events and attempts every
    /// resulting delivery once.
    pub async fn process_pending_events(&self, batch_size: i64) -> DispatchSummary {
        let events = match self.events.claim_undispatched(batch_size).await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "Failed to load undispatched integration events");
                return DispatchSummary::default();
            }
        };

        let mut work = Vec::new();
        for event in events {
            work.extend(self.fan_out(&event).await);
        }

        self.run_attempts(work).await
    }

    /// Re-attempts up to `batch_size` deliveries whose retry time has passed.
    pub async fn process_retry_events(&self, batch_size: i64) -> DispatchSummary {
        let now = Utc::now();
        let due = match self
            .deliveries
            .claim_due(now, now + self.settings.lease, batch_size)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to claim due webhook deliveries");
                return DispatchSummary::default();
            }
        };

        self.run_attempts(due.into_iter().map(|d| (d, None)).collect())
            .await
    }

    /// Signs and sends a `test` payload without persisting anything.
    pub async fn send_test(&self, webhook: &WebhookEntity) -> Result<TestWebhookResponse, ApiError> {
        let secret = self.codec.decrypt(&webhook.secret_encrypted)?;
        let payload = WebhookPayload {
            event_id: Uuid::new_v4(),
            event_type: TEST_EVENT_TYPE.to_string(),
            entity_type: "webhook".to_string(),
            entity_id: webhook.id.to_string(),
            organisation_id: webhook.organisation_id,
            occurred_at: Utc::now(),
            data: json!({
                "message": "Test delivery from EHS integrations",
                "webhook_name": webhook.name,
            }),
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| ApiError::Internal(format!("Failed to serialize test payload: {}", e)))?;

        let headers = self.custom_headers(webhook)?;
        let request = with_custom_headers(
            signed_request(
                &webhook.target_url,
                TEST_EVENT_TYPE,
                Uuid::new_v4(),
                body,
                &secret,
                Utc::now().timestamp(),
            ),
            &headers,
        );

        let started = Instant::now();
        let result = self.transport.send(request).await;
        let response_time_ms = elapsed_ms(started);

        info!(webhook_id = %webhook.id, "Test webhook sent");

        Ok(match result {
            Ok(response) => TestWebhookResponse {
                success: response.is_success(),
                status_code: Some(response.status),
                response_time_ms,
                error: (!response.is_success()).then(|| http_error(&response)),
            },
            Err(e) => TestWebhookResponse {
                success: false,
                status_code: None,
                response_time_ms,
                error: Some(e.to_string()),
            },
        })
    }

    /// Creates one claimed delivery per matching webhook and marks the event
    /// dispatched. Any lookup or queueing failure leaves the event for the
    /// next tick, which only adds the pairings still missing.
    async fn fan_out(
        &self,
        event: &IntegrationEventEntity,
    ) -> Vec<(WebhookDeliveryEntity, Option<WebhookEntity>)> {
        let webhooks = match self
            .webhooks
            .find_matching(event.organisation_id, &event.event_type)
            .await
        {
            Ok(webhooks) => webhooks,
            Err(e) => {
                error!(event_id = %event.id, error = %e, "Failed to resolve matching webhooks");
                return Vec::new();
            }
        };

        let payload = match serde_json::to_value(payload_for(event)) {
            Ok(payload) => payload,
            Err(e) => {
                error!(event_id = %event.id, error = %e, "Failed to build webhook payload");
                return Vec::new();
            }
        };

        let lease_until = Utc::now() + self.settings.lease;
        let mut work = Vec::with_capacity(webhooks.len());
        let mut queued_earlier = 0;
        let mut incomplete = false;
        for webhook in webhooks {
            let queued = self
                .deliveries
                .insert(NewDelivery {
                    webhook_id: webhook.id,
                    integration_event_id: event.id,
                    organisation_id: event.organisation_id,
                    event_type: event.event_type.clone(),
                    payload: payload.clone(),
                    status: DeliveryStatus::Delivering,
                    next_retry_at: lease_until,
                    redelivery_of: None,
                })
                .await;

            match queued {
                Ok(Some(delivery)) => work.push((delivery, Some(webhook))),
                Ok(None) => {
                    queued_earlier += 1;
                    debug!(event_id = %event.id, webhook_id = %webhook.id, "Delivery already queued");
                }
                Err(e) => {
                    incomplete = true;
                    error!(
                        event_id = %event.id,
                        webhook_id = %webhook.id,
                        error = %e,
                        "Failed to queue webhook delivery"
                    );
                }
            }
        }

        if incomplete {
            warn!(event_id = %event.id, "Event fan-out incomplete, retrying next tick");
            return work;
        }

        let count = i32::try_from(work.len() + queued_earlier).unwrap_or(i32::MAX);
        if let Err(e) = self.events.mark_dispatched(event.id, count).await {
            error!(event_id = %event.id, error = %e, "Failed to mark event dispatched");
        }
        if count == 0 {
            debug!(event_id = %event.id, event_type = %event.event_type, "No matching webhooks");
        }

        work
    }

    async fn run_attempts(
        &self,
        work: Vec<(WebhookDeliveryEntity, Option<WebhookEntity>)>,
    ) -> DispatchSummary {
        stream::iter(work)
            .map(|(delivery, webhook)| self.attempt(delivery, webhook))
            .buffer_unordered(self.settings.concurrency.max(1))
            .fold(DispatchSummary::default(), |mut summary, outcome| async move {
                outcome.tally(&mut summary);
                summary
            })
            .await
    }

    /// Runs one delivery attempt and records its outcome.
    pub async fn attempt(
        &self,
        delivery: WebhookDeliveryEntity,
        webhook: Option<WebhookEntity>,
    ) -> AttemptOutcome {
        let outcome = self.try_attempt(&delivery, webhook).await;
        metrics::counter!("webhook_delivery_attempts_total", "outcome" => outcome.as_str())
            .increment(1);
        outcome
    }

    async fn try_attempt(
        &self,
        delivery: &WebhookDeliveryEntity,
        webhook: Option<WebhookEntity>,
    ) -> AttemptOutcome {
        let webhook = match webhook {
            Some(webhook) => Some(webhook),
            None => match self.webhooks.find_any(delivery.webhook_id).await {
                Ok(webhook) => webhook,
                Err(e) => {
                    warn!(delivery_id = %delivery.id, error = %e, "Failed to load webhook");
                    return AttemptOutcome::Deferred;
                }
            },
        };

        let webhook = match webhook {
            Some(webhook) if webhook.is_active => webhook,
            Some(_) => return self.fail(delivery, "Webhook is inactive").await,
            None => return self.fail(delivery, "Webhook no longer exists").await,
        };

        let secret = match self.codec.decrypt(&webhook.secret_encrypted) {
            Ok(secret) => secret,
            Err(e) => {
                error!(
                    webhook_id = %webhook.id,
                    delivery_id = %delivery.id,
                    error = %e,
                    "Cannot decrypt webhook signing secret"
                );
                return self
                    .fail(delivery, "Signing secret could not be decrypted")
                    .await;
            }
        };

        let headers = match self.custom_headers(&webhook) {
            Ok(headers) => headers,
            Err(e) => {
                error!(
                    webhook_id = %webhook.id,
                    delivery_id = %delivery.id,
                    error = %e,
                    "Cannot decrypt webhook custom headers"
                );
                return self
                    .fail(delivery, "Custom headers could not be decrypted")
                    .await;
            }
        };

        let body = match serde_json::to_vec(&delivery.payload) {
            Ok(body) => body,
            Err(e) => {
                error!(delivery_id = %delivery.id, error = %e, "Unserializable delivery payload");
                return self.fail(delivery, "Payload could not be serialized").await;
            }
        };

        let attempt_number = delivery.attempt_count.saturating_add(1);
        let request = with_custom_headers(
            signed_request(
                &webhook.target_url,
                &delivery.event_type,
                delivery.id,
                body,
                &secret,
                Utc::now().timestamp(),
            ),
            &headers,
        );

        let started = Instant::now();
        let result = self.transport.send(request).await;
        metrics::histogram!("webhook_delivery_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        let response_time_ms = elapsed_ms(started);
        let attempted_at = Utc::now();

        let (status_code, response_body, error_message) = match &result {
            Ok(response) => (
                Some(i32::from(response.status)),
                Some(truncate_body(&response.body, self.settings.response_body_limit)),
                (!response.is_success()).then(|| http_error(response)),
            ),
            Err(e) => (None, None, Some(e.to_string())),
        };

        let delivered = matches!(&result, Ok(response) if response.is_success());
        let (status, next_retry_at, outcome) = if delivered {
            (DeliveryStatus::Delivered, None, AttemptOutcome::Delivered)
        } else {
            match self
                .settings
                .retry
                .decide(attempt_number.max(1) as u32, attempted_at)
            {
                RetryDecision::Retry { next_attempt_at } => (
                    DeliveryStatus::Retrying,
                    Some(next_attempt_at),
                    AttemptOutcome::Retrying,
                ),
                RetryDecision::GiveUp => (DeliveryStatus::Exhausted, None, AttemptOutcome::Exhausted),
            }
        };

        let record = AttemptRecord {
            status,
            attempt_count: attempt_number,
            response_status_code: status_code,
            response_body,
            response_time_ms: Some(response_time_ms),
            error_message: error_message.clone(),
            attempted_at,
            next_retry_at,
        };
        if !self.store_attempt(delivery.id, &record).await {
            return AttemptOutcome::Deferred;
        }

        if delivered {
            if let Err(e) = self.webhooks.record_success(webhook.id, attempted_at).await {
                warn!(webhook_id = %webhook.id, error = %e, "Failed to reset failure streak");
            }
            info!(
                webhook_id = %webhook.id,
                delivery_id = %delivery.id,
                attempt = attempt_number,
                status_code = status_code,
                "Webhook delivered"
            );
        } else {
            self.note_failure(&webhook, attempted_at).await;
            warn!(
                webhook_id = %webhook.id,
                delivery_id = %delivery.id,
                attempt = attempt_number,
                status_code = status_code,
                status = %status,
                error = error_message.as_deref().unwrap_or(""),
                "Webhook delivery failed"
            );
        }

        outcome
    }

    /// Opens the webhook's sealed custom headers, if it has any.
    fn custom_headers(&self, webhook: &WebhookEntity) -> Result<CustomHeaders, ApiError> {
        let Some(sealed) = &webhook.headers_encrypted else {
            return Ok(CustomHeaders::new());
        };
        let json = self.codec.decrypt(sealed)?;
        serde_json::from_str(&json)
            .map_err(|e| ApiError::Internal(format!("Malformed custom headers: {}", e)))
    }

    /// Ends a delivery without sending it.
    async fn fail(&self, delivery: &WebhookDeliveryEntity, reason: &str) -> AttemptOutcome {
        let record = AttemptRecord {
            status: DeliveryStatus::Failed,
            attempt_count: delivery.attempt_count,
            response_status_code: None,
            response_body: None,
            response_time_ms: None,
            error_message: Some(reason.to_string()),
            attempted_at: Utc::now(),
            next_retry_at: None,
        };
        if !self.store_attempt(delivery.id, &record).await {
            return AttemptOutcome::Deferred;
        }
        warn!(
            delivery_id = %delivery.id,
            webhook_id = %delivery.webhook_id,
            reason = reason,
            "Webhook delivery failed permanently"
        );
        AttemptOutcome::Failed
    }

    /// Returns false if the outcome could not be written.
    async fn store_attempt(&self, delivery_id: Uuid, record: &AttemptRecord) -> bool {
        match self.deliveries.record_attempt(delivery_id, record).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                warn!(delivery_id = %delivery_id, "Delivery no longer claimed, outcome dropped");
                true
            }
            Err(e) => {
                error!(delivery_id = %delivery_id, error = %e, "Failed to record delivery attempt");
                false
            }
        }
    }

    async fn note_failure(&self, webhook: &WebhookEntity, at: DateTime<Utc>) {
        let streak = match self.webhooks.record_failure(webhook.id, at).await {
            Ok(streak) => streak,
            Err(e) => {
                warn!(webhook_id = %webhook.id, error = %e, "Failed to record webhook failure");
                return;
            }
        };

        let threshold = i32::try_from(self.settings.auto_disable_after).unwrap_or(i32::MAX);
        if threshold == 0 || streak < threshold {
            return;
        }

        match self.webhooks.deactivate(webhook.id).await {
            Ok(()) => warn!(
                webhook_id = %webhook.id,
                organisation_id = %webhook.organisation_id,
                consecutive_failures = streak,
                "Webhook disabled after consecutive delivery failures"
            ),
            Err(e) => error!(webhook_id = %webhook.id, error = %e, "Failed to disable webhook"),
        }
    }
}

fn payload_for(event: &IntegrationEventEntity) -> WebhookPayload {
    WebhookPayload {
        event_id: event.id,
        event_type: event.event_type.clone(),
        entity_type: event.entity_type.clone(),
        entity_id: event.entity_id.clone(),
        organisation_id: event.organisation_id,
        occurred_at: event.created_at,
        data: event.payload.clone(),
    }
}

/// Builds the signed POST for one attempt.
pub fn signed_request(
    url: &str,
    event_type: &str,
    delivery_id: Uuid,
    body: Vec<u8>,
    secret: &str,
    timestamp: i64,
) -> OutboundRequest {
    let signature = sign(&body, secret, timestamp);
    OutboundRequest {
        url: url.to_string(),
        headers: vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), USER_AGENT.to_string()),
            (EVENT_HEADER.to_string(), event_type.to_string()),
            (DELIVERY_HEADER.to_string(), delivery_id.to_string()),
            (SIGNATURE_HEADER.to_string(), signature),
            (TIMESTAMP_HEADER.to_string(), timestamp.to_string()),
        ],
        body,
    }
}

/// Appends custom headers after the standard ones. Reserved names never
/// replace or shadow the signature headers.
pub fn with_custom_headers(mut request: OutboundRequest, headers: &CustomHeaders) -> OutboundRequest {
    request.headers.extend(
        headers
            .iter()
            .filter(|(name, _)| !is_reserved_header(name))
            .map(|(name, value)| (name.clone(), value.clone())),
    );
    request
}

/// Keeps the first `limit` characters of a response body.
pub fn truncate_body(body: &str, limit: usize) -> String {
    match body.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{}", &body[..cut], TRUNCATION_MARKER),
        None => body.to_string(),
    }
}

fn http_error(response: &TransportResponse) -> String {
    format!("HTTP {}: {}", response.status, response.status_text)
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
