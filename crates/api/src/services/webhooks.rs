//! Webhook registry.
//!
//! Signing secrets are generated here, sealed with the Secret Codec before
//! they reach storage and shown to the caller only in the create and
//! regenerate responses. Custom headers are sealed the same way and never
//! returned.

use std::sync::Arc;

use chrono::{Duration, Utc};
use domain::models::delivery::{
    DeliveryResponse, DeliveryStatus, ListDeliveriesQuery, ListDeliveriesResponse,
    RetryDeliveryResponse,
};
use domain::models::webhook::{
    CreateWebhookRequest, CreateWebhookResponse, CustomHeaders, ListWebhooksQuery,
    ListWebhooksResponse, RegenerateSecretResponse, TestWebhookResponse, UpdateWebhookRequest,
    WebhookResponse, WebhookStatsResponse,
};
use persistence::entities::WebhookEntity;
use persistence::{DeliveryStore, NewDelivery, NewWebhook, WebhookChanges, WebhookStore};
use shared::api_key::generate_webhook_secret;
use shared::crypto::SecretCodec;
use shared::pagination::Pagination;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::dispatcher::WebhookDispatcher;
use crate::error::ApiError;

#[derive(Clone)]
pub struct WebhookService {
    webhooks: Arc<dyn WebhookStore>,
    deliveries: Arc<dyn DeliveryStore>,
    codec: SecretCodec,
    dispatcher: Arc<WebhookDispatcher>,
}

impl WebhookService {
    pub fn new(
        webhooks: Arc<dyn WebhookStore>,
        deliveries: Arc<dyn DeliveryStore>,
        codec: SecretCodec,
        dispatcher: Arc<WebhookDispatcher>,
    ) -> Self {
        Self {
            webhooks,
            deliveries,
            codec,
            dispatcher,
        }
    }

    pub async fn create(
        &self,
        organisation_id: Uuid,
        request: CreateWebhookRequest,
    ) -> Result<CreateWebhookResponse, ApiError> {
        request.validate()?;
        request
            .validate_https()
            .map_err(ApiError::InvalidWebhookUrl)?;
        request
            .validate_event_types()
            .map_err(ApiError::InvalidEventType)?;
        request
            .validate_custom_headers()
            .map_err(ApiError::InvalidCustomHeaders)?;

        let secret = generate_webhook_secret();
        let headers_encrypted = match &request.custom_headers {
            Some(headers) => self.seal_headers(headers)?,
            None => None,
        };
        let webhook = self
            .webhooks
            .insert(NewWebhook {
                organisation_id,
                name: request.name,
                description: request.description,
                target_url: request.target_url,
                event_types: request.event_types,
                secret_encrypted: self.codec.encrypt(&secret)?,
                headers_encrypted,
                is_active: request.is_active,
            })
            .await?;

        info!(
            organisation_id = %organisation_id,
            webhook_id = %webhook.id,
            event_types = ?webhook.event_types,
            "Webhook created"
        );

        Ok(CreateWebhookResponse {
            webhook: webhook.into(),
            secret,
        })
    }

    pub async fn get(&self, organisation_id: Uuid, id: Uuid) -> Result<WebhookResponse, ApiError> {
        Ok(self.find(organisation_id, id).await?.into())
    }

    pub async fn list(
        &self,
        organisation_id: Uuid,
        query: &ListWebhooksQuery,
    ) -> Result<ListWebhooksResponse, ApiError> {
        let page = query.page_request();
        let (webhooks, total) = self
            .webhooks
            .list(organisation_id, query.is_active, page.limit(), page.offset())
            .await?;

        Ok(ListWebhooksResponse {
            webhooks: webhooks.into_iter().map(Into::into).collect(),
            pagination: Pagination::new(&page, total),
        })
    }

    pub async fn update(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        request: UpdateWebhookRequest,
    ) -> Result<WebhookResponse, ApiError> {
        if !request.has_updates() {
            return Err(ApiError::validation("No fields to update"));
        }
        request.validate()?;
        request
            .validate_https()
            .map_err(ApiError::InvalidWebhookUrl)?;
        request
            .validate_event_types()
            .map_err(ApiError::InvalidEventType)?;
        request
            .validate_custom_headers()
            .map_err(ApiError::InvalidCustomHeaders)?;

        let headers_encrypted = request
            .custom_headers
            .as_ref()
            .map(|headers| self.seal_headers(headers))
            .transpose()?;
        let changes = WebhookChanges {
            name: request.name,
            description: request.description,
            target_url: request.target_url,
            event_types: request.event_types,
            is_active: request.is_active,
            headers_encrypted,
        };
        let webhook = self
            .webhooks
            .update(organisation_id, id, &changes)
            .await?
            .ok_or_else(not_found)?;

        info!(webhook_id = %id, "Webhook updated");
        Ok(webhook.into())
    }

    /// Replaces the signing secret. The old secret stops verifying at once.
    pub async fn regenerate_secret(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> Result<RegenerateSecretResponse, ApiError> {
        let secret = generate_webhook_secret();
        let sealed = self.codec.encrypt(&secret)?;
        let webhook = self
            .webhooks
            .replace_secret(organisation_id, id, &sealed)
            .await?
            .ok_or_else(not_found)?;

        info!(webhook_id = %webhook.id, "Webhook secret regenerated");
        Ok(RegenerateSecretResponse {
            id: webhook.id,
            secret,
        })
    }

    /// Flips `is_active`.
    pub async fn toggle(&self, organisation_id: Uuid, id: Uuid) -> Result<WebhookResponse, ApiError> {
        let current = self.find(organisation_id, id).await?;
        let webhook = self
            .webhooks
            .set_active(organisation_id, id, !current.is_active)
            .await?
            .ok_or_else(not_found)?;

        info!(webhook_id = %id, is_active = webhook.is_active, "Webhook toggled");
        Ok(webhook.into())
    }

    pub async fn delete(&self, organisation_id: Uuid, id: Uuid) -> Result<(), ApiError> {
        if !self.webhooks.delete(organisation_id, id).await? {
            return Err(not_found());
        }
        info!(webhook_id = %id, "Webhook deleted");
        Ok(())
    }

    /// Seals custom headers as one JSON envelope. No headers seal to `None`.
    fn seal_headers(&self, headers: &CustomHeaders) -> Result<Option<String>, ApiError> {
        if headers.is_empty() {
            return Ok(None);
        }
        let json = serde_json::to_string(headers)
            .map_err(|e| ApiError::Internal(format!("Failed to serialize custom headers: {}", e)))?;
        Ok(Some(self.codec.encrypt(&json)?))
    }

    pub async fn send_test(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> Result<TestWebhookResponse, ApiError> {
        let webhook = self.find(organisation_id, id).await?;
        self.dispatcher.send_test(&webhook).await
    }

    pub async fn deliveries(
        &self,
        organisation_id: Uuid,
        webhook_id: Uuid,
        query: &ListDeliveriesQuery,
    ) -> Result<ListDeliveriesResponse, ApiError> {
        self.find(organisation_id, webhook_id).await?;

        let page = query.page_request();
        let (deliveries, total) = self
            .deliveries
            .list_for_webhook(webhook_id, query.status, page.limit(), page.offset())
            .await?;

        Ok(ListDeliveriesResponse {
            deliveries: deliveries.into_iter().map(Into::into).collect(),
            pagination: Pagination::new(&page, total),
        })
    }

    pub async fn delivery(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> Result<DeliveryResponse, ApiError> {
        self.deliveries
            .find_by_id(organisation_id, id)
            .await?
            .map(Into::into)
            .ok_or_else(delivery_not_found)
    }

    pub async fn stats(
        &self,
        organisation_id: Uuid,
        id: Uuid,
        days: u32,
    ) -> Result<WebhookStatsResponse, ApiError> {
        let webhook = self.find(organisation_id, id).await?;
        let since = Utc::now() - Duration::days(i64::from(days));
        let counts = self.deliveries.counts_for_webhook(id, since).await?;

        Ok(WebhookStatsResponse {
            webhook_id: webhook.id,
            days,
            total_deliveries: counts.total,
            delivered: counts.delivered,
            failed: counts.failed,
            pending: counts.pending,
            success_rate: counts.success_rate(),
            avg_response_time_ms: counts.avg_response_time_ms,
            is_active: webhook.is_active,
            consecutive_failures: webhook.consecutive_failures,
        })
    }

    /// Schedules a delivery for another attempt.
    ///
    /// Queued deliveries become due now. A delivery with an attempt in flight
    /// is left to finish. Terminal ones stay as they are and a fresh delivery
    /// of the same payload is queued in their place.
    pub async fn redeliver(
        &self,
        organisation_id: Uuid,
        id: Uuid,
    ) -> Result<RetryDeliveryResponse, ApiError> {
        let delivery = self
            .deliveries
            .find_by_id(organisation_id, id)
            .await?
            .ok_or_else(delivery_not_found)?;
        let now = Utc::now();

        match delivery.status() {
            DeliveryStatus::Delivered => Err(ApiError::AlreadyDelivered(
                "Delivery already succeeded".to_string(),
            )),
            DeliveryStatus::Delivering => Err(in_flight()),
            DeliveryStatus::Pending | DeliveryStatus::Retrying => {
                // Claimed by a dispatcher since it was read.
                let due = self
                    .deliveries
                    .make_due(id, now)
                    .await?
                    .ok_or_else(in_flight)?;
                info!(delivery_id = %id, "Delivery scheduled for immediate retry");
                Ok(RetryDeliveryResponse {
                    delivery_id: due.id,
                    status: due.status(),
                    replaces: None,
                    message: "Delivery scheduled for immediate retry".to_string(),
                })
            }
            DeliveryStatus::Exhausted | DeliveryStatus::Failed => {
                self.find(organisation_id, delivery.webhook_id).await?;
                let fresh = self
                    .deliveries
                    .insert(NewDelivery {
                        webhook_id: delivery.webhook_id,
                        integration_event_id: delivery.integration_event_id,
                        organisation_id,
                        event_type: delivery.event_type.clone(),
                        payload: delivery.payload.clone(),
                        status: DeliveryStatus::Pending,
                        next_retry_at: now,
                        redelivery_of: Some(delivery.id),
                    })
                    .await?
                    .ok_or_else(|| ApiError::Conflict("Redelivery already queued".to_string()))?;
                info!(
                    delivery_id = %fresh.id,
                    replaces = %delivery.id,
                    webhook_id = %delivery.webhook_id,
                    "Redelivery queued"
                );
                Ok(RetryDeliveryResponse {
                    delivery_id: fresh.id,
                    status: fresh.status(),
                    replaces: Some(delivery.id),
                    message: "New delivery queued".to_string(),
                })
            }
        }
    }

    async fn find(&self, organisation_id: Uuid, id: Uuid) -> Result<WebhookEntity, ApiError> {
        self.webhooks
            .find_by_id(organisation_id, id)
            .await?
            .ok_or_else(not_found)
    }
}

fn not_found() -> ApiError {
    ApiError::NotFound("Webhook not found".to_string())
}

fn delivery_not_found() -> ApiError {
    ApiError::NotFound("Delivery not found".to_string())
}

fn in_flight() -> ApiError {
    ApiError::DeliveryInProgress("Delivery attempt is in progress".to_string())
}
