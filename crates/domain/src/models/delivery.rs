//! Webhook delivery domain models.
//!
//! A delivery is one (event, webhook) pairing. Its status moves
//! `pending -> delivering -> (retrying -> delivering)* -> delivered | exhausted`,
//! or to `failed` when the webhook can no longer be delivered to at all.
//! Only a `delivering` row may have an attempt outcome written to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use shared::pagination::{PageRequest, Pagination};
use std::str::FromStr;
use uuid::Uuid;

/// Delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    /// Claimed by a dispatcher; an attempt is in flight.
    Delivering,
    Retrying,
    Delivered,
    /// Ran out of attempts.
    Exhausted,
    /// Webhook deleted, deactivated or its secret unreadable.
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivering => "delivering",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Exhausted => "exhausted",
            DeliveryStatus::Failed => "failed",
        }
    }

    /// Waiting for its next attempt and not claimed by anyone.
    pub fn is_queued(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::Retrying)
    }

    /// Terminal deliveries are never attempted again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Exhausted | DeliveryStatus::Failed
        )
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivering" => Ok(DeliveryStatus::Delivering),
            "retrying" => Ok(DeliveryStatus::Retrying),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "exhausted" => Ok(DeliveryStatus::Exhausted),
            "failed" => Ok(DeliveryStatus::Failed),
            _ => Err(format!("Unknown delivery status: {}", s)),
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON body POSTed to subscriber endpoints.
///
/// `event_id` is stable across retries so receivers can deduplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event_id: Uuid,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub organisation_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub data: JsonValue,
}

/// Delivery as returned by the admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResponse {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub integration_event_id: Uuid,
    pub event_type: String,
    pub status: DeliveryStatus,
    pub attempt_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    /// Earlier delivery of the same pairing that this one re-sends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redelivery_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Query parameters for listing a webhook's deliveries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListDeliveriesQuery {
    pub status: Option<DeliveryStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListDeliveriesQuery {
    pub fn page_request(&self) -> PageRequest {
        let defaults = PageRequest::default();
        PageRequest::new(
            self.page.unwrap_or(defaults.page),
            self.per_page.unwrap_or(defaults.per_page),
        )
    }
}

/// Response for listing deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDeliveriesResponse {
    pub deliveries: Vec<DeliveryResponse>,
    pub pagination: Pagination,
}

/// Response for a manual redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDeliveryResponse {
    /// Delivery that will be attempted next.
    pub delivery_id: Uuid,
    pub status: DeliveryStatus,
    /// Set when a terminal delivery was superseded by a fresh one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaces: Option<Uuid>,
    pub message: String,
}

/// Raw delivery counts for one webhook over a window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryCounts {
    pub total: i64,
    pub delivered: i64,
    pub failed: i64,
    pub pending: i64,
    pub avg_response_time_ms: Option<f64>,
}

impl DeliveryCounts {
    /// Delivered share as a percentage, 0 when there were no deliveries.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.delivered as f64 / self.total as f64) * 100.0
        }
    }
}

/// Counters returned by a dispatch batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub processed: usize,
    pub delivered: usize,
    pub failed: usize,
    pub retrying: usize,
}

impl DispatchSummary {
    pub fn merge(&mut self, other: DispatchSummary) {
        self.processed += other.processed;
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.retrying += other.retrying;
    }
}
