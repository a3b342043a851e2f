//! Webhook subscription domain models.
//!
//! Request/response DTOs for organisation-level webhook management and the
//! event-type catalogue subscriptions are checked against.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::pagination::{PageRequest, Pagination};
use uuid::Uuid;
use validator::Validate;

/// Event type that subscribes a webhook to everything.
pub const WILDCARD_EVENT_TYPE: &str = "*";

/// Event type used for unpersisted test deliveries.
pub const TEST_EVENT_TYPE: &str = "test";

/// Event types a webhook may subscribe to (besides the wildcard).
pub const SUPPORTED_EVENT_TYPES: &[&str] = &[
    "incident.created",
    "incident.updated",
    "incident.severity_changed",
    "incident.closed",
    "action.created",
    "action.assigned",
    "action.overdue",
    "action.completed",
    "risk.created",
    "risk.level_changed",
    "risk.review_due",
    "training.assigned",
    "training.overdue",
    "training.completed",
    "user.created",
    "user.updated",
    "user.deactivated",
];

/// Most custom headers one webhook may carry.
pub const MAX_CUSTOM_HEADERS: usize = 20;

const MAX_CUSTOM_HEADER_VALUE: usize = 1024;

/// Custom headers sent with every delivery of a webhook.
pub type CustomHeaders = BTreeMap<String, String>;

/// Returns true if a custom header may not use `name`. The dispatcher owns
/// these, along with every `X-EHS-` header.
pub fn is_reserved_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("x-ehs-")
        || matches!(
            name.as_str(),
            "content-type" | "content-length" | "user-agent" | "host" | "transfer-encoding"
        )
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

/// Checks header names are HTTP tokens outside the reserved set and values
/// are free of control characters.
pub fn check_custom_headers(headers: &CustomHeaders) -> Result<(), String> {
    if headers.len() > MAX_CUSTOM_HEADERS {
        return Err(format!("At most {} custom headers", MAX_CUSTOM_HEADERS));
    }
    for (name, value) in headers {
        if name.is_empty() || !name.chars().all(is_token_char) {
            return Err(format!("Invalid header name: {}", name));
        }
        if is_reserved_header(name) {
            return Err(format!("Header is reserved: {}", name));
        }
        if value.len() > MAX_CUSTOM_HEADER_VALUE {
            return Err(format!("Header value too long: {}", name));
        }
        if value.chars().any(|c| c.is_control() && c != '\t') {
            return Err(format!("Header value contains control characters: {}", name));
        }
    }
    Ok(())
}

/// Returns true if `event_type` is in the catalogue.
pub fn is_supported_event_type(event_type: &str) -> bool {
    SUPPORTED_EVENT_TYPES.contains(&event_type)
}

/// Returns true if a subscription set covers `event_type`.
pub fn subscription_matches(subscribed: &[String], event_type: &str) -> bool {
    subscribed
        .iter()
        .any(|s| s == WILDCARD_EVENT_TYPE || s == event_type)
}

fn check_event_types(event_types: &[String]) -> Result<(), String> {
    if event_types.is_empty() {
        return Err("At least one event type is required".to_string());
    }
    for event_type in event_types {
        if event_type != WILDCARD_EVENT_TYPE && !is_supported_event_type(event_type) {
            return Err(format!("Unsupported event type: {}", event_type));
        }
    }
    Ok(())
}

fn check_https(url: &str) -> Result<(), String> {
    shared::validation::validate_https_url(url).map_err(|e| {
        e.message
            .map(|m| m.to_string())
            .unwrap_or_else(|| "Target URL must use HTTPS".to_string())
    })
}

/// Request to create a webhook.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateWebhookRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,

    pub target_url: String,

    #[validate(length(max = 50, message = "At most 50 event types"))]
    pub event_types: Vec<String>,

    #[serde(default = "default_active")]
    pub is_active: bool,

    /// Sent with every delivery; stored encrypted.
    #[serde(default)]
    pub custom_headers: Option<CustomHeaders>,
}

fn default_active() -> bool {
    true
}

impl CreateWebhookRequest {
    /// Validates that the target URL is absolute and uses HTTPS.
    pub fn validate_https(&self) -> Result<(), String> {
        check_https(&self.target_url)
    }

    /// Validates that all event types are supported.
    pub fn validate_event_types(&self) -> Result<(), String> {
        check_event_types(&self.event_types)
    }

    pub fn validate_custom_headers(&self) -> Result<(), String> {
        self.custom_headers.as_ref().map_or(Ok(()), check_custom_headers)
    }
}

/// Request to update a webhook.
#[derive(Debug, Clone, Serialize, Deserialize, Default, Validate)]
pub struct UpdateWebhookRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,

    pub target_url: Option<String>,

    #[validate(length(max = 50, message = "At most 50 event types"))]
    pub event_types: Option<Vec<String>>,

    pub is_active: Option<bool>,

    /// Replaces the custom headers; an empty map removes them.
    #[serde(default)]
    pub custom_headers: Option<CustomHeaders>,
}

impl UpdateWebhookRequest {
    pub fn has_updates(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.target_url.is_some()
            || self.event_types.is_some()
            || self.is_active.is_some()
            || self.custom_headers.is_some()
    }

    pub fn validate_https(&self) -> Result<(), String> {
        self.target_url.as_deref().map_or(Ok(()), check_https)
    }

    pub fn validate_event_types(&self) -> Result<(), String> {
        self.event_types.as_deref().map_or(Ok(()), check_event_types)
    }

    pub fn validate_custom_headers(&self) -> Result<(), String> {
        self.custom_headers.as_ref().map_or(Ok(()), check_custom_headers)
    }
}

/// Webhook as returned by the admin API. The secret is never included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub target_url: String,
    pub event_types: Vec<String>,
    pub is_active: bool,
    /// Header values are never returned.
    pub has_custom_headers: bool,
    pub consecutive_failures: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Response when creating a webhook (includes the signing secret, shown only once).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWebhookResponse {
    #[serde(flatten)]
    pub webhook: WebhookResponse,

    pub secret: String,
}

/// Response when regenerating a signing secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerateSecretResponse {
    pub id: Uuid,
    pub secret: String,
}

/// Query parameters for listing webhooks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListWebhooksQuery {
    pub is_active: Option<bool>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ListWebhooksQuery {
    pub fn page_request(&self) -> PageRequest {
        let defaults = PageRequest::default();
        PageRequest::new(
            self.page.unwrap_or(defaults.page),
            self.per_page.unwrap_or(defaults.per_page),
        )
    }
}

/// Response for listing webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListWebhooksResponse {
    pub webhooks: Vec<WebhookResponse>,
    pub pagination: Pagination,
}

/// Result of an unpersisted test delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestWebhookResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub response_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Query parameters for webhook statistics.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookStatsQuery {
    pub days: Option<u32>,
}

impl WebhookStatsQuery {
    /// Window in days, 1..=365, default 30.
    pub fn days(&self) -> u32 {
        self.days.unwrap_or(30).clamp(1, 365)
    }
}

/// Delivery statistics for one webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookStatsResponse {
    pub webhook_id: Uuid,
    pub days: u32,
    pub total_deliveries: i64,
    pub delivered: i64,
    /// Exhausted plus failed.
    pub failed: i64,
    /// Pending, delivering and retrying.
    pub pending: i64,
    /// Delivered share as a percentage (0-100).
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_response_time_ms: Option<f64>,
    pub is_active: bool,
    pub consecutive_failures: i32,
}
