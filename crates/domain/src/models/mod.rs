//! Domain models for the integration service.

pub mod api_client;
pub mod delivery;
pub mod integration_event;
pub mod webhook;

pub use api_client::{ApiClientFilter, ClientStatus, RateLimitTier, SUPPORTED_SCOPES};
pub use delivery::{DeliveryCounts, DeliveryStatus, DispatchSummary, WebhookPayload};
pub use integration_event::{EventSource, IntegrationEventFilter, NewIntegrationEvent};
pub use webhook::{SUPPORTED_EVENT_TYPES, WILDCARD_EVENT_TYPE};
