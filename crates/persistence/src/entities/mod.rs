//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod api_client;
pub mod delivery;
pub mod integration_event;
pub mod webhook;

pub use api_client::ApiClientEntity;
pub use delivery::WebhookDeliveryEntity;
pub use integration_event::IntegrationEventEntity;
pub use webhook::WebhookEntity;
