//! PostgreSQL implementations of the store traits.

pub mod api_client;
pub mod delivery;
pub mod integration_event;
pub mod webhook;

pub use api_client::ApiClientRepository;
pub use delivery::DeliveryRepository;
pub use integration_event::IntegrationEventRepository;
pub use webhook::WebhookRepository;
