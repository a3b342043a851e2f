//! Application services.

pub mod api_clients;
pub mod dispatcher;
pub mod integration_events;
pub mod transport;
pub mod webhooks;

pub use api_clients::{ApiClientService, KeyRejection, KeyValidation};
pub use dispatcher::{DispatchSettings, WebhookDispatcher};
pub use integration_events::IntegrationEventService;
pub use transport::{HttpTransport, WebhookTransport};
pub use webhooks::WebhookService;
