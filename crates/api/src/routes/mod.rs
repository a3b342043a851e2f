//! HTTP route handlers.

pub mod api_clients;
pub mod health;
pub mod integration_events;
pub mod jobs;
pub mod public;
pub mod webhooks;
