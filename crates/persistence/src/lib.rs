//! Persistence layer for the EHS integrations service.
//!
//! - `store`: storage traits shared by every backend
//! - `repositories`: PostgreSQL implementations
//! - `memory`: in-process implementations
//! - `entities`: row mappings
//! - `db`: pool creation and migrations

pub mod db;
pub mod entities;
pub mod memory;
pub mod metrics;
pub mod repositories;
pub mod store;

pub use store::{
    ApiClientChanges, ApiClientStore, AttemptRecord, DeliveryStore, IntegrationEventStore,
    NewApiClient, NewDelivery, NewWebhook, StoreError, StoreResult, Stores, WebhookChanges,
    WebhookStore,
};
