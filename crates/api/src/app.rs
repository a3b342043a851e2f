use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use persistence::Stores;
use shared::crypto::SecretCodec;
use shared::hashing::SecretHasher;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::jobs::{build_scheduler, JobScheduler};
use crate::middleware::{
    api_gate, metrics_handler, metrics_middleware, require_admin, trace_id, RateLimiter,
};
use crate::routes::{api_clients, health, integration_events, jobs, public, webhooks};
use crate::services::{
    ApiClientService, DispatchSettings, IntegrationEventService, WebhookDispatcher,
    WebhookService, WebhookTransport,
};

const ORG: &str = "/api/v1/admin/organisations/:org_id";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub api_clients: ApiClientService,
    pub events: IntegrationEventService,
    pub webhooks: WebhookService,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub rate_limiter: Arc<RateLimiter>,
    pub scheduler: Arc<JobScheduler>,
}

/// Error raised while wiring the application together.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Secret codec: {0}")]
    Codec(#[from] shared::crypto::CodecError),

    #[error("Job schedule: {0}")]
    Schedule(String),
}

impl AppState {
    /// Wires services, dispatcher and scheduler over `stores`. Jobs are
    /// registered but not started.
    pub fn new(
        config: Config,
        stores: Stores,
        transport: Arc<dyn WebhookTransport>,
    ) -> Result<Self, StartupError> {
        let config = Arc::new(config);
        let codec = SecretCodec::from_master_key(&config.encryption.master_key)?;

        let dispatcher = Arc::new(WebhookDispatcher::new(
            &stores,
            codec.clone(),
            transport,
            DispatchSettings::from_config(&config.webhooks),
        ));
        let events = IntegrationEventService::new(stores.events.clone());
        let rate_limiter = Arc::new(RateLimiter::new(chrono::Duration::seconds(
            i64::try_from(config.rate_limits.window_secs).unwrap_or(i64::MAX),
        )));

        let scheduler = build_scheduler(
            &config,
            Arc::clone(&dispatcher),
            events.clone(),
            stores.deliveries.clone(),
            Arc::clone(&rate_limiter),
        )
        .map_err(StartupError::Schedule)?;

        Ok(Self {
            api_clients: ApiClientService::new(
                stores.api_clients.clone(),
                SecretHasher::new(config.security.hash_cost()),
            ),
            webhooks: WebhookService::new(
                stores.webhooks.clone(),
                stores.deliveries.clone(),
                codec,
                Arc::clone(&dispatcher),
            ),
            events,
            dispatcher,
            rate_limiter,
            scheduler: Arc::new(scheduler),
            stores,
            config,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let cors = if config.security.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Public API: every route passes the request gate.
    let public_routes = Router::new()
        .route("/api/public/v1/me", get(public::whoami))
        .route("/api/public/v1/events", post(public::record_event))
        .route(
            "/api/public/v1/:collection/events",
            get(public::collection_events),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), api_gate));

    let admin_routes = Router::new()
        .route(
            &format!("{ORG}/api-clients"),
            post(api_clients::create_api_client).get(api_clients::list_api_clients),
        )
        .route(
            &format!("{ORG}/api-clients/:id"),
            get(api_clients::get_api_client)
                .patch(api_clients::update_api_client)
                .delete(api_clients::delete_api_client),
        )
        .route(
            &format!("{ORG}/api-clients/:id/regenerate-key"),
            post(api_clients::regenerate_key),
        )
        .route(
            &format!("{ORG}/api-clients/:id/suspend"),
            post(api_clients::suspend_api_client),
        )
        .route(
            &format!("{ORG}/api-clients/:id/reactivate"),
            post(api_clients::reactivate_api_client),
        )
        .route(
            &format!("{ORG}/api-clients/:id/stats"),
            get(api_clients::api_client_stats),
        )
        .route(
            &format!("{ORG}/webhooks"),
            post(webhooks::create_webhook).get(webhooks::list_webhooks),
        )
        .route(
            &format!("{ORG}/webhooks/:id"),
            get(webhooks::get_webhook)
                .patch(webhooks::update_webhook)
                .delete(webhooks::delete_webhook),
        )
        .route(
            &format!("{ORG}/webhooks/:id/regenerate-secret"),
            post(webhooks::regenerate_secret),
        )
        .route(
            &format!("{ORG}/webhooks/:id/toggle"),
            post(webhooks::toggle_webhook),
        )
        .route(
            &format!("{ORG}/webhooks/:id/test"),
            post(webhooks::test_webhook),
        )
        .route(
            &format!("{ORG}/webhooks/:id/deliveries"),
            get(webhooks::list_deliveries),
        )
        .route(
            &format!("{ORG}/webhooks/:id/stats"),
            get(webhooks::webhook_stats),
        )
        .route(
            &format!("{ORG}/deliveries/:id"),
            get(webhooks::get_delivery),
        )
        .route(
            &format!("{ORG}/deliveries/:id/retry"),
            post(webhooks::retry_delivery),
        )
        .route(
            &format!("{ORG}/integration-events"),
            get(integration_events::list_events),
        )
        .route(
            &format!("{ORG}/integration-events/stats"),
            get(integration_events::event_stats),
        )
        .route(
            &format!("{ORG}/integration-events/summary"),
            get(integration_events::event_summary),
        )
        .route(
            &format!("{ORG}/integration-events/:id"),
            get(integration_events::get_event),
        )
        .route(
            &format!("{ORG}/integration-events/entity/:entity_type/:entity_id"),
            get(integration_events::events_for_entity),
        )
        .route("/api/v1/admin/jobs", get(jobs::list_jobs))
        .route("/api/v1/admin/jobs/:name/run", post(jobs::run_job))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    // No authentication
    let open_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(open_routes)
        .merge(public_routes)
        .merge(admin_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
