//! Public API, behind the request gate.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use domain::models::api_client::ClientIdentityResponse;
use domain::models::integration_event::{
    entity_type_for_collection, IntegrationEventFilter, IntegrationEventResponse,
    ListIntegrationEventsQuery, ListIntegrationEventsResponse, RecordEventRequest,
};

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::AuthenticatedClient;

pub const EVENTS_WRITE_SCOPE: &str = "events:write";

/// GET /api/public/v1/me
pub async fn whoami(client: AuthenticatedClient) -> Json<ClientIdentityResponse> {
    Json(client.identity())
}

/// GET /api/public/v1/:collection/events
///
/// Requires `<collection>:read`. Lists the caller's organisation events for
/// the collection's entity type.
pub async fn collection_events(
    State(state): State<AppState>,
    client: AuthenticatedClient,
    Path(collection): Path<String>,
    Query(query): Query<ListIntegrationEventsQuery>,
) -> Result<Json<ListIntegrationEventsResponse>, ApiError> {
    let entity_type = entity_type_for_collection(&collection)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown collection: {}", collection)))?;
    client.require_scope(&format!("{}:read", collection))?;

    let filter = IntegrationEventFilter {
        entity_type: Some(entity_type.to_string()),
        ..IntegrationEventFilter::from(&query)
    };
    let response = state
        .events
        .query_filtered(client.organisation_id, &filter, query.page_request())
        .await?;
    Ok(Json(response))
}

/// POST /api/public/v1/events
pub async fn record_event(
    State(state): State<AppState>,
    client: AuthenticatedClient,
    Json(request): Json<RecordEventRequest>,
) -> Result<(StatusCode, Json<IntegrationEventResponse>), ApiError> {
    client.require_scope(EVENTS_WRITE_SCOPE)?;
    let event = state
        .events
        .record_from_api(client.organisation_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}
