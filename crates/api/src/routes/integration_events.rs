//! Admin endpoints for the integration event log.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use domain::models::integration_event::{
    EntityEventsQuery, EventStatsQuery, EventSummaryQuery, EventSummaryResponse,
    IntegrationEventResponse, IntegrationEventStats, ListIntegrationEventsQuery,
    ListIntegrationEventsResponse,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;

pub async fn list_events(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<ListIntegrationEventsQuery>,
) -> Result<Json<ListIntegrationEventsResponse>, ApiError> {
    Ok(Json(state.events.query(org_id, &query).await?))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<IntegrationEventResponse>, ApiError> {
    Ok(Json(state.events.get(org_id, id).await?))
}

pub async fn events_for_entity(
    State(state): State<AppState>,
    Path((org_id, entity_type, entity_id)): Path<(Uuid, String, String)>,
    Query(query): Query<EntityEventsQuery>,
) -> Result<Json<Vec<IntegrationEventResponse>>, ApiError> {
    Ok(Json(
        state
            .events
            .for_entity(org_id, &entity_type, &entity_id, &query)
            .await?,
    ))
}

pub async fn event_stats(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<EventStatsQuery>,
) -> Result<Json<IntegrationEventStats>, ApiError> {
    Ok(Json(state.events.stats(org_id, query.days()).await?))
}

pub async fn event_summary(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<EventSummaryQuery>,
) -> Result<Json<EventSummaryResponse>, ApiError> {
    Ok(Json(state.events.summary(org_id, query.hours()).await?))
}
