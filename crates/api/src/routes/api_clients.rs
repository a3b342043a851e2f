//! Admin endpoints for API clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use domain::models::api_client::{
    ApiClientResponse, ApiClientStatsResponse, ClientStatus, CreateApiClientRequest,
    CreateApiClientResponse, ListApiClientsQuery, ListApiClientsResponse, RegenerateKeyResponse,
    UpdateApiClientRequest,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;

/// POST /api/v1/admin/organisations/:org_id/api-clients
///
/// The plaintext key is only ever returned here and by regenerate-key.
pub async fn create_api_client(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Json(request): Json<CreateApiClientRequest>,
) -> Result<(StatusCode, Json<CreateApiClientResponse>), ApiError> {
    let response = state.api_clients.create(org_id, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/admin/organisations/:org_id/api-clients
pub async fn list_api_clients(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<ListApiClientsQuery>,
) -> Result<Json<ListApiClientsResponse>, ApiError> {
    Ok(Json(state.api_clients.list(org_id, &query).await?))
}

pub async fn get_api_client(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiClientResponse>, ApiError> {
    Ok(Json(state.api_clients.get(org_id, id).await?))
}

pub async fn update_api_client(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateApiClientRequest>,
) -> Result<Json<ApiClientResponse>, ApiError> {
    Ok(Json(state.api_clients.update(org_id, id, request).await?))
}

/// DELETE .../api-clients/:id. Revokes the client; it cannot come back.
pub async fn delete_api_client(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state.api_clients.delete(org_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn regenerate_key(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RegenerateKeyResponse>, ApiError> {
    Ok(Json(state.api_clients.regenerate_key(org_id, id).await?))
}

pub async fn suspend_api_client(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiClientResponse>, ApiError> {
    Ok(Json(
        state
            .api_clients
            .set_status(org_id, id, ClientStatus::Suspended)
            .await?,
    ))
}

pub async fn reactivate_api_client(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiClientResponse>, ApiError> {
    Ok(Json(
        state
            .api_clients
            .set_status(org_id, id, ClientStatus::Active)
            .await?,
    ))
}

pub async fn api_client_stats(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiClientStatsResponse>, ApiError> {
    Ok(Json(state.api_clients.stats(org_id, id).await?))
}
