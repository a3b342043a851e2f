//! Admin endpoints for webhooks and their deliveries.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use domain::models::delivery::{
    DeliveryResponse, ListDeliveriesQuery, ListDeliveriesResponse, RetryDeliveryResponse,
};
use domain::models::webhook::{
    CreateWebhookRequest, CreateWebhookResponse, ListWebhooksQuery, ListWebhooksResponse,
    RegenerateSecretResponse, TestWebhookResponse, UpdateWebhookRequest, WebhookResponse,
    WebhookStatsQuery, WebhookStatsResponse,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;

/// POST /api/v1/admin/organisations/:org_id/webhooks
///
/// Responds with the signing secret. It is not retrievable afterwards.
pub async fn create_webhook(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Json(request): Json<CreateWebhookRequest>,
) -> Result<(StatusCode, Json<CreateWebhookResponse>), ApiError> {
    let response = state.webhooks.create(org_id, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_webhooks(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<ListWebhooksQuery>,
) -> Result<Json<ListWebhooksResponse>, ApiError> {
    Ok(Json(state.webhooks.list(org_id, &query).await?))
}

pub async fn get_webhook(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<WebhookResponse>, ApiError> {
    Ok(Json(state.webhooks.get(org_id, id).await?))
}

pub async fn update_webhook(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateWebhookRequest>,
) -> Result<Json<WebhookResponse>, ApiError> {
    Ok(Json(state.webhooks.update(org_id, id, request).await?))
}

pub async fn delete_webhook(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state.webhooks.delete(org_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn regenerate_secret(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RegenerateSecretResponse>, ApiError> {
    Ok(Json(state.webhooks.regenerate_secret(org_id, id).await?))
}

pub async fn toggle_webhook(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<WebhookResponse>, ApiError> {
    Ok(Json(state.webhooks.toggle(org_id, id).await?))
}

/// POST .../webhooks/:id/test. Sends a signed `test` payload; nothing is stored.
pub async fn test_webhook(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<TestWebhookResponse>, ApiError> {
    Ok(Json(state.webhooks.send_test(org_id, id).await?))
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ListDeliveriesQuery>,
) -> Result<Json<ListDeliveriesResponse>, ApiError> {
    Ok(Json(state.webhooks.deliveries(org_id, id, &query).await?))
}

pub async fn webhook_stats(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
    Query(query): Query<WebhookStatsQuery>,
) -> Result<Json<WebhookStatsResponse>, ApiError> {
    Ok(Json(state.webhooks.stats(org_id, id, query.days()).await?))
}

pub async fn get_delivery(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    Ok(Json(state.webhooks.delivery(org_id, id).await?))
}

/// POST .../deliveries/:id/retry
pub async fn retry_delivery(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(Uuid, Uuid)>,
) -> Result<(StatusCode, Json<RetryDeliveryResponse>), ApiError> {
    let response = state.webhooks.redeliver(org_id, id).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}
