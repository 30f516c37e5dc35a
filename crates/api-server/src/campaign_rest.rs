//! Campaign REST API endpoints.

use crate::error::{ApiError, ErrorResponse};
use crate::rest::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use campaign_core::types::{Campaign, CampaignStats, Message};
use campaign_delivery::NewCampaign;
use tracing::debug;
use uuid::Uuid;

/// POST /v1/campaigns — Create a campaign and start dispatch in the
/// background.
#[utoipa::path(
    post,
    path = "/v1/campaigns",
    tag = "Campaigns",
    request_body = NewCampaign,
    responses(
        (status = 202, description = "Campaign accepted, dispatch running", body = Campaign),
        (status = 400, description = "Invalid campaign", body = ErrorResponse),
        (status = 404, description = "Segment not found", body = ErrorResponse),
    )
)]
pub async fn handle_create_campaign(
    State(state): State<AppState>,
    Json(request): Json<NewCampaign>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let (campaign, handle) = state.campaigns.create_campaign(request).await?;
    // The worker keeps running once the handle is dropped; its outcome is
    // visible through the campaign status.
    debug!(campaign_id = %handle.campaign_id(), "Dispatch worker detached");
    drop(handle);
    metrics::counter!("api.campaigns_created").increment(1);
    Ok((StatusCode::ACCEPTED, Json(campaign)))
}

/// GET /v1/campaigns — List campaigns, newest first.
#[utoipa::path(
    get,
    path = "/v1/campaigns",
    tag = "Campaigns",
    responses(
        (status = 200, description = "All campaigns", body = Vec<Campaign>),
        (status = 503, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn handle_list_campaigns(
    State(state): State<AppState>,
) -> Result<Json<Vec<Campaign>>, ApiError> {
    Ok(Json(state.campaigns.list_campaigns()?))
}

/// GET /v1/campaigns/{id} — Fetch one campaign.
#[utoipa::path(
    get,
    path = "/v1/campaigns/{id}",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign identifier")),
    responses(
        (status = 200, description = "Campaign", body = Campaign),
        (status = 404, description = "Campaign not found", body = ErrorResponse),
    )
)]
pub async fn handle_get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(state.campaigns.get_campaign(id)?))
}

/// DELETE /v1/campaigns/{id} — Delete a campaign and its message log.
#[utoipa::path(
    delete,
    path = "/v1/campaigns/{id}",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign identifier")),
    responses(
        (status = 204, description = "Campaign deleted"),
        (status = 400, description = "Campaign is still sending", body = ErrorResponse),
        (status = 404, description = "Campaign not found", body = ErrorResponse),
    )
)]
pub async fn handle_delete_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.campaigns.delete_campaign(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/campaigns/{id}/messages — Message log for a campaign.
#[utoipa::path(
    get,
    path = "/v1/campaigns/{id}/messages",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign identifier")),
    responses(
        (status = 200, description = "Messages in creation order", body = Vec<Message>),
        (status = 404, description = "Campaign not found", body = ErrorResponse),
    )
)]
pub async fn handle_campaign_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(state.campaigns.messages(id)?))
}

/// GET /v1/campaigns/{id}/stats — Aggregate message counts.
#[utoipa::path(
    get,
    path = "/v1/campaigns/{id}/stats",
    tag = "Campaigns",
    params(("id" = Uuid, Path, description = "Campaign identifier")),
    responses(
        (status = 200, description = "Message counts", body = CampaignStats),
        (status = 404, description = "Campaign not found", body = ErrorResponse),
    )
)]
pub async fn handle_campaign_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignStats>, ApiError> {
    Ok(Json(state.campaigns.stats(id)?))
}
