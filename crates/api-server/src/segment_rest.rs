//! Segment REST API endpoints — CRUD, rule preview, audience pages and rule
//! suggestions.
//!
//! Rule trees arrive as raw JSON so that malformed trees are reported with
//! the offending path rather than as a generic body rejection.

use crate::error::{ApiError, ErrorResponse};
use crate::rest::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use campaign_core::CampaignError;
use campaign_segmentation::resolver::CustomerPage;
use campaign_segmentation::segments::{NewSegment, SegmentPreview, SegmentUpdate};
use campaign_segmentation::{Page, RuleTree, Segment};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSegmentRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[schema(value_type = Object)]
    pub rules: Value,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateSegmentRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub rules: Option<Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PreviewRequest {
    #[schema(value_type = Object)]
    pub rules: Value,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SuggestRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SuggestResponse {
    #[schema(value_type = Object)]
    pub rules: RuleTree,
    pub preview: SegmentPreview,
}

/// POST /v1/segments — Create a segment and size its audience.
#[utoipa::path(
    post,
    path = "/v1/segments",
    tag = "Segments",
    request_body = CreateSegmentRequest,
    responses(
        (status = 201, description = "Segment created", body = Segment),
        (status = 400, description = "Invalid rules", body = ErrorResponse),
    )
)]
pub async fn handle_create_segment(
    State(state): State<AppState>,
    Json(request): Json<CreateSegmentRequest>,
) -> Result<(StatusCode, Json<Segment>), ApiError> {
    let rules = RuleTree::from_value(request.rules)?;
    let segment = state
        .segments
        .create_segment(NewSegment {
            name: request.name,
            description: request.description,
            rules,
            created_by: request.created_by.unwrap_or_else(|| "admin".to_string()),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(segment)))
}

/// GET /v1/segments — List segments, newest first.
#[utoipa::path(
    get,
    path = "/v1/segments",
    tag = "Segments",
    responses((status = 200, description = "All segments", body = Vec<Segment>))
)]
pub async fn handle_list_segments(State(state): State<AppState>) -> Json<Vec<Segment>> {
    Json(state.segments.list_segments())
}

/// GET /v1/segments/{id} — Fetch one segment.
#[utoipa::path(
    get,
    path = "/v1/segments/{id}",
    tag = "Segments",
    params(("id" = Uuid, Path, description = "Segment identifier")),
    responses(
        (status = 200, description = "Segment", body = Segment),
        (status = 404, description = "Segment not found", body = ErrorResponse),
    )
)]
pub async fn handle_get_segment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Segment>, ApiError> {
    Ok(Json(state.segments.get_segment(id)?))
}

/// PUT /v1/segments/{id} — Update a segment; changed rules are recompiled.
#[utoipa::path(
    put,
    path = "/v1/segments/{id}",
    tag = "Segments",
    params(("id" = Uuid, Path, description = "Segment identifier")),
    request_body = UpdateSegmentRequest,
    responses(
        (status = 200, description = "Segment updated", body = Segment),
        (status = 400, description = "Invalid rules", body = ErrorResponse),
        (status = 404, description = "Segment not found", body = ErrorResponse),
    )
)]
pub async fn handle_update_segment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSegmentRequest>,
) -> Result<Json<Segment>, ApiError> {
    let rules = request.rules.map(RuleTree::from_value).transpose()?;
    let segment = state
        .segments
        .update_segment(
            id,
            SegmentUpdate {
                name: request.name,
                description: request.description,
                rules,
            },
        )
        .await?;
    Ok(Json(segment))
}

/// DELETE /v1/segments/{id} — Delete a segment. Existing campaigns keep
/// their messages.
#[utoipa::path(
    delete,
    path = "/v1/segments/{id}",
    tag = "Segments",
    params(("id" = Uuid, Path, description = "Segment identifier")),
    responses(
        (status = 204, description = "Segment deleted"),
        (status = 404, description = "Segment not found", body = ErrorResponse),
    )
)]
pub async fn handle_delete_segment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.segments.delete_segment(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/segments/preview — Compile rules and sample the audience
/// without persisting anything.
#[utoipa::path(
    post,
    path = "/v1/segments/preview",
    tag = "Segments",
    request_body = PreviewRequest,
    responses(
        (status = 200, description = "Compiled predicate and audience sample", body = SegmentPreview),
        (status = 400, description = "Invalid rules", body = ErrorResponse),
    )
)]
pub async fn handle_preview(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> Result<Json<SegmentPreview>, ApiError> {
    let rules = RuleTree::from_value(request.rules)?;
    Ok(Json(state.segments.preview(&rules).await?))
}

/// GET /v1/segments/{id}/customers — Page through a segment's current
/// audience.
#[utoipa::path(
    get,
    path = "/v1/segments/{id}/customers",
    tag = "Segments",
    params(("id" = Uuid, Path, description = "Segment identifier"), Page),
    responses(
        (status = 200, description = "Page of matching customers", body = CustomerPage),
        (status = 404, description = "Segment not found", body = ErrorResponse),
    )
)]
pub async fn handle_segment_customers(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(page): Query<Page>,
) -> Result<Json<CustomerPage>, ApiError> {
    Ok(Json(state.segments.customers_page(id, page).await?))
}

/// POST /v1/segments/suggest — Ask the text-generation service for a rule
/// tree and preview it.
#[utoipa::path(
    post,
    path = "/v1/segments/suggest",
    tag = "Segments",
    request_body = SuggestRequest,
    responses(
        (status = 200, description = "Suggested rules with preview", body = SuggestResponse),
        (status = 400, description = "Suggested rules are malformed", body = ErrorResponse),
        (status = 502, description = "Suggestion service failed", body = ErrorResponse),
        (status = 503, description = "Suggestion service not configured", body = ErrorResponse),
    )
)]
pub async fn handle_suggest(
    State(state): State<AppState>,
    Json(request): Json<SuggestRequest>,
) -> Result<Json<SuggestResponse>, ApiError> {
    if request.prompt.trim().is_empty() {
        return Err(CampaignError::Validation("prompt must not be empty".to_string()).into());
    }
    let suggester = state.suggester.as_ref().ok_or_else(|| {
        CampaignError::Config("rule suggester is not configured".to_string())
    })?;
    let rules = suggester.suggest(&request.prompt).await?;
    let preview = state.segments.preview(&rules).await?;
    info!(
        leaves = rules.leaf_count(),
        audience_size = preview.audience_size,
        "Rule suggestion previewed"
    );
    metrics::counter!("segments.suggestions").increment(1);
    Ok(Json(SuggestResponse { rules, preview }))
}
