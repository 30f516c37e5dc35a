//! Shared handler state and operational endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use campaign_delivery::{CampaignService, ReceiptReconciler};
use campaign_segmentation::{RuleSuggester, SegmentService};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use utoipa::ToSchema;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub segments: Arc<SegmentService>,
    pub campaigns: Arc<CampaignService>,
    pub reconciler: Arc<ReceiptReconciler>,
    pub suggester: Option<Arc<dyn RuleSuggester>>,
    pub node_id: String,
    pub start_time: Instant,
}

/// GET /health — Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — Readiness probe.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses((status = 200, description = "Ready to accept traffic"))
)]
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live — Liveness probe.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}
