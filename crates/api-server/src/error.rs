//! Mapping from domain errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use campaign_core::CampaignError;
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Handler error wrapping a [`CampaignError`].
#[derive(Debug)]
pub struct ApiError(pub CampaignError);

impl From<CampaignError> for ApiError {
    fn from(err: CampaignError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            CampaignError::RuleValidation(_) => (StatusCode::BAD_REQUEST, "invalid_rules"),
            CampaignError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            CampaignError::Serialization(_) => (StatusCode::BAD_REQUEST, "invalid_body"),
            CampaignError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            CampaignError::Persistence(_) => (StatusCode::SERVICE_UNAVAILABLE, "persistence_unavailable"),
            CampaignError::Config(_) => (StatusCode::SERVICE_UNAVAILABLE, "not_configured"),
            CampaignError::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            CampaignError::Suggestion(_) => (StatusCode::BAD_GATEWAY, "suggestion_failed"),
            CampaignError::Io(_) | CampaignError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = if status.is_server_error() {
            error!(error = %self.0, status = status.as_u16(), "Request failed");
            metrics::counter!("api.errors").increment(1);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                "Internal processing error".to_string()
            } else {
                self.0.to_string()
            }
        } else {
            warn!(error = %self.0, status = status.as_u16(), "Request rejected");
            metrics::counter!("api.validation_errors").increment(1);
            self.0.to_string()
        };
        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}
