//! Delivery receipt webhook.

use crate::error::ErrorResponse;
use crate::rest::AppState;
use axum::extract::State;
use axum::Json;
use campaign_core::CampaignError;
use campaign_delivery::{Receipt, ReceiptOutcome};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReceiptBatch {
    pub receipts: Vec<Receipt>,
}

/// Per-receipt result, in request order.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReceiptResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ReceiptOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct ReceiptBatchResponse {
    pub applied: usize,
    pub duplicate: usize,
    pub rejected: usize,
    pub unknown: usize,
    pub invalid: usize,
    pub results: Vec<ReceiptResult>,
}

/// POST /v1/webhooks/delivery-receipts — Apply a batch of vendor receipts.
///
/// Every receipt is applied independently; one bad entry never fails the
/// batch.
#[utoipa::path(
    post,
    path = "/v1/webhooks/delivery-receipts",
    tag = "Webhooks",
    request_body = ReceiptBatch,
    responses(
        (status = 200, description = "Receipts processed", body = ReceiptBatchResponse),
        (status = 400, description = "Malformed batch", body = ErrorResponse),
    )
)]
pub async fn handle_delivery_receipts(
    State(state): State<AppState>,
    Json(batch): Json<ReceiptBatch>,
) -> Json<ReceiptBatchResponse> {
    let mut response = ReceiptBatchResponse::default();
    for (index, receipt) in batch.receipts.iter().enumerate() {
        let result = match state.reconciler.apply_receipt(receipt) {
            Ok(outcome) => {
                match &outcome {
                    ReceiptOutcome::Applied { .. } => response.applied += 1,
                    ReceiptOutcome::Duplicate { .. } => response.duplicate += 1,
                    ReceiptOutcome::Rejected { .. } => response.rejected += 1,
                }
                ReceiptResult {
                    index,
                    outcome: Some(outcome),
                    error: None,
                }
            }
            Err(e) => {
                match e {
                    CampaignError::NotFound { .. } => response.unknown += 1,
                    _ => response.invalid += 1,
                }
                warn!(index, error = %e, "Receipt not applied");
                ReceiptResult {
                    index,
                    outcome: None,
                    error: Some(e.to_string()),
                }
            }
        };
        response.results.push(result);
    }
    metrics::counter!("receipts.received").increment(batch.receipts.len() as u64);
    info!(
        received = batch.receipts.len(),
        applied = response.applied,
        duplicate = response.duplicate,
        rejected = response.rejected,
        "Delivery receipt batch processed"
    );
    Json(response)
}
