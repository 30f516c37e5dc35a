//! OpenAPI specification and Swagger UI configuration.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Campaign Messenger API",
        version = "0.1.0",
        description = "Rule-based customer segmentation and campaign messaging.\n\nCompiles nested segment rules into parameterized filters, dispatches one message per matching customer, and reconciles asynchronous delivery receipts.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Segments", description = "Segment rules, previews, audiences and rule suggestions"),
        (name = "Campaigns", description = "Campaign creation, dispatch status and message logs"),
        (name = "Webhooks", description = "Delivery receipt callbacks from the messaging vendor"),
        (name = "Operations", description = "Health, readiness, and liveness probes"),
    ),
    paths(
        // Segments
        crate::segment_rest::handle_create_segment,
        crate::segment_rest::handle_list_segments,
        crate::segment_rest::handle_get_segment,
        crate::segment_rest::handle_update_segment,
        crate::segment_rest::handle_delete_segment,
        crate::segment_rest::handle_preview,
        crate::segment_rest::handle_segment_customers,
        crate::segment_rest::handle_suggest,
        // Campaigns
        crate::campaign_rest::handle_create_campaign,
        crate::campaign_rest::handle_list_campaigns,
        crate::campaign_rest::handle_get_campaign,
        crate::campaign_rest::handle_delete_campaign,
        crate::campaign_rest::handle_campaign_messages,
        crate::campaign_rest::handle_campaign_stats,
        // Webhooks
        crate::webhook_rest::handle_delivery_receipts,
        // Operations
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
    ),
    components(schemas(
        // Domain types
        campaign_core::types::Customer,
        campaign_core::types::CustomerStatus,
        campaign_core::types::Campaign,
        campaign_core::types::CampaignStatus,
        campaign_core::types::Message,
        campaign_core::types::MessageStatus,
        campaign_core::types::CampaignStats,
        // Segment types
        campaign_segmentation::Segment,
        campaign_segmentation::segments::SegmentPreview,
        campaign_segmentation::filter::DroppedCondition,
        campaign_segmentation::resolver::CustomerPage,
        crate::segment_rest::CreateSegmentRequest,
        crate::segment_rest::UpdateSegmentRequest,
        crate::segment_rest::PreviewRequest,
        crate::segment_rest::SuggestRequest,
        crate::segment_rest::SuggestResponse,
        // Campaign and receipt types
        campaign_delivery::NewCampaign,
        campaign_delivery::Receipt,
        campaign_delivery::ReceiptStatus,
        campaign_delivery::ReceiptOutcome,
        crate::webhook_rest::ReceiptBatch,
        crate::webhook_rest::ReceiptResult,
        crate::webhook_rest::ReceiptBatchResponse,
        // REST error/health types
        crate::error::ErrorResponse,
        crate::rest::HealthResponse,
    ))
)]
pub struct ApiDoc;
