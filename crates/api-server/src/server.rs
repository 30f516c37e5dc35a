//! API server — REST router, HTTP listener and Prometheus exporter.

use crate::rest::{self, AppState};
use crate::swagger::ApiDoc;
use crate::{campaign_rest, segment_rest, webhook_rest};
use axum::routing::{get, post};
use axum::Router;
use campaign_core::config::AppConfig;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Build the full REST router over shared state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Segments
        .route(
            "/v1/segments",
            post(segment_rest::handle_create_segment).get(segment_rest::handle_list_segments),
        )
        .route("/v1/segments/preview", post(segment_rest::handle_preview))
        .route("/v1/segments/suggest", post(segment_rest::handle_suggest))
        .route(
            "/v1/segments/:id",
            get(segment_rest::handle_get_segment)
                .put(segment_rest::handle_update_segment)
                .delete(segment_rest::handle_delete_segment),
        )
        .route(
            "/v1/segments/:id/customers",
            get(segment_rest::handle_segment_customers),
        )
        // Campaigns
        .route(
            "/v1/campaigns",
            post(campaign_rest::handle_create_campaign).get(campaign_rest::handle_list_campaigns),
        )
        .route(
            "/v1/campaigns/:id",
            get(campaign_rest::handle_get_campaign).delete(campaign_rest::handle_delete_campaign),
        )
        .route(
            "/v1/campaigns/:id/messages",
            get(campaign_rest::handle_campaign_messages),
        )
        .route(
            "/v1/campaigns/:id/stats",
            get(campaign_rest::handle_campaign_stats),
        )
        // Vendor callbacks
        .route(
            "/v1/webhooks/delivery-receipts",
            post(webhook_rest::handle_delivery_receipts),
        )
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Start the HTTP REST server. Runs until the listener fails.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = build_router(self.state.clone());

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Install the Prometheus recorder and serve it on the metrics port.
    /// Must be called from within the Tokio runtime.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        if !self.config.metrics.enabled {
            info!("Metrics exporter disabled");
            return Ok(());
        }
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
