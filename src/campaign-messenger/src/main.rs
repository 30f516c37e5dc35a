//! Campaign Messenger — rule-based segmentation and campaign messaging.
//!
//! Main entry point that wires the customer store, segment service, delivery
//! pipeline and REST API together and starts the server.

use campaign_api::{ApiServer, AppState};
use campaign_core::config::AppConfig;
use campaign_delivery::{
    CampaignService, DeliveryStore, DispatchEngine, InMemoryDeliveryStore, ReceiptReconciler,
    SimulatedProvider,
};
use campaign_segmentation::{
    AudienceResolver, CompilerOptions, HttpRuleSuggester, InMemoryCustomerStore,
    PredicateCompiler, RuleSuggester, SegmentRepository, SegmentService,
};
use clap::Parser;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const DEFAULT_LOG_FILTER: &str = "campaign_messenger=info,campaign_segmentation=info,\
campaign_delivery=info,campaign_api=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(name = "campaign-messenger")]
#[command(about = "Rule-based customer segmentation and campaign messaging")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPAIGN_MESSENGER__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CAMPAIGN_MESSENGER__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// JSON file of customers to seed the in-memory store with
    #[arg(long, env = "CAMPAIGN_MESSENGER__CUSTOMERS__SEED_PATH")]
    seed_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Campaign Messenger starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(seed_file) = cli.seed_file {
        config.customers.seed_path = Some(seed_file);
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        completion_policy = ?config.dispatch.completion_policy,
        "Configuration loaded"
    );

    // Customer store and segmentation
    let customers = match &config.customers.seed_path {
        Some(path) => InMemoryCustomerStore::load_json_file(path)?,
        None => {
            warn!("No customer seed file configured, starting with an empty customer store");
            InMemoryCustomerStore::new()
        }
    };
    let resolver = AudienceResolver::new(Arc::new(customers))
        .with_sample_size(config.segments.preview_sample_size);
    let segments = Arc::new(SegmentService::new(
        Arc::new(SegmentRepository::new()),
        PredicateCompiler::new(CompilerOptions::from(&config.segments)),
        resolver,
    ));
    let suggester = HttpRuleSuggester::from_config(&config.rule_suggester)?
        .map(|s| Arc::new(s) as Arc<dyn RuleSuggester>);

    // Delivery pipeline
    let store: Arc<dyn DeliveryStore> = Arc::new(InMemoryDeliveryStore::new());
    let reconciler = Arc::new(ReceiptReconciler::new(
        store.clone(),
        config.dispatch.completion_policy,
    ));
    let (receipt_tx, receipt_rx) = mpsc::unbounded_channel();
    let provider = SimulatedProvider::new(&config.provider).with_receipts(receipt_tx);
    let engine = Arc::new(DispatchEngine::new(
        store,
        Arc::new(provider),
        reconciler.clone(),
        segments.clone(),
        &config.dispatch,
    ));
    let campaigns = Arc::new(CampaignService::new(segments.clone(), engine));

    reconciler.clone().spawn_pump(receipt_rx);
    reconciler.clone().spawn_sweeper(
        Duration::from_secs(config.dispatch.sweep_interval_secs.max(1)),
        Duration::from_secs(config.dispatch.receipt_timeout_secs),
    );

    let api_server = ApiServer::new(
        config.clone(),
        AppState {
            segments,
            campaigns,
            reconciler,
            suggester,
            node_id: config.node_id.clone(),
            start_time: Instant::now(),
        },
    );

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Campaign Messenger is ready to serve traffic");

    // Blocks until shutdown
    api_server.start_http().await?;

    Ok(())
}
