//! Dispatch engine — turns a campaign into one message per customer in the
//! segment's current audience and hands each to the delivery provider.
//!
//! All messages are persisted as `pending` before the first send, so the
//! campaign's total is fixed up front. Sends run concurrently, bounded by a
//! semaphore, each under its own timeout. Once the send loop drains, no
//! message is left `pending`.

use crate::provider::{DeliveryProvider, DeliveryRequest, ProviderResponse};
use crate::reconciler::ReceiptReconciler;
use crate::store::{DeliveryStore, MessageUpdate};
use campaign_core::config::DispatchConfig;
use campaign_core::event_bus::{make_event, noop_sink, EventSink, EventType};
use campaign_core::templates::MessageTemplate;
use campaign_core::types::{Campaign, CampaignStats, Message, MessageStatus};
use campaign_core::{CampaignError, CampaignResult};
use campaign_segmentation::{Segment, SegmentService};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const PROVIDER_TIMEOUT_REASON: &str = "provider_timeout";
const DISPATCH_ABORTED_REASON: &str = "dispatch_aborted";

/// Counts observed when the send loop finished.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DispatchSummary {
    pub campaign_id: Uuid,
    pub total_messages: u64,
    pub sent_messages: u64,
    pub failed_messages: u64,
    pub pending_messages: u64,
    pub completed: bool,
}

impl DispatchSummary {
    fn from_stats(stats: &CampaignStats, completed: bool) -> Self {
        Self {
            campaign_id: stats.campaign_id,
            total_messages: stats.total_messages,
            sent_messages: stats.sent_messages,
            failed_messages: stats.failed_messages,
            pending_messages: stats.pending_messages,
            completed,
        }
    }
}

pub struct DispatchEngine {
    store: Arc<dyn DeliveryStore>,
    provider: Arc<dyn DeliveryProvider>,
    reconciler: Arc<ReceiptReconciler>,
    segments: Arc<SegmentService>,
    max_concurrent_sends: usize,
    send_timeout: Duration,
    event_sink: Arc<dyn EventSink>,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        provider: Arc<dyn DeliveryProvider>,
        reconciler: Arc<ReceiptReconciler>,
        segments: Arc<SegmentService>,
        config: &DispatchConfig,
    ) -> Self {
        info!(
            provider = provider.name(),
            max_concurrent_sends = config.max_concurrent_sends,
            send_timeout_ms = config.send_timeout_ms,
            "Dispatch engine initialized"
        );
        Self {
            store,
            provider,
            reconciler,
            segments,
            max_concurrent_sends: config.max_concurrent_sends.max(1),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
            event_sink: noop_sink(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn store(&self) -> &Arc<dyn DeliveryStore> {
        &self.store
    }

    /// Dispatch a campaign that is already persisted as `sending`. Any error
    /// moves the campaign to `failed`.
    pub async fn dispatch(&self, campaign: &Campaign, segment: &Segment) -> CampaignResult<DispatchSummary> {
        match self.run(campaign, segment).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                self.fail_campaign(campaign.id, &e);
                Err(e)
            }
        }
    }

    async fn run(&self, campaign: &Campaign, segment: &Segment) -> CampaignResult<DispatchSummary> {
        let audience = self.segments.current_audience(segment).await?;
        let template = MessageTemplate::new(campaign.message_template.clone());
        let unknown = template.unknown_placeholders();
        if !unknown.is_empty() {
            warn!(campaign_id = %campaign.id, placeholders = ?unknown, "Template has unknown placeholders");
        }

        let mut requests = Vec::with_capacity(audience.len());
        for customer in &audience {
            let message = Message {
                id: Uuid::new_v4(),
                campaign_id: campaign.id,
                customer_id: customer.id,
                message_content: template.render(customer),
                status: MessageStatus::Pending,
                created_at: Utc::now(),
                sent_at: None,
                delivered_at: None,
                failure_reason: None,
                vendor_message_id: None,
            };
            requests.push(DeliveryRequest {
                message_id: message.id,
                campaign_id: campaign.id,
                customer_id: customer.id,
                content: message.message_content.clone(),
            });
            self.store.insert_message(message)?;
        }
        metrics::counter!("dispatch.messages_created").increment(requests.len() as u64);
        info!(
            campaign_id = %campaign.id,
            segment_id = %segment.id,
            messages = requests.len(),
            "Campaign messages created"
        );

        let send_result = self.send_all(requests).await;
        self.fail_leftover_pending(campaign.id)?;
        send_result?;

        let completed = self.reconciler.check_completion(campaign.id)?;
        let stats = self.store.campaign_stats(campaign.id)?;
        info!(
            campaign_id = %campaign.id,
            total = stats.total_messages,
            sent = stats.sent_messages,
            failed = stats.failed_messages,
            completed,
            "Dispatch finished"
        );
        Ok(DispatchSummary::from_stats(&stats, completed))
    }

    async fn send_all(&self, requests: Vec<DeliveryRequest>) -> CampaignResult<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_sends));
        let mut tasks = JoinSet::new();

        for request in requests {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| CampaignError::Internal(e.into()))?;
            let provider = self.provider.clone();
            let reconciler = self.reconciler.clone();
            let timeout = self.send_timeout;
            tasks.spawn(async move {
                let _permit = permit;
                let update = send_one(provider.as_ref(), &request, timeout).await;
                reconciler.record(request.message_id, update)
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let err = match joined {
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => e,
                Err(e) => CampaignError::Internal(e.into()),
            };
            error!(error = %err, "Failed to record send outcome");
            first_error.get_or_insert(err);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Anything still `pending` after the send loop never got an outcome
    /// recorded (task panic, recording failure).
    fn fail_leftover_pending(&self, campaign_id: Uuid) -> CampaignResult<()> {
        for message in self.store.list_messages(campaign_id)? {
            if message.status == MessageStatus::Pending {
                self.reconciler
                    .record(message.id, MessageUpdate::failed(DISPATCH_ABORTED_REASON))?;
            }
        }
        Ok(())
    }

    /// Fail whatever is still pending and move the campaign to `failed`,
    /// unless it already left `sending`.
    pub(crate) fn fail_campaign(&self, campaign_id: Uuid, cause: &CampaignError) {
        error!(campaign_id = %campaign_id, error = %cause, "Campaign dispatch failed");
        if let Err(e) = self.fail_leftover_pending(campaign_id) {
            warn!(campaign_id = %campaign_id, error = %e, "Could not fail pending messages");
        }
        match self.store.fail_if_sending(campaign_id) {
            Ok(Some(_)) => {
                metrics::counter!("campaigns.failed").increment(1);
                self.event_sink.emit(make_event(
                    EventType::CampaignFailed,
                    campaign_id,
                    None,
                    Some(cause.to_string()),
                ))
            }
            Ok(None) => info!(campaign_id = %campaign_id, "Campaign already left sending, status kept"),
            Err(e) => warn!(campaign_id = %campaign_id, error = %e, "Could not mark campaign failed"),
        }
    }
}

async fn send_one(
    provider: &dyn DeliveryProvider,
    request: &DeliveryRequest,
    timeout: Duration,
) -> MessageUpdate {
    let start = Instant::now();
    let result = tokio::time::timeout(timeout, provider.send(request)).await;
    metrics::histogram!("dispatch.send_latency_ms").record(start.elapsed().as_millis() as f64);

    let (update, outcome) = match result {
        Ok(Ok(ProviderResponse::Accepted { vendor_message_id })) => (
            MessageUpdate::Sent {
                vendor_message_id: Some(vendor_message_id),
                at: Utc::now(),
            },
            "accepted",
        ),
        Ok(Ok(ProviderResponse::Rejected { reason })) => (
            MessageUpdate::failed(format!("provider_rejected: {reason}")),
            "rejected",
        ),
        Ok(Err(CampaignError::Provider(reason))) => (
            MessageUpdate::failed(format!("provider_error: {reason}")),
            "error",
        ),
        Ok(Err(e)) => (MessageUpdate::failed(format!("provider_error: {e}")), "error"),
        Err(_) => (MessageUpdate::failed(PROVIDER_TIMEOUT_REASON), "timeout"),
    };
    metrics::counter!("dispatch.sends", "outcome" => outcome).increment(1);
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryDeliveryStore, TransitionOutcome};
    use async_trait::async_trait;
    use campaign_core::config::CompletionPolicy;
    use campaign_core::event_bus::capture_sink;
    use campaign_core::types::{CampaignStatus, Customer, CustomerStatus};
    use campaign_segmentation::segments::NewSegment;
    use campaign_segmentation::{
        AudienceResolver, InMemoryCustomerStore, PredicateCompiler, RuleTree, SegmentRepository,
    };
    use chrono::DateTime;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Rejects every customer whose id is divisible by `reject_every`.
    struct ScriptedProvider {
        reject_every: i64,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(reject_every: i64, delay: Duration) -> Self {
            Self {
                reject_every,
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DeliveryProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn send(&self, request: &DeliveryRequest) -> CampaignResult<ProviderResponse> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if request.customer_id % self.reject_every == 0 {
                Ok(ProviderResponse::Rejected {
                    reason: "blocked".into(),
                })
            } else {
                Ok(ProviderResponse::Accepted {
                    vendor_message_id: format!("v-{}", request.message_id),
                })
            }
        }
    }

    /// Every call fails before reaching the vendor.
    struct UnreachableProvider;

    #[async_trait]
    impl DeliveryProvider for UnreachableProvider {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        async fn send(&self, _request: &DeliveryRequest) -> CampaignResult<ProviderResponse> {
            Err(CampaignError::Provider("connection refused".into()))
        }
    }

    /// Fails message inserts after `allow` successful ones.
    struct FlakyStore {
        inner: InMemoryDeliveryStore,
        allow: usize,
        inserted: AtomicUsize,
    }

    impl DeliveryStore for FlakyStore {
        fn insert_campaign(&self, campaign: Campaign) -> CampaignResult<()> {
            self.inner.insert_campaign(campaign)
        }
        fn get_campaign(&self, id: Uuid) -> CampaignResult<Option<Campaign>> {
            self.inner.get_campaign(id)
        }
        fn list_campaigns(&self) -> CampaignResult<Vec<Campaign>> {
            self.inner.list_campaigns()
        }
        fn fail_if_sending(&self, id: Uuid) -> CampaignResult<Option<Campaign>> {
            self.inner.fail_if_sending(id)
        }
        fn delete_campaign(&self, id: Uuid) -> CampaignResult<bool> {
            self.inner.delete_campaign(id)
        }
        fn insert_message(&self, message: Message) -> CampaignResult<()> {
            if self.inserted.fetch_add(1, Ordering::SeqCst) >= self.allow {
                return Err(CampaignError::Persistence("disk full".into()));
            }
            self.inner.insert_message(message)
        }
        fn get_message(&self, id: Uuid) -> CampaignResult<Option<Message>> {
            self.inner.get_message(id)
        }
        fn find_by_vendor_id(&self, vendor_message_id: &str) -> CampaignResult<Option<Message>> {
            self.inner.find_by_vendor_id(vendor_message_id)
        }
        fn list_messages(&self, campaign_id: Uuid) -> CampaignResult<Vec<Message>> {
            self.inner.list_messages(campaign_id)
        }
        fn transition_message(
            &self,
            id: Uuid,
            update: MessageUpdate,
        ) -> CampaignResult<TransitionOutcome> {
            self.inner.transition_message(id, update)
        }
        fn stale_sent_messages(&self, cutoff: DateTime<Utc>) -> CampaignResult<Vec<Message>> {
            self.inner.stale_sent_messages(cutoff)
        }
        fn campaign_stats(&self, campaign_id: Uuid) -> CampaignResult<CampaignStats> {
            self.inner.campaign_stats(campaign_id)
        }
        fn complete_if_processed(
            &self,
            campaign_id: Uuid,
            policy: CompletionPolicy,
        ) -> CampaignResult<Option<Campaign>> {
            self.inner.complete_if_processed(campaign_id, policy)
        }
    }

    fn customers(n: i64) -> Vec<Customer> {
        (1..=n)
            .map(|id| Customer {
                id,
                name: format!("Customer {id}"),
                email: format!("c{id}@example.com"),
                total_spent: 100.0 * id as f64,
                total_orders: id,
                status: CustomerStatus::Active,
                last_visit: None,
                registration_date: Utc::now(),
            })
            .collect()
    }

    async fn segment_service(n: i64) -> (Arc<SegmentService>, Segment) {
        let resolver =
            AudienceResolver::new(Arc::new(InMemoryCustomerStore::with_customers(customers(n))));
        let service = Arc::new(SegmentService::new(
            Arc::new(SegmentRepository::new()),
            PredicateCompiler::default(),
            resolver,
        ));
        let segment = service
            .create_segment(NewSegment {
                name: "Active".into(),
                description: None,
                rules: RuleTree::from_value(
                    json!({ "field": "status", "operator": "equals", "value": "active" }),
                )
                .unwrap(),
                created_by: "admin".into(),
            })
            .await
            .unwrap();
        (service, segment)
    }

    fn campaign(segment: &Segment, template: &str) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            name: "Launch".into(),
            description: None,
            segment_id: segment.id,
            message_template: template.into(),
            status: CampaignStatus::Sending,
            scheduled_at: None,
            sent_at: None,
            created_by: "admin".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn config(max_concurrent_sends: usize, send_timeout_ms: u64) -> DispatchConfig {
        DispatchConfig {
            max_concurrent_sends,
            send_timeout_ms,
            ..Default::default()
        }
    }

    fn engine(
        store: Arc<dyn DeliveryStore>,
        provider: Arc<dyn DeliveryProvider>,
        segments: Arc<SegmentService>,
        policy: CompletionPolicy,
        config: &DispatchConfig,
    ) -> DispatchEngine {
        let reconciler = Arc::new(ReceiptReconciler::new(store.clone(), policy));
        DispatchEngine::new(store, provider, reconciler, segments, config)
    }

    #[tokio::test]
    async fn test_every_message_resolved() {
        let (segments, segment) = segment_service(20).await;
        let store = Arc::new(InMemoryDeliveryStore::new());
        let c = campaign(&segment, "Hi {name}, you spent {total_spent}");
        store.insert_campaign(c.clone()).unwrap();
        let provider = Arc::new(ScriptedProvider::new(5, Duration::from_millis(1)));
        let engine = engine(
            store.clone(),
            provider,
            segments,
            CompletionPolicy::AwaitReceipts,
            &config(4, 1000),
        );

        let summary = engine.dispatch(&c, &segment).await.unwrap();
        assert_eq!(summary.total_messages, 20);
        assert_eq!(summary.sent_messages + summary.failed_messages, 20);
        assert_eq!(summary.failed_messages, 4);
        assert_eq!(summary.pending_messages, 0);
        // Accepted messages still await receipts.
        assert!(!summary.completed);

        let messages = store.list_messages(c.id).unwrap();
        let first = messages.iter().find(|m| m.customer_id == 1).unwrap();
        assert_eq!(first.message_content, "Hi Customer 1, you spent 100");
        assert!(first.vendor_message_id.is_some());
        let rejected = messages.iter().find(|m| m.customer_id == 5).unwrap();
        assert_eq!(rejected.status, MessageStatus::Failed);
        assert_eq!(rejected.failure_reason.as_deref(), Some("provider_rejected: blocked"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let (segments, segment) = segment_service(30).await;
        let store = Arc::new(InMemoryDeliveryStore::new());
        let c = campaign(&segment, "Hi");
        store.insert_campaign(c.clone()).unwrap();
        let provider = Arc::new(ScriptedProvider::new(i64::MAX, Duration::from_millis(5)));
        let engine = engine(
            store.clone(),
            provider.clone(),
            segments,
            CompletionPolicy::AcceptedCounts,
            &config(3, 1000),
        );

        let summary = engine.dispatch(&c, &segment).await.unwrap();
        assert!(provider.peak.load(Ordering::SeqCst) <= 3);
        assert!(summary.completed);
        assert_eq!(
            store.get_campaign(c.id).unwrap().unwrap().status,
            CampaignStatus::Sent
        );
    }

    #[tokio::test]
    async fn test_all_failed_campaign_completes() {
        let (segments, segment) = segment_service(3).await;
        let store = Arc::new(InMemoryDeliveryStore::new());
        let c = campaign(&segment, "Hi");
        store.insert_campaign(c.clone()).unwrap();
        let sink = capture_sink();
        let provider = Arc::new(ScriptedProvider::new(1, Duration::ZERO));
        let reconciler = Arc::new(
            ReceiptReconciler::new(store.clone(), CompletionPolicy::AwaitReceipts)
                .with_event_sink(sink.clone()),
        );
        let engine = DispatchEngine::new(store.clone(), provider, reconciler, segments, &config(2, 1000));

        let summary = engine.dispatch(&c, &segment).await.unwrap();
        assert_eq!(summary.failed_messages, 3);
        assert!(summary.completed);
        assert_eq!(sink.count_type(EventType::MessageFailed), 3);
        assert_eq!(sink.count_type(EventType::CampaignCompleted), 1);
    }

    #[tokio::test]
    async fn test_send_timeout_fails_message() {
        let (segments, segment) = segment_service(2).await;
        let store = Arc::new(InMemoryDeliveryStore::new());
        let c = campaign(&segment, "Hi");
        store.insert_campaign(c.clone()).unwrap();
        let provider = Arc::new(ScriptedProvider::new(i64::MAX, Duration::from_millis(200)));
        let engine = engine(
            store.clone(),
            provider,
            segments,
            CompletionPolicy::AwaitReceipts,
            &config(2, 10),
        );

        let summary = engine.dispatch(&c, &segment).await.unwrap();
        assert_eq!(summary.failed_messages, 2);
        assert!(store
            .list_messages(c.id)
            .unwrap()
            .iter()
            .all(|m| m.failure_reason.as_deref() == Some(PROVIDER_TIMEOUT_REASON)));
    }

    #[tokio::test]
    async fn test_provider_errors_fail_messages() {
        let (segments, segment) = segment_service(3).await;
        let store = Arc::new(InMemoryDeliveryStore::new());
        let c = campaign(&segment, "Hi");
        store.insert_campaign(c.clone()).unwrap();
        let engine = engine(
            store.clone(),
            Arc::new(UnreachableProvider),
            segments,
            CompletionPolicy::AwaitReceipts,
            &config(2, 1000),
        );

        let summary = engine.dispatch(&c, &segment).await.unwrap();
        assert_eq!(summary.failed_messages, 3);
        assert!(summary.completed);
        assert!(store
            .list_messages(c.id)
            .unwrap()
            .iter()
            .all(|m| m.failure_reason.as_deref() == Some("provider_error: connection refused")));
    }

    #[tokio::test]
    async fn test_persistence_failure_fails_campaign() {
        let (segments, segment) = segment_service(5).await;
        let store = Arc::new(FlakyStore {
            inner: InMemoryDeliveryStore::new(),
            allow: 2,
            inserted: AtomicUsize::new(0),
        });
        let c = campaign(&segment, "Hi");
        store.insert_campaign(c.clone()).unwrap();
        let engine = engine(
            store.clone(),
            Arc::new(ScriptedProvider::new(i64::MAX, Duration::ZERO)),
            segments,
            CompletionPolicy::AwaitReceipts,
            &config(2, 1000),
        );

        let err = engine.dispatch(&c, &segment).await.unwrap_err();
        assert!(matches!(err, CampaignError::Persistence(_)));
        assert_eq!(
            store.get_campaign(c.id).unwrap().unwrap().status,
            CampaignStatus::Failed
        );
        let messages = store.list_messages(c.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.status == MessageStatus::Failed));
    }

    #[tokio::test]
    async fn test_late_failure_keeps_completed_status() {
        let (segments, segment) = segment_service(2).await;
        let store = Arc::new(InMemoryDeliveryStore::new());
        let c = campaign(&segment, "Hi");
        store.insert_campaign(c.clone()).unwrap();
        let sink = capture_sink();
        let engine = engine(
            store.clone(),
            Arc::new(ScriptedProvider::new(i64::MAX, Duration::ZERO)),
            segments,
            CompletionPolicy::AcceptedCounts,
            &config(2, 1000),
        )
        .with_event_sink(sink.clone());

        assert!(engine.dispatch(&c, &segment).await.unwrap().completed);
        engine.fail_campaign(c.id, &CampaignError::Persistence("late".into()));

        let stored = store.get_campaign(c.id).unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Sent);
        assert!(stored.sent_at.is_some());
        assert_eq!(sink.count_type(EventType::CampaignFailed), 0);
    }

    #[tokio::test]
    async fn test_empty_audience_completes_immediately() {
        let (segments, segment) = segment_service(0).await;
        let store = Arc::new(InMemoryDeliveryStore::new());
        let c = campaign(&segment, "Hi");
        store.insert_campaign(c.clone()).unwrap();
        let engine = engine(
            store.clone(),
            Arc::new(ScriptedProvider::new(i64::MAX, Duration::ZERO)),
            segments,
            CompletionPolicy::AwaitReceipts,
            &config(2, 1000),
        );

        let summary = engine.dispatch(&c, &segment).await.unwrap();
        assert_eq!(summary.total_messages, 0);
        assert!(summary.completed);
    }
}
