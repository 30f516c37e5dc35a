//! Campaign lifecycle — creation starts dispatch in a background worker;
//! reads go straight to the delivery store.

use crate::dispatcher::{DispatchEngine, DispatchSummary};
use crate::store::DeliveryStore;
use campaign_core::types::{Campaign, CampaignStats, CampaignStatus, Message};
use campaign_core::{CampaignError, CampaignResult};
use campaign_segmentation::SegmentService;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewCampaign {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub segment_id: Uuid,
    pub message_template: String,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default = "default_created_by")]
    pub created_by: String,
}

fn default_created_by() -> String {
    "admin".to_string()
}

/// Handle on a running dispatch worker. Dropping it does not stop dispatch.
#[derive(Debug)]
pub struct DispatchHandle {
    campaign_id: Uuid,
    task: JoinHandle<CampaignResult<DispatchSummary>>,
}

impl DispatchHandle {
    pub fn campaign_id(&self) -> Uuid {
        self.campaign_id
    }

    /// Wait for the send loop to drain.
    pub async fn wait(self) -> CampaignResult<DispatchSummary> {
        self.task
            .await
            .map_err(|e| CampaignError::Internal(e.into()))?
    }
}

/// Await the worker so a panic or cancellation still moves the campaign out
/// of `sending`.
fn supervise(
    engine: Arc<DispatchEngine>,
    campaign_id: Uuid,
    worker: JoinHandle<CampaignResult<DispatchSummary>>,
) -> JoinHandle<CampaignResult<DispatchSummary>> {
    tokio::spawn(async move {
        match worker.await {
            Ok(result) => result,
            Err(e) => {
                error!(campaign_id = %campaign_id, error = %e, "Dispatch worker aborted");
                let err = CampaignError::Internal(e.into());
                engine.fail_campaign(campaign_id, &err);
                Err(err)
            }
        }
    })
}

pub struct CampaignService {
    store: Arc<dyn DeliveryStore>,
    segments: Arc<SegmentService>,
    engine: Arc<DispatchEngine>,
}

impl CampaignService {
    pub fn new(segments: Arc<SegmentService>, engine: Arc<DispatchEngine>) -> Self {
        Self {
            store: engine.store().clone(),
            segments,
            engine,
        }
    }

    /// Persist the campaign as `sending` and start dispatch. Returns as soon
    /// as the worker is spawned.
    pub async fn create_campaign(&self, req: NewCampaign) -> CampaignResult<(Campaign, DispatchHandle)> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(CampaignError::Validation(
                "campaign name must not be empty".to_string(),
            ));
        }
        if req.message_template.trim().is_empty() {
            return Err(CampaignError::Validation(
                "message template must not be empty".to_string(),
            ));
        }
        let segment = self.segments.get_segment(req.segment_id)?;

        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: req.description,
            segment_id: segment.id,
            message_template: req.message_template,
            status: CampaignStatus::Sending,
            scheduled_at: req.scheduled_at,
            sent_at: None,
            created_by: req.created_by,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_campaign(campaign.clone())?;
        info!(
            campaign_id = %campaign.id,
            segment_id = %segment.id,
            name = %campaign.name,
            "Campaign created, dispatch starting"
        );

        let engine = self.engine.clone();
        let worker_campaign = campaign.clone();
        let worker = tokio::spawn(async move { engine.dispatch(&worker_campaign, &segment).await });
        let task = supervise(self.engine.clone(), campaign.id, worker);
        Ok((
            campaign.clone(),
            DispatchHandle {
                campaign_id: campaign.id,
                task,
            },
        ))
    }

    pub fn get_campaign(&self, id: Uuid) -> CampaignResult<Campaign> {
        self.store
            .get_campaign(id)?
            .ok_or_else(|| CampaignError::not_found("campaign", id))
    }

    pub fn list_campaigns(&self) -> CampaignResult<Vec<Campaign>> {
        self.store.list_campaigns()
    }

    /// Deleting a campaign that is still sending is refused.
    pub fn delete_campaign(&self, id: Uuid) -> CampaignResult<()> {
        let campaign = self.get_campaign(id)?;
        if campaign.status == CampaignStatus::Sending {
            warn!(campaign_id = %id, "Refusing to delete a campaign that is still sending");
            return Err(CampaignError::Validation(
                "campaign is still sending".to_string(),
            ));
        }
        if !self.store.delete_campaign(id)? {
            return Err(CampaignError::not_found("campaign", id));
        }
        info!(campaign_id = %id, "Campaign deleted");
        Ok(())
    }

    pub fn messages(&self, id: Uuid) -> CampaignResult<Vec<Message>> {
        self.get_campaign(id)?;
        self.store.list_messages(id)
    }

    pub fn stats(&self, id: Uuid) -> CampaignResult<CampaignStats> {
        self.get_campaign(id)?;
        self.store.campaign_stats(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SimulatedProvider;
    use crate::reconciler::ReceiptReconciler;
    use crate::store::InMemoryDeliveryStore;
    use campaign_core::config::{CompletionPolicy, DispatchConfig, ProviderConfig};
    use campaign_core::types::{Customer, CustomerStatus, MessageStatus};
    use campaign_segmentation::segments::NewSegment;
    use campaign_segmentation::{
        AudienceResolver, InMemoryCustomerStore, PredicateCompiler, RuleBuilder, SegmentRepository,
    };
    use tokio::sync::mpsc;

    struct Harness {
        service: CampaignService,
        segments: Arc<SegmentService>,
        reconciler: Arc<ReceiptReconciler>,
    }

    fn harness(failure_rate: f64, receipts: Option<mpsc::UnboundedSender<crate::Receipt>>) -> Harness {
        let customers = (1..=12).map(|id| Customer {
            id,
            name: format!("Customer {id}"),
            email: format!("c{id}@example.com"),
            total_spent: if id % 2 == 0 { 20_000.0 } else { 500.0 },
            total_orders: id,
            status: CustomerStatus::Active,
            last_visit: None,
            registration_date: Utc::now(),
        });
        let segments = Arc::new(SegmentService::new(
            Arc::new(SegmentRepository::new()),
            PredicateCompiler::default(),
            AudienceResolver::new(Arc::new(InMemoryCustomerStore::with_customers(customers))),
        ));
        let store: Arc<dyn DeliveryStore> = Arc::new(InMemoryDeliveryStore::new());
        let reconciler = Arc::new(ReceiptReconciler::new(
            store.clone(),
            CompletionPolicy::AwaitReceipts,
        ));
        let mut provider = SimulatedProvider::new(&ProviderConfig {
            failure_rate,
            bounce_rate: 0.0,
            receipt_delay_ms: 1,
        });
        if let Some(tx) = receipts {
            provider = provider.with_receipts(tx);
        }
        let engine = Arc::new(DispatchEngine::new(
            store,
            Arc::new(provider),
            reconciler.clone(),
            segments.clone(),
            &DispatchConfig::default(),
        ));
        Harness {
            service: CampaignService::new(segments.clone(), engine),
            segments,
            reconciler,
        }
    }

    async fn big_spenders(segments: &SegmentService) -> Uuid {
        segments
            .create_segment(NewSegment {
                name: "Big spenders".into(),
                description: None,
                rules: RuleBuilder::all()
                    .status_equals("active")
                    .total_spent_greater_than(10_000)
                    .build(),
                created_by: "admin".into(),
            })
            .await
            .unwrap()
            .id
    }

    fn request(segment_id: Uuid) -> NewCampaign {
        NewCampaign {
            name: "VIP offer".into(),
            description: None,
            segment_id,
            message_template: "Hi {name}, thanks for {total_orders} orders".into(),
            scheduled_at: None,
            created_by: "admin".into(),
        }
    }

    #[tokio::test]
    async fn test_create_dispatch_and_complete_via_receipts() {
        let (tx, rx) = mpsc::unbounded_channel();
        let h = harness(0.0, Some(tx));
        let pump = h.reconciler.clone().spawn_pump(rx);
        let segment_id = big_spenders(&h.segments).await;

        let (campaign, handle) = h.service.create_campaign(request(segment_id)).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Sending);

        let summary = handle.wait().await.unwrap();
        assert_eq!(summary.total_messages, 6);
        assert_eq!(summary.sent_messages, 6);

        for _ in 0..100 {
            if h.service.get_campaign(campaign.id).unwrap().status == CampaignStatus::Sent {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(h.service.get_campaign(campaign.id).unwrap().status, CampaignStatus::Sent);
        let stats = h.service.stats(campaign.id).unwrap();
        assert_eq!(stats.delivered_messages, 6);
        assert!(h
            .service
            .messages(campaign.id)
            .unwrap()
            .iter()
            .all(|m| m.status == MessageStatus::Delivered && m.customer_id % 2 == 0));
        pump.abort();
    }

    #[tokio::test]
    async fn test_validation_and_unknown_segment() {
        let h = harness(0.0, None);
        let segment_id = big_spenders(&h.segments).await;

        let mut blank = request(segment_id);
        blank.name = "  ".into();
        assert!(matches!(
            h.service.create_campaign(blank).await.unwrap_err(),
            CampaignError::Validation(_)
        ));

        let err = h.service.create_campaign(request(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, CampaignError::NotFound { entity: "segment", .. }));
        assert!(h.service.list_campaigns().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_after_completion() {
        let h = harness(1.0, None);
        let segment_id = big_spenders(&h.segments).await;
        let (campaign, handle) = h.service.create_campaign(request(segment_id)).await.unwrap();
        let summary = handle.wait().await.unwrap();
        assert_eq!(summary.failed_messages, 6);
        assert!(summary.completed);

        h.service.delete_campaign(campaign.id).unwrap();
        assert!(matches!(
            h.service.get_campaign(campaign.id).unwrap_err(),
            CampaignError::NotFound { .. }
        ));
        // The segment is unaffected.
        assert!(h.segments.get_segment(segment_id).is_ok());
    }

    #[tokio::test]
    async fn test_delete_refused_while_sending() {
        let h = harness(0.0, None);
        let segment_id = big_spenders(&h.segments).await;
        let (campaign, handle) = h.service.create_campaign(request(segment_id)).await.unwrap();
        handle.wait().await.unwrap();

        // No receipts arrive, so the campaign stays sending.
        assert!(matches!(
            h.service.delete_campaign(campaign.id).unwrap_err(),
            CampaignError::Validation(_)
        ));
    }

    async fn crashing_worker() -> CampaignResult<DispatchSummary> {
        panic!("worker crashed")
    }

    #[tokio::test]
    async fn test_worker_panic_fails_campaign() {
        let h = harness(0.0, None);
        let segment_id = big_spenders(&h.segments).await;
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: "Doomed".into(),
            description: None,
            segment_id,
            message_template: "Hi".into(),
            status: CampaignStatus::Sending,
            scheduled_at: None,
            sent_at: None,
            created_by: "admin".into(),
            created_at: now,
            updated_at: now,
        };
        h.service.store.insert_campaign(campaign.clone()).unwrap();
        let stranded = Message {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            customer_id: 2,
            message_content: "Hi".into(),
            status: MessageStatus::Pending,
            created_at: now,
            sent_at: None,
            delivered_at: None,
            failure_reason: None,
            vendor_message_id: None,
        };
        h.service.store.insert_message(stranded.clone()).unwrap();

        let task = supervise(h.service.engine.clone(), campaign.id, tokio::spawn(crashing_worker()));
        let err = DispatchHandle { campaign_id: campaign.id, task }.wait().await.unwrap_err();
        assert!(matches!(err, CampaignError::Internal(_)));

        assert_eq!(h.service.get_campaign(campaign.id).unwrap().status, CampaignStatus::Failed);
        let message = h.service.messages(campaign.id).unwrap().remove(0);
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.failure_reason.as_deref(), Some("dispatch_aborted"));
        h.service.delete_campaign(campaign.id).unwrap();
    }
}
