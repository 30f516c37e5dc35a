//! Receipt reconciler — applies asynchronous delivery receipts and dispatch
//! outcomes to the message log, and completes campaigns once every message
//! is processed.
//!
//! Receipts may arrive before the dispatch path has recorded the provider's
//! acknowledgement, more than once, or out of order. Each one is applied
//! through the store's guarded transition, so duplicates are no-ops and a
//! receipt contradicting a terminal status is rejected rather than applied.

use crate::store::{DeliveryStore, MessageUpdate, TransitionOutcome};
use campaign_core::config::CompletionPolicy;
use campaign_core::event_bus::{make_event, noop_sink, EventSink, EventType};
use campaign_core::types::{Message, MessageStatus};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const RECEIPT_TIMEOUT_REASON: &str = "receipt_timeout";

/// Delivery receipt as posted by the vendor.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Receipt {
    #[serde(default)]
    pub message_id: Option<Uuid>,
    #[serde(default)]
    pub vendor_message_id: Option<String>,
    pub status: ReceiptStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Delivered,
    Failed,
    Bounced,
}

impl Receipt {
    fn to_update(&self) -> MessageUpdate {
        let at = self.timestamp.unwrap_or_else(Utc::now);
        match self.status {
            ReceiptStatus::Delivered => MessageUpdate::Delivered {
                vendor_message_id: self.vendor_message_id.clone(),
                at,
            },
            ReceiptStatus::Failed => MessageUpdate::Failed {
                reason: self
                    .reason
                    .clone()
                    .unwrap_or_else(|| "vendor_reported_failure".to_string()),
                at,
            },
            ReceiptStatus::Bounced => MessageUpdate::Bounced {
                reason: self.reason.clone(),
                at,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReceiptOutcome {
    Applied {
        message_id: Uuid,
        status: MessageStatus,
    },
    Duplicate {
        message_id: Uuid,
        status: MessageStatus,
    },
    Rejected {
        message_id: Uuid,
        status: MessageStatus,
        requested: MessageStatus,
    },
}

fn event_type_for(status: MessageStatus) -> Option<EventType> {
    match status {
        MessageStatus::Sent => Some(EventType::MessageSent),
        MessageStatus::Delivered => Some(EventType::MessageDelivered),
        MessageStatus::Failed => Some(EventType::MessageFailed),
        MessageStatus::Bounced => Some(EventType::MessageBounced),
        MessageStatus::Pending => None,
    }
}

pub struct ReceiptReconciler {
    store: Arc<dyn DeliveryStore>,
    policy: CompletionPolicy,
    event_sink: Arc<dyn EventSink>,
}

impl ReceiptReconciler {
    pub fn new(store: Arc<dyn DeliveryStore>, policy: CompletionPolicy) -> Self {
        Self {
            store,
            policy,
            event_sink: noop_sink(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    fn find_message(&self, receipt: &Receipt) -> CampaignResult<Message> {
        if let Some(id) = receipt.message_id {
            if let Some(message) = self.store.get_message(id)? {
                return Ok(message);
            }
        }
        if let Some(vendor_id) = &receipt.vendor_message_id {
            if let Some(message) = self.store.find_by_vendor_id(vendor_id)? {
                return Ok(message);
            }
        }
        match (&receipt.message_id, &receipt.vendor_message_id) {
            (Some(id), _) => Err(CampaignError::not_found("message", id)),
            (None, Some(vendor_id)) => Err(CampaignError::not_found("message", vendor_id)),
            (None, None) => Err(CampaignError::Validation(
                "receipt must carry message_id or vendor_message_id".to_string(),
            )),
        }
    }

    /// Apply one vendor receipt.
    pub fn apply_receipt(&self, receipt: &Receipt) -> CampaignResult<ReceiptOutcome> {
        let message = self.find_message(receipt)?;
        let update = receipt.to_update();
        let requested = update.target();

        let outcome = match self.record(message.id, update)? {
            TransitionOutcome::Applied(m) => {
                metrics::counter!("receipts.applied", "status" => m.status.as_str()).increment(1);
                debug!(message_id = %m.id, status = m.status.as_str(), "Receipt applied");
                self.check_completion(m.campaign_id)?;
                ReceiptOutcome::Applied {
                    message_id: m.id,
                    status: m.status,
                }
            }
            TransitionOutcome::Duplicate(m) => {
                metrics::counter!("receipts.duplicate").increment(1);
                debug!(message_id = %m.id, "Duplicate receipt ignored");
                ReceiptOutcome::Duplicate {
                    message_id: m.id,
                    status: m.status,
                }
            }
            TransitionOutcome::Rejected(m) => {
                metrics::counter!("receipts.rejected").increment(1);
                warn!(
                    message_id = %m.id,
                    current = m.status.as_str(),
                    requested = requested.as_str(),
                    "Receipt contradicts recorded status, rejected"
                );
                ReceiptOutcome::Rejected {
                    message_id: m.id,
                    status: m.status,
                    requested,
                }
            }
        };
        Ok(outcome)
    }

    /// Record a status change for a message and emit the matching event when
    /// it applies. Used for dispatch outcomes as well as receipts.
    pub fn record(&self, message_id: Uuid, update: MessageUpdate) -> CampaignResult<TransitionOutcome> {
        let outcome = self.store.transition_message(message_id, update)?;
        if let TransitionOutcome::Applied(m) = &outcome {
            if let Some(event_type) = event_type_for(m.status) {
                self.event_sink.emit(make_event(
                    event_type,
                    m.campaign_id,
                    Some(m.id),
                    m.failure_reason.clone(),
                ));
            }
        }
        Ok(outcome)
    }

    /// Complete the campaign if every message is processed. Returns whether
    /// this call completed it.
    pub fn check_completion(&self, campaign_id: Uuid) -> CampaignResult<bool> {
        let Some(campaign) = self.store.complete_if_processed(campaign_id, self.policy)? else {
            return Ok(false);
        };
        let stats = self.store.campaign_stats(campaign_id)?;
        metrics::counter!("campaigns.completed").increment(1);
        info!(
            campaign_id = %campaign.id,
            total = stats.total_messages,
            sent = stats.sent_messages,
            failed = stats.failed_messages,
            "Campaign completed"
        );
        self.event_sink.emit(make_event(
            EventType::CampaignCompleted,
            campaign.id,
            None,
            Some(format!("{} messages", stats.total_messages)),
        ));
        Ok(true)
    }

    /// Fail every `sent` message that has waited longer than `timeout` for a
    /// receipt, then re-check completion for the affected campaigns.
    pub fn expire_stale(&self, timeout: chrono::Duration) -> CampaignResult<usize> {
        let cutoff = Utc::now() - timeout;
        let mut expired = 0;
        let mut campaigns = HashSet::new();
        for message in self.store.stale_sent_messages(cutoff)? {
            let outcome = self.record(message.id, MessageUpdate::failed(RECEIPT_TIMEOUT_REASON))?;
            if outcome.is_applied() {
                expired += 1;
                campaigns.insert(message.campaign_id);
            }
        }
        for campaign_id in campaigns {
            match self.check_completion(campaign_id) {
                Ok(_) | Err(CampaignError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if expired > 0 {
            metrics::counter!("receipts.expired").increment(expired as u64);
            info!(expired, "Expired messages awaiting receipts");
        }
        Ok(expired)
    }

    /// Drain receipts posted on an in-process channel.
    pub fn spawn_pump(self: Arc<Self>, mut receipts: mpsc::UnboundedReceiver<Receipt>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(receipt) = receipts.recv().await {
                if let Err(e) = self.apply_receipt(&receipt) {
                    warn!(error = %e, "Failed to apply receipt");
                }
            }
            debug!("Receipt channel closed");
        })
    }

    /// Periodically expire messages stuck in `sent`.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, timeout: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let timeout = match chrono::Duration::from_std(timeout) {
                Ok(timeout) => timeout,
                Err(e) => {
                    error!(error = %e, "Receipt timeout out of range, sweeper disabled");
                    return;
                }
            };
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.expire_stale(timeout) {
                    warn!(error = %e, "Receipt sweep failed");
                }
            }
        })
    }
}
