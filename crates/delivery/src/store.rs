//! Delivery store — campaigns and their message log.
//!
//! Every status change on a message goes through [`DeliveryStore::transition_message`],
//! which enforces the forward-only lifecycle
//! `pending → sent → {delivered, failed, bounced}` (a pending message may also
//! move straight to a terminal status). Campaign completion is decided inside
//! [`DeliveryStore::complete_if_processed`], which holds the campaign entry
//! for the whole check so that concurrent callers complete it exactly once.

use campaign_core::config::CompletionPolicy;
use campaign_core::types::{Campaign, CampaignStats, CampaignStatus, Message, MessageStatus};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// A requested status change for one message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageUpdate {
    Sent {
        vendor_message_id: Option<String>,
        at: DateTime<Utc>,
    },
    Delivered {
        vendor_message_id: Option<String>,
        at: DateTime<Utc>,
    },
    Failed {
        reason: String,
        at: DateTime<Utc>,
    },
    Bounced {
        reason: Option<String>,
        at: DateTime<Utc>,
    },
}

impl MessageUpdate {
    pub fn target(&self) -> MessageStatus {
        match self {
            MessageUpdate::Sent { .. } => MessageStatus::Sent,
            MessageUpdate::Delivered { .. } => MessageStatus::Delivered,
            MessageUpdate::Failed { .. } => MessageStatus::Failed,
            MessageUpdate::Bounced { .. } => MessageStatus::Bounced,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        MessageUpdate::Failed {
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    fn apply(self, message: &mut Message) {
        match self {
            MessageUpdate::Sent {
                vendor_message_id,
                at,
            } => {
                message.sent_at = Some(at);
                if vendor_message_id.is_some() {
                    message.vendor_message_id = vendor_message_id;
                }
            }
            MessageUpdate::Delivered {
                vendor_message_id,
                at,
            } => {
                message.sent_at.get_or_insert(at);
                message.delivered_at = Some(at);
                if message.vendor_message_id.is_none() {
                    message.vendor_message_id = vendor_message_id;
                }
            }
            MessageUpdate::Failed { reason, .. } => {
                message.failure_reason = Some(reason);
            }
            MessageUpdate::Bounced { reason, .. } => {
                message.failure_reason = Some(reason.unwrap_or_else(|| "bounced".to_string()));
            }
        }
    }
}

/// Result of a guarded message transition.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The message moved to the requested status.
    Applied(Message),
    /// The message was already in the requested status; nothing changed.
    Duplicate(Message),
    /// The transition would move the message backwards or contradict a
    /// terminal status; nothing changed.
    Rejected(Message),
}

impl TransitionOutcome {
    pub fn message(&self) -> &Message {
        match self {
            TransitionOutcome::Applied(m)
            | TransitionOutcome::Duplicate(m)
            | TransitionOutcome::Rejected(m) => m,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransitionCheck {
    Apply,
    Duplicate,
    Reject,
}

fn check_transition(current: MessageStatus, target: MessageStatus) -> TransitionCheck {
    if current == target {
        return TransitionCheck::Duplicate;
    }
    match (current, target) {
        (_, MessageStatus::Pending) => TransitionCheck::Reject,
        (MessageStatus::Pending, _) => TransitionCheck::Apply,
        (MessageStatus::Sent, t) if t.is_terminal() => TransitionCheck::Apply,
        _ => TransitionCheck::Reject,
    }
}

/// Persistence seam for campaigns and messages.
pub trait DeliveryStore: Send + Sync {
    fn insert_campaign(&self, campaign: Campaign) -> CampaignResult<()>;
    fn get_campaign(&self, id: Uuid) -> CampaignResult<Option<Campaign>>;
    /// Newest first.
    fn list_campaigns(&self) -> CampaignResult<Vec<Campaign>>;
    /// Mark the campaign `failed` if it is still `sending`. Returns the
    /// campaign when this call performed the transition.
    fn fail_if_sending(&self, id: Uuid) -> CampaignResult<Option<Campaign>>;
    /// Removes the campaign together with its messages.
    fn delete_campaign(&self, id: Uuid) -> CampaignResult<bool>;

    /// Only accepted while the owning campaign is `sending`.
    fn insert_message(&self, message: Message) -> CampaignResult<()>;
    fn get_message(&self, id: Uuid) -> CampaignResult<Option<Message>>;
    fn find_by_vendor_id(&self, vendor_message_id: &str) -> CampaignResult<Option<Message>>;
    /// Creation order.
    fn list_messages(&self, campaign_id: Uuid) -> CampaignResult<Vec<Message>>;
    fn transition_message(&self, id: Uuid, update: MessageUpdate)
        -> CampaignResult<TransitionOutcome>;
    /// `sent` messages whose `sent_at` is older than the cutoff.
    fn stale_sent_messages(&self, cutoff: DateTime<Utc>) -> CampaignResult<Vec<Message>>;

    fn campaign_stats(&self, campaign_id: Uuid) -> CampaignResult<CampaignStats>;
    /// Mark the campaign `sent` if it is still `sending` and every message
    /// counts as processed under `policy`. Returns the campaign when this
    /// call performed the transition.
    fn complete_if_processed(
        &self,
        campaign_id: Uuid,
        policy: CompletionPolicy,
    ) -> CampaignResult<Option<Campaign>>;
}

/// DashMap-backed store.
///
/// Lock order is campaigns → campaign_messages → messages; no method takes
/// them in the reverse direction.
#[derive(Default)]
pub struct InMemoryDeliveryStore {
    campaigns: DashMap<Uuid, Campaign>,
    campaign_messages: DashMap<Uuid, Vec<Uuid>>,
    messages: DashMap<Uuid, Message>,
    vendor_index: DashMap<String, Uuid>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn message_ids(&self, campaign_id: Uuid) -> Vec<Uuid> {
        self.campaign_messages
            .get(&campaign_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }
}

impl DeliveryStore for InMemoryDeliveryStore {
    fn insert_campaign(&self, campaign: Campaign) -> CampaignResult<()> {
        self.campaign_messages.entry(campaign.id).or_default();
        self.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    fn get_campaign(&self, id: Uuid) -> CampaignResult<Option<Campaign>> {
        Ok(self.campaigns.get(&id).map(|c| c.clone()))
    }

    fn list_campaigns(&self) -> CampaignResult<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> =
            self.campaigns.iter().map(|c| c.value().clone()).collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }

    fn fail_if_sending(&self, id: Uuid) -> CampaignResult<Option<Campaign>> {
        let mut campaign = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| CampaignError::not_found("campaign", id))?;
        if campaign.status != CampaignStatus::Sending {
            return Ok(None);
        }
        campaign.status = CampaignStatus::Failed;
        campaign.updated_at = Utc::now();
        Ok(Some(campaign.clone()))
    }

    fn delete_campaign(&self, id: Uuid) -> CampaignResult<bool> {
        if self.campaigns.remove(&id).is_none() {
            return Ok(false);
        }
        let ids = self
            .campaign_messages
            .remove(&id)
            .map(|(_, ids)| ids)
            .unwrap_or_default();
        for message_id in &ids {
            if let Some((_, message)) = self.messages.remove(message_id) {
                if let Some(vendor_id) = message.vendor_message_id {
                    self.vendor_index.remove(&vendor_id);
                }
            }
        }
        debug!(campaign_id = %id, messages = ids.len(), "Campaign removed with messages");
        Ok(true)
    }

    fn insert_message(&self, message: Message) -> CampaignResult<()> {
        let campaign = self
            .campaigns
            .get(&message.campaign_id)
            .ok_or_else(|| CampaignError::not_found("campaign", message.campaign_id))?;
        if campaign.status != CampaignStatus::Sending {
            return Err(CampaignError::Persistence(format!(
                "campaign {} is not accepting messages",
                message.campaign_id
            )));
        }
        self.campaign_messages
            .entry(message.campaign_id)
            .or_default()
            .push(message.id);
        drop(campaign);
        self.messages.insert(message.id, message);
        Ok(())
    }

    fn get_message(&self, id: Uuid) -> CampaignResult<Option<Message>> {
        Ok(self.messages.get(&id).map(|m| m.clone()))
    }

    fn find_by_vendor_id(&self, vendor_message_id: &str) -> CampaignResult<Option<Message>> {
        let id = match self.vendor_index.get(vendor_message_id) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.get_message(id)
    }

    fn list_messages(&self, campaign_id: Uuid) -> CampaignResult<Vec<Message>> {
        Ok(self
            .message_ids(campaign_id)
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
            .collect())
    }

    fn transition_message(
        &self,
        id: Uuid,
        update: MessageUpdate,
    ) -> CampaignResult<TransitionOutcome> {
        let mut message = self
            .messages
            .get_mut(&id)
            .ok_or_else(|| CampaignError::not_found("message", id))?;

        let target = update.target();
        let outcome = match check_transition(message.status, target) {
            TransitionCheck::Apply => {
                message.status = target;
                update.apply(&mut message);
                TransitionOutcome::Applied(message.clone())
            }
            TransitionCheck::Duplicate => TransitionOutcome::Duplicate(message.clone()),
            TransitionCheck::Reject => {
                // A late provider acknowledgement still carries the vendor id.
                if let MessageUpdate::Sent {
                    vendor_message_id: Some(vendor_id),
                    ..
                } = update
                {
                    message.vendor_message_id.get_or_insert(vendor_id);
                }
                TransitionOutcome::Rejected(message.clone())
            }
        };
        drop(message);

        if let Some(vendor_id) = &outcome.message().vendor_message_id {
            self.vendor_index.insert(vendor_id.clone(), id);
        }
        Ok(outcome)
    }

    fn stale_sent_messages(&self, cutoff: DateTime<Utc>) -> CampaignResult<Vec<Message>> {
        Ok(self
            .messages
            .iter()
            .filter(|m| m.status == MessageStatus::Sent && m.sent_at.is_some_and(|at| at < cutoff))
            .map(|m| m.value().clone())
            .collect())
    }

    fn campaign_stats(&self, campaign_id: Uuid) -> CampaignResult<CampaignStats> {
        let mut stats = CampaignStats {
            campaign_id,
            ..Default::default()
        };
        for id in self.message_ids(campaign_id) {
            if let Some(message) = self.messages.get(&id) {
                stats.record(message.status);
            }
        }
        Ok(stats)
    }

    fn complete_if_processed(
        &self,
        campaign_id: Uuid,
        policy: CompletionPolicy,
    ) -> CampaignResult<Option<Campaign>> {
        let mut campaign = self
            .campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| CampaignError::not_found("campaign", campaign_id))?;
        if campaign.status != CampaignStatus::Sending {
            return Ok(None);
        }

        let ids = self.message_ids(campaign_id);
        let all_processed = ids.iter().all(|id| {
            self.messages
                .get(id)
                .is_some_and(|m| m.status.is_processed(policy))
        });
        if !all_processed {
            return Ok(None);
        }

        let now = Utc::now();
        campaign.status = CampaignStatus::Sent;
        campaign.sent_at = Some(now);
        campaign.updated_at = now;
        Ok(Some(campaign.clone()))
    }
}
