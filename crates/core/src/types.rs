use crate::config::CompletionPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Customer row as exposed by the customer store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub total_spent: f64,
    #[serde(default)]
    pub total_orders: i64,
    pub status: CustomerStatus,
    #[serde(default)]
    pub last_visit: Option<DateTime<Utc>>,
    pub registration_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    Active,
    Inactive,
    Churned,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "active",
            CustomerStatus::Inactive => "inactive",
            CustomerStatus::Churned => "churned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(CustomerStatus::Active),
            "inactive" => Some(CustomerStatus::Inactive),
            "churned" => Some(CustomerStatus::Churned),
            _ => None,
        }
    }
}

// ─── Campaign ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub segment_id: Uuid,
    pub message_template: String,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Failed,
}

// ─── Message (communication log) ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub customer_id: i64,
    pub message_content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub vendor_message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Bounced,
}

impl MessageStatus {
    /// No further transition is allowed out of a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Delivered | MessageStatus::Failed | MessageStatus::Bounced
        )
    }

    /// Whether a message in this status counts toward campaign completion.
    pub fn is_processed(&self, policy: CompletionPolicy) -> bool {
        match policy {
            CompletionPolicy::AwaitReceipts => self.is_terminal(),
            CompletionPolicy::AcceptedCounts => *self != MessageStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
            MessageStatus::Bounced => "bounced",
        }
    }
}

/// Aggregate message counts for one campaign.
///
/// `sent_messages` covers everything the provider accepted (sent or
/// delivered); `failed_messages` covers failed and bounced. Together with
/// `pending_messages` they always add up to `total_messages`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct CampaignStats {
    pub campaign_id: Uuid,
    pub total_messages: u64,
    pub pending_messages: u64,
    pub sent_messages: u64,
    pub delivered_messages: u64,
    pub failed_messages: u64,
    pub bounced_messages: u64,
}

impl CampaignStats {
    pub fn record(&mut self, status: MessageStatus) {
        self.total_messages += 1;
        match status {
            MessageStatus::Pending => self.pending_messages += 1,
            MessageStatus::Sent => self.sent_messages += 1,
            MessageStatus::Delivered => {
                self.sent_messages += 1;
                self.delivered_messages += 1;
            }
            MessageStatus::Failed => self.failed_messages += 1,
            MessageStatus::Bounced => {
                self.failed_messages += 1;
                self.bounced_messages += 1;
            }
        }
    }
}
