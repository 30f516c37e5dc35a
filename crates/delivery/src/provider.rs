//! Delivery providers — the outbound seam to the vendor that actually sends
//! messages. The simulated provider stands in for a real vendor: it accepts
//! or rejects at random and later posts delivery receipts over an
//! in-process channel, the way a vendor would call the receipt webhook.

use crate::reconciler::{Receipt, ReceiptStatus};
use async_trait::async_trait;
use campaign_core::config::ProviderConfig;
use campaign_core::CampaignResult;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub message_id: Uuid,
    pub campaign_id: Uuid,
    pub customer_id: i64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResponse {
    Accepted { vendor_message_id: String },
    Rejected { reason: String },
}

/// A vendor that accepts messages for asynchronous delivery. `Err` means the
/// call itself failed (transport, auth); `Rejected` means the vendor refused
/// this particular message.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, request: &DeliveryRequest) -> CampaignResult<ProviderResponse>;
}

/// Randomized stand-in vendor.
pub struct SimulatedProvider {
    failure_rate: f64,
    bounce_rate: f64,
    receipt_delay: Duration,
    receipts: Option<mpsc::UnboundedSender<Receipt>>,
}

impl SimulatedProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        info!(
            failure_rate = config.failure_rate,
            bounce_rate = config.bounce_rate,
            receipt_delay_ms = config.receipt_delay_ms,
            "Simulated delivery provider initialized"
        );
        Self {
            failure_rate: config.failure_rate.clamp(0.0, 1.0),
            bounce_rate: config.bounce_rate.clamp(0.0, 1.0),
            receipt_delay: Duration::from_millis(config.receipt_delay_ms),
            receipts: None,
        }
    }

    /// Post a receipt for every accepted message on this channel.
    pub fn with_receipts(mut self, sender: mpsc::UnboundedSender<Receipt>) -> Self {
        self.receipts = Some(sender);
        self
    }

    fn schedule_receipt(&self, request: &DeliveryRequest, vendor_message_id: &str) {
        let Some(sender) = self.receipts.clone() else {
            return;
        };
        let (status, reason) = if rand::random::<f64>() < self.bounce_rate {
            (ReceiptStatus::Bounced, Some("mailbox unavailable".to_string()))
        } else {
            (ReceiptStatus::Delivered, None)
        };
        let receipt = Receipt {
            message_id: Some(request.message_id),
            vendor_message_id: Some(vendor_message_id.to_string()),
            status,
            reason,
            timestamp: None,
        };
        let delay = self.receipt_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let receipt = Receipt {
                timestamp: Some(Utc::now()),
                ..receipt
            };
            // The pump may already be gone during shutdown.
            let _ = sender.send(receipt);
        });
    }
}

#[async_trait]
impl DeliveryProvider for SimulatedProvider {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn send(&self, request: &DeliveryRequest) -> CampaignResult<ProviderResponse> {
        debug!(
            message_id = %request.message_id,
            customer_id = request.customer_id,
            "Sending message via simulated provider"
        );

        if rand::random::<f64>() < self.failure_rate {
            return Ok(ProviderResponse::Rejected {
                reason: "simulated vendor rejection".to_string(),
            });
        }

        let vendor_message_id = format!("sim-{}", Uuid::new_v4());
        self.schedule_receipt(request, &vendor_message_id);
        Ok(ProviderResponse::Accepted { vendor_message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DeliveryRequest {
        DeliveryRequest {
            message_id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            customer_id: 7,
            content: "Hi".into(),
        }
    }

    fn config(failure_rate: f64, bounce_rate: f64) -> ProviderConfig {
        ProviderConfig {
            failure_rate,
            bounce_rate,
            receipt_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_always_rejects_at_full_failure_rate() {
        let provider = SimulatedProvider::new(&config(1.0, 0.0));
        let response = provider.send(&request()).await.unwrap();
        assert!(matches!(response, ProviderResponse::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_accepted_message_gets_receipt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let provider = SimulatedProvider::new(&config(0.0, 0.0)).with_receipts(tx);
        let req = request();

        let response = provider.send(&req).await.unwrap();
        let ProviderResponse::Accepted { vendor_message_id } = response else {
            panic!("expected acceptance");
        };

        let receipt = rx.recv().await.unwrap();
        assert_eq!(receipt.message_id, Some(req.message_id));
        assert_eq!(receipt.vendor_message_id.as_deref(), Some(vendor_message_id.as_str()));
        assert_eq!(receipt.status, ReceiptStatus::Delivered);
        assert!(receipt.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_bounce_receipts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let provider = SimulatedProvider::new(&config(0.0, 1.0)).with_receipts(tx);
        provider.send(&request()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().status, ReceiptStatus::Bounced);
    }
}
