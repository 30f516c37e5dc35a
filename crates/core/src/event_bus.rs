//! Delivery event bus — trait for emitting message and campaign lifecycle
//! events from the dispatch and reconciliation paths.
//!
//! Components accept an `Arc<dyn EventSink>`; the default is a no-op sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MessageSent,
    MessageFailed,
    MessageDelivered,
    MessageBounced,
    CampaignCompleted,
    CampaignFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub campaign_id: Uuid,
    pub message_id: Option<Uuid>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Trait for emitting delivery events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DeliveryEvent);
}

/// No-op sink for modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: DeliveryEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<DeliveryEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: DeliveryEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience builder for a `DeliveryEvent`.
pub fn make_event(
    event_type: EventType,
    campaign_id: Uuid,
    message_id: Option<Uuid>,
    detail: Option<String>,
) -> DeliveryEvent {
    DeliveryEvent {
        event_id: Uuid::new_v4(),
        event_type,
        campaign_id,
        message_id,
        detail,
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
