//! Campaign delivery — message persistence, provider dispatch with bounded
//! concurrency, and delivery-receipt reconciliation.

pub mod campaigns;
pub mod dispatcher;
pub mod provider;
pub mod reconciler;
pub mod store;

pub use campaigns::{CampaignService, DispatchHandle, NewCampaign};
pub use dispatcher::{DispatchEngine, DispatchSummary};
pub use provider::{DeliveryProvider, DeliveryRequest, ProviderResponse, SimulatedProvider};
pub use reconciler::{Receipt, ReceiptOutcome, ReceiptReconciler, ReceiptStatus};
pub use store::{DeliveryStore, InMemoryDeliveryStore, MessageUpdate, TransitionOutcome};
