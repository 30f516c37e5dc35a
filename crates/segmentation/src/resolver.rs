//! Audience resolver — runs a compiled predicate against the customer store.

use crate::filter::CompiledPredicate;
use async_trait::async_trait;
use campaign_core::types::Customer;
use campaign_core::{CampaignError, CampaignResult};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

/// Upper bound for preview samples.
pub const MAX_SAMPLE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100;

/// Query surface of the external customer store. Rows come back in
/// ascending id order.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn count(&self, predicate: &CompiledPredicate) -> CampaignResult<u64>;

    async fn query(
        &self,
        predicate: &CompiledPredicate,
        offset: usize,
        limit: Option<usize>,
    ) -> CampaignResult<Vec<Customer>>;
}

/// In-memory customer store ordered by id.
#[derive(Default)]
pub struct InMemoryCustomerStore {
    customers: RwLock<BTreeMap<i64, Customer>>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_customers(customers: impl IntoIterator<Item = Customer>) -> Self {
        let store = Self::new();
        for customer in customers {
            store.upsert(customer);
        }
        store
    }

    /// Load a JSON array of customers from disk.
    pub fn load_json_file(path: impl AsRef<Path>) -> CampaignResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let customers: Vec<Customer> = serde_json::from_str(&raw)?;
        info!(
            path = %path.as_ref().display(),
            customers = customers.len(),
            "Loaded customer seed file"
        );
        Ok(Self::with_customers(customers))
    }

    pub fn upsert(&self, customer: Customer) {
        self.customers.write().insert(customer.id, customer);
    }

    pub fn remove(&self, id: i64) -> Option<Customer> {
        self.customers.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.customers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.read().is_empty()
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn count(&self, predicate: &CompiledPredicate) -> CampaignResult<u64> {
        let now = Utc::now();
        let customers = self.customers.read();
        Ok(customers.values().filter(|c| predicate.matches(c, now)).count() as u64)
    }

    async fn query(
        &self,
        predicate: &CompiledPredicate,
        offset: usize,
        limit: Option<usize>,
    ) -> CampaignResult<Vec<Customer>> {
        let now = Utc::now();
        let customers = self.customers.read();
        let matched = customers
            .values()
            .filter(|c| predicate.matches(c, now))
            .skip(offset)
            .cloned();
        Ok(match limit {
            Some(limit) => matched.take(limit).collect(),
            None => matched.collect(),
        })
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct Page {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

fn default_page() -> usize {
    1
}
fn default_per_page() -> usize {
    20
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl Page {
    fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, MAX_PAGE_SIZE),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AudiencePreview {
    pub match_count: u64,
    pub sample: Vec<Customer>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CustomerPage {
    pub page: usize,
    pub per_page: usize,
    pub total: u64,
    pub customers: Vec<Customer>,
}

/// Read-only view of the customer store through compiled predicates.
#[derive(Clone)]
pub struct AudienceResolver {
    store: Arc<dyn CustomerStore>,
    sample_size: usize,
}

impl AudienceResolver {
    pub fn new(store: Arc<dyn CustomerStore>) -> Self {
        Self {
            store,
            sample_size: MAX_SAMPLE_SIZE,
        }
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size.min(MAX_SAMPLE_SIZE);
        self
    }

    /// Match count plus a stable sample of at most ten customers.
    pub async fn resolve(&self, predicate: &CompiledPredicate) -> CampaignResult<AudiencePreview> {
        let match_count = self.store.count(predicate).await?;
        let sample = self
            .store
            .query(predicate, 0, Some(self.sample_size))
            .await?;
        debug!(match_count, sample = sample.len(), "Resolved audience preview");
        Ok(AudiencePreview { match_count, sample })
    }

    pub async fn resolve_page(
        &self,
        predicate: &CompiledPredicate,
        page: Page,
    ) -> CampaignResult<CustomerPage> {
        let page = page.normalized();
        let offset = (page.page - 1)
            .checked_mul(page.per_page)
            .ok_or_else(|| CampaignError::RuleValidation("page out of range".to_string()))?;
        let total = self.store.count(predicate).await?;
        let customers = self
            .store
            .query(predicate, offset, Some(page.per_page))
            .await?;
        Ok(CustomerPage {
            page: page.page,
            per_page: page.per_page,
            total,
            customers,
        })
    }

    /// Every matching customer; used by dispatch.
    pub async fn resolve_all(&self, predicate: &CompiledPredicate) -> CampaignResult<Vec<Customer>> {
        self.store.query(predicate, 0, None).await
    }

    pub async fn count(&self, predicate: &CompiledPredicate) -> CampaignResult<u64> {
        self.store.count(predicate).await
    }
}
