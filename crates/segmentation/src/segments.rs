//! Segment repository and service — persists audience definitions with a
//! cached, point-in-time audience size.

use crate::compiler::PredicateCompiler;
use crate::filter::{CompiledPredicate, DroppedCondition, ParamValue};
use crate::resolver::{AudienceResolver, CustomerPage, Page};
use crate::rules::RuleTree;
use campaign_core::types::Customer;
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = Object)]
    pub rules: RuleTree,
    /// Count at the time the rules were last compiled. Not kept live.
    pub audience_size: u64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewSegment {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[schema(value_type = Object)]
    pub rules: RuleTree,
    #[serde(default = "default_operator")]
    pub created_by: String,
}

fn default_operator() -> String {
    "admin".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SegmentUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub rules: Option<RuleTree>,
}

/// Compiled predicate, parameters and audience sample for a rule tree.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SegmentPreview {
    pub predicate: String,
    #[schema(value_type = Vec<Object>)]
    pub params: Vec<ParamValue>,
    pub dropped_conditions: Vec<DroppedCondition>,
    pub audience_size: u64,
    pub sample_customers: Vec<Customer>,
}

/// Thread-safe in-memory segment store backed by DashMap.
#[derive(Default)]
pub struct SegmentRepository {
    segments: DashMap<Uuid, Segment>,
}

impl SegmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, segment: Segment) {
        self.segments.insert(segment.id, segment);
    }

    pub fn get(&self, id: Uuid) -> Option<Segment> {
        self.segments.get(&id).map(|s| s.value().clone())
    }

    /// Newest first.
    pub fn list(&self) -> Vec<Segment> {
        let mut segments: Vec<Segment> = self.segments.iter().map(|s| s.value().clone()).collect();
        segments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        segments
    }

    pub fn remove(&self, id: Uuid) -> Option<Segment> {
        self.segments.remove(&id).map(|(_, s)| s)
    }
}

/// Segment lifecycle: validate and compile rules, size the audience,
/// persist.
pub struct SegmentService {
    repo: Arc<SegmentRepository>,
    compiler: PredicateCompiler,
    resolver: AudienceResolver,
}

impl SegmentService {
    pub fn new(
        repo: Arc<SegmentRepository>,
        compiler: PredicateCompiler,
        resolver: AudienceResolver,
    ) -> Self {
        Self {
            repo,
            compiler,
            resolver,
        }
    }

    pub fn compiler(&self) -> &PredicateCompiler {
        &self.compiler
    }

    pub fn resolver(&self) -> &AudienceResolver {
        &self.resolver
    }

    pub async fn create_segment(&self, req: NewSegment) -> CampaignResult<Segment> {
        let name = validate_name(&req.name)?;
        let predicate = self.compiler.compile(&req.rules)?;
        let audience_size = self.resolver.count(&predicate).await?;

        let now = Utc::now();
        let segment = Segment {
            id: Uuid::new_v4(),
            name,
            description: req.description,
            rules: req.rules,
            audience_size,
            created_by: req.created_by,
            created_at: now,
            updated_at: now,
        };
        self.repo.insert(segment.clone());

        info!(
            segment_id = %segment.id,
            name = %segment.name,
            audience_size,
            "Segment created"
        );
        metrics::counter!("segments.created").increment(1);
        Ok(segment)
    }

    /// Apply an update; the audience size is recomputed whenever rules change.
    pub async fn update_segment(&self, id: Uuid, req: SegmentUpdate) -> CampaignResult<Segment> {
        let mut segment = self
            .repo
            .get(id)
            .ok_or_else(|| CampaignError::not_found("segment", id))?;

        if let Some(name) = req.name {
            segment.name = validate_name(&name)?;
        }
        if let Some(description) = req.description {
            segment.description = Some(description);
        }
        if let Some(rules) = req.rules {
            let predicate = self.compiler.compile(&rules)?;
            segment.audience_size = self.resolver.count(&predicate).await?;
            segment.rules = rules;
        }
        segment.updated_at = Utc::now();
        self.repo.insert(segment.clone());

        info!(
            segment_id = %id,
            audience_size = segment.audience_size,
            "Segment updated"
        );
        Ok(segment)
    }

    pub async fn preview(&self, rules: &RuleTree) -> CampaignResult<SegmentPreview> {
        let predicate = self.compiler.compile(rules)?;
        let preview = self.resolver.resolve(&predicate).await?;
        Ok(SegmentPreview {
            predicate: predicate.where_clause(),
            params: predicate.params,
            dropped_conditions: predicate.dropped,
            audience_size: preview.match_count,
            sample_customers: preview.sample,
        })
    }

    pub fn get_segment(&self, id: Uuid) -> CampaignResult<Segment> {
        self.repo
            .get(id)
            .ok_or_else(|| CampaignError::not_found("segment", id))
    }

    pub fn list_segments(&self) -> Vec<Segment> {
        self.repo.list()
    }

    pub fn delete_segment(&self, id: Uuid) -> CampaignResult<()> {
        self.repo
            .remove(id)
            .map(|_| info!(segment_id = %id, "Segment deleted"))
            .ok_or_else(|| CampaignError::not_found("segment", id))
    }

    /// Compile a persisted segment's rules afresh.
    pub fn compile_segment(&self, segment: &Segment) -> CampaignResult<CompiledPredicate> {
        self.compiler.compile(&segment.rules)
    }

    /// Current audience of a segment, resolved now rather than from the
    /// cached size.
    pub async fn current_audience(&self, segment: &Segment) -> CampaignResult<Vec<Customer>> {
        let predicate = self.compile_segment(segment)?;
        self.resolver.resolve_all(&predicate).await
    }

    pub async fn customers_page(&self, id: Uuid, page: Page) -> CampaignResult<CustomerPage> {
        let segment = self.get_segment(id)?;
        let predicate = self.compile_segment(&segment)?;
        self.resolver.resolve_page(&predicate, page).await
    }
}

fn validate_name(name: &str) -> CampaignResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CampaignError::RuleValidation(
            "segment name must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RuleBuilder;
    use crate::resolver::InMemoryCustomerStore;
    use campaign_core::types::CustomerStatus;
    use serde_json::json;

    fn customer(id: i64, status: CustomerStatus, total_spent: f64) -> Customer {
        Customer {
            id,
            name: format!("Customer {id}"),
            email: format!("c{id}@example.com"),
            total_spent,
            total_orders: 3,
            status,
            last_visit: None,
            registration_date: Utc::now(),
        }
    }

    fn service() -> (SegmentService, Arc<InMemoryCustomerStore>) {
        let store = Arc::new(InMemoryCustomerStore::with_customers(vec![
            customer(1, CustomerStatus::Active, 15000.0),
            customer(2, CustomerStatus::Active, 5000.0),
            customer(3, CustomerStatus::Churned, 20000.0),
        ]));
        let service = SegmentService::new(
            Arc::new(SegmentRepository::new()),
            PredicateCompiler::default(),
            AudienceResolver::new(store.clone()),
        );
        (service, store)
    }

    fn high_value_active() -> RuleTree {
        RuleBuilder::all()
            .status_equals("active")
            .total_spent_greater_than(10000)
            .build()
    }

    #[tokio::test]
    async fn test_create_caches_audience_size() {
        let (service, _) = service();
        let segment = service
            .create_segment(NewSegment {
                name: "  High value  ".into(),
                description: None,
                rules: high_value_active(),
                created_by: "ops".into(),
            })
            .await
            .unwrap();

        assert_eq!(segment.name, "High value");
        assert_eq!(segment.audience_size, 1);
        assert_eq!(service.get_segment(segment.id).unwrap().audience_size, 1);
        assert_eq!(service.list_segments().len(), 1);
    }

    #[tokio::test]
    async fn test_cached_size_is_point_in_time() {
        let (service, store) = service();
        let segment = service
            .create_segment(NewSegment {
                name: "Active".into(),
                description: None,
                rules: RuleBuilder::all().status_equals("active").build(),
                created_by: "ops".into(),
            })
            .await
            .unwrap();
        assert_eq!(segment.audience_size, 2);

        store.upsert(customer(4, CustomerStatus::Active, 1.0));
        let cached = service.get_segment(segment.id).unwrap();
        assert_eq!(cached.audience_size, 2);
        assert_eq!(service.current_audience(&cached).await.unwrap().len(), 3);

        let refreshed = service
            .update_segment(
                segment.id,
                SegmentUpdate {
                    rules: Some(cached.rules.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(refreshed.audience_size, 3);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_predicate() {
        let (service, _) = service();
        let rules = RuleTree::from_value(json!({
            "operator": "AND",
            "conditions": [{ "field": "status", "operator": "between", "value": "x" }]
        }))
        .unwrap();
        let err = service
            .create_segment(NewSegment {
                name: "Broken".into(),
                description: None,
                rules,
                created_by: "ops".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::RuleValidation(_)));
        assert!(service.list_segments().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let (service, _) = service();
        let err = service
            .create_segment(NewSegment {
                name: "   ".into(),
                description: None,
                rules: high_value_active(),
                created_by: "ops".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::RuleValidation(_)));
    }

    #[tokio::test]
    async fn test_preview_reports_predicate_and_sample() {
        let (service, _) = service();
        let preview = service.preview(&high_value_active()).await.unwrap();
        assert_eq!(preview.predicate, "(status = $1 AND total_spent > $2)");
        assert_eq!(preview.params.len(), 2);
        assert_eq!(preview.audience_size, 1);
        assert_eq!(preview.sample_customers[0].id, 1);
        assert!(preview.dropped_conditions.is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_unknown_segment() {
        let (service, _) = service();
        let id = Uuid::new_v4();
        let err = service
            .update_segment(id, SegmentUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::NotFound { .. }));
        assert!(matches!(
            service.delete_segment(id),
            Err(CampaignError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_with_invalid_rules_keeps_old_segment() {
        let (service, _) = service();
        let segment = service
            .create_segment(NewSegment {
                name: "High value".into(),
                description: None,
                rules: high_value_active(),
                created_by: "ops".into(),
            })
            .await
            .unwrap();

        let bad = RuleTree::from_value(json!({ "operator": "OR", "conditions": [] })).unwrap();
        assert!(service
            .update_segment(
                segment.id,
                SegmentUpdate {
                    rules: Some(bad),
                    ..Default::default()
                }
            )
            .await
            .is_err());
        assert_eq!(service.get_segment(segment.id).unwrap().rules, high_value_active());
    }
}
