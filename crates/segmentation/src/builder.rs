//! Rule builder — fluent API for constructing segment rule trees.

use crate::rules::{CompositeRule, Condition, LogicalOperator, RuleTree};
use serde_json::{json, Value};

pub struct RuleBuilder {
    operator: LogicalOperator,
    conditions: Vec<RuleTree>,
}

impl RuleBuilder {
    /// Every child must match.
    pub fn all() -> Self {
        Self {
            operator: LogicalOperator::And,
            conditions: Vec::new(),
        }
    }

    /// At least one child must match.
    pub fn any() -> Self {
        Self {
            operator: LogicalOperator::Or,
            conditions: Vec::new(),
        }
    }

    pub fn condition(
        mut self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: Value,
    ) -> Self {
        self.conditions
            .push(Condition::new(field, operator, value).into());
        self
    }

    pub fn group(mut self, group: RuleBuilder) -> Self {
        self.conditions.push(group.build());
        self
    }

    pub fn status_equals(self, status: &str) -> Self {
        self.condition("status", "equals", json!(status))
    }

    pub fn status_not_equals(self, status: &str) -> Self {
        self.condition("status", "not_equals", json!(status))
    }

    pub fn total_spent_greater_than(self, amount: impl Into<f64>) -> Self {
        self.condition("total_spent", "greater_than", json!(amount.into()))
    }

    pub fn total_spent_between(self, min: impl Into<f64>, max: impl Into<f64>) -> Self {
        self.condition(
            "total_spent",
            "between",
            json!({ "min": min.into(), "max": max.into() }),
        )
    }

    pub fn total_orders_greater_than(self, orders: i64) -> Self {
        self.condition("total_orders", "greater_than", json!(orders))
    }

    pub fn visited_within_days(self, days: u32) -> Self {
        self.condition("last_visit", "within_days", json!(days))
    }

    pub fn not_visited_for_days(self, days: u32) -> Self {
        self.condition("last_visit", "days_ago", json!(days))
    }

    pub fn never_visited(self) -> Self {
        self.condition("last_visit", "is_null", Value::Null)
    }

    pub fn registered_after(self, date: &str) -> Self {
        self.condition("registration_date", "after", json!(date))
    }

    pub fn build(self) -> RuleTree {
        RuleTree::Composite(CompositeRule {
            operator: self.operator,
            conditions: self.conditions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_matches_wire_shape() {
        let built = RuleBuilder::all()
            .status_equals("active")
            .group(RuleBuilder::any().never_visited().not_visited_for_days(60))
            .build();

        let parsed = RuleTree::from_value(json!({
            "operator": "AND",
            "conditions": [
                { "field": "status", "operator": "equals", "value": "active" },
                { "operator": "OR", "conditions": [
                    { "field": "last_visit", "operator": "is_null", "value": null },
                    { "field": "last_visit", "operator": "days_ago", "value": 60 }
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(built, parsed);
        assert_eq!(built.leaf_count(), 3);
    }
}
