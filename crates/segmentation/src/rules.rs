//! Rule model — the boolean expression tree that defines segment membership.
//!
//! A tree is either a leaf [`Condition`] or a [`CompositeRule`] joining child
//! trees with AND/OR. On the wire a composite is recognised by an
//! `operator` of `AND`/`OR` together with a `conditions` array; anything
//! else is a leaf.

use campaign_core::{CampaignError, CampaignResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleTree {
    Composite(CompositeRule),
    Condition(Condition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRule {
    pub operator: LogicalOperator,
    pub conditions: Vec<RuleTree>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

impl LogicalOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
        }
    }
}

/// Leaf condition. `field` and `operator` stay as raw strings so that
/// combinations outside the operator table survive deserialization and
/// can be reported by the compiler instead of failing the whole tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Condition {
    pub fn new(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value,
        }
    }
}

impl RuleTree {
    /// Parse a rule tree from arbitrary JSON, e.g. a request body or the
    /// output of the rule suggester.
    pub fn from_value(value: serde_json::Value) -> CampaignResult<Self> {
        let tree: RuleTree = serde_json::from_value(value).map_err(|e| {
            CampaignError::RuleValidation(format!("rule tree is not well-formed: {e}"))
        })?;
        tree.validate()?;
        Ok(tree)
    }

    /// Structural validation: composites may be empty (they compile to
    /// nothing), leaves need a field, an operator and a value unless the
    /// operator takes none.
    pub fn validate(&self) -> CampaignResult<()> {
        self.validate_at("rules")
    }

    fn validate_at(&self, path: &str) -> CampaignResult<()> {
        match self {
            RuleTree::Composite(composite) => {
                for (i, child) in composite.conditions.iter().enumerate() {
                    child.validate_at(&format!("{path}.conditions[{i}]"))?;
                }
                Ok(())
            }
            RuleTree::Condition(cond) => {
                if cond.field.trim().is_empty() {
                    return Err(CampaignError::RuleValidation(format!(
                        "{path}: condition is missing 'field'"
                    )));
                }
                if cond.operator.trim().is_empty() {
                    return Err(CampaignError::RuleValidation(format!(
                        "{path}: condition is missing 'operator'"
                    )));
                }
                if cond.value.is_null() && !takes_no_value(&cond.operator) {
                    return Err(CampaignError::RuleValidation(format!(
                        "{path}: condition '{} {}' is missing 'value'",
                        cond.field, cond.operator
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            RuleTree::Composite(c) => c.conditions.iter().map(RuleTree::leaf_count).sum(),
            RuleTree::Condition(_) => 1,
        }
    }

    /// Depth of the tree; a bare leaf has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            RuleTree::Composite(c) => {
                1 + c.conditions.iter().map(RuleTree::depth).max().unwrap_or(0)
            }
            RuleTree::Condition(_) => 1,
        }
    }
}

fn takes_no_value(operator: &str) -> bool {
    operator.trim() == "is_null"
}

impl From<Condition> for RuleTree {
    fn from(cond: Condition) -> Self {
        RuleTree::Condition(cond)
    }
}

impl From<CompositeRule> for RuleTree {
    fn from(composite: CompositeRule) -> Self {
        RuleTree::Composite(composite)
    }
}
