//! Predicate compiler — lowers a [`RuleTree`] into a [`CompiledPredicate`].
//!
//! Each node compiles to its own expression and locally numbered parameter
//! list; a composite splices its children in order, shifting each child's
//! placeholder indices past the parameters already emitted. Parameter order
//! is therefore left-to-right, depth-first.

use crate::filter::{CompiledPredicate, DroppedCondition, FilterExpr, ParamValue};
use crate::operators::{self, Lowering, OperatorSpec, ValueShape};
use crate::rules::{Condition, RuleTree};
use campaign_core::config::SegmentConfig;
use campaign_core::types::CustomerStatus;
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct CompilerOptions {
    /// Fail instead of dropping leaves that do not fit the operator table.
    pub strict: bool,
    pub max_depth: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            strict: false,
            max_depth: 32,
        }
    }
}

impl From<&SegmentConfig> for CompilerOptions {
    fn from(config: &SegmentConfig) -> Self {
        Self {
            strict: config.strict_rules,
            max_depth: config.max_rule_depth,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PredicateCompiler {
    options: CompilerOptions,
}

/// A compiled subtree with placeholders numbered from zero.
struct Fragment {
    expr: FilterExpr,
    params: Vec<ParamValue>,
}

struct NodeOutput {
    fragment: Option<Fragment>,
    dropped: Vec<DroppedCondition>,
}

impl PredicateCompiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> CompilerOptions {
        self.options
    }

    /// Compile a rule tree. Fails when the tree is structurally malformed,
    /// too deep, or compiles to an empty expression.
    pub fn compile(&self, rule: &RuleTree) -> CampaignResult<CompiledPredicate> {
        rule.validate()?;
        if rule.depth() > self.options.max_depth {
            return Err(CampaignError::RuleValidation(format!(
                "rule tree depth {} exceeds the limit of {}",
                rule.depth(),
                self.options.max_depth
            )));
        }

        let output = compile_node(rule, "rules");

        for dropped in &output.dropped {
            warn!(
                path = %dropped.path,
                field = %dropped.field,
                operator = %dropped.operator,
                reason = %dropped.reason,
                "Dropping rule condition"
            );
        }
        if !output.dropped.is_empty() {
            metrics::counter!("segments.rules_dropped").increment(output.dropped.len() as u64);
        }

        if self.options.strict && !output.dropped.is_empty() {
            let details: Vec<String> = output
                .dropped
                .iter()
                .map(|d| format!("{}: {}", d.path, d.reason))
                .collect();
            return Err(CampaignError::RuleValidation(format!(
                "unsupported conditions: {}",
                details.join("; ")
            )));
        }

        let fragment = output.fragment.ok_or_else(|| {
            CampaignError::RuleValidation(
                "rule tree has no usable conditions; refusing to build an empty audience filter"
                    .to_string(),
            )
        })?;

        Ok(CompiledPredicate {
            expr: fragment.expr,
            params: fragment.params,
            dropped: output.dropped,
        })
    }
}

fn compile_node(rule: &RuleTree, path: &str) -> NodeOutput {
    match rule {
        RuleTree::Condition(cond) => match compile_condition(cond) {
            Ok(fragment) => NodeOutput {
                fragment: Some(fragment),
                dropped: Vec::new(),
            },
            Err(reason) => NodeOutput {
                fragment: None,
                dropped: vec![DroppedCondition {
                    path: path.to_string(),
                    field: cond.field.clone(),
                    operator: cond.operator.clone(),
                    reason,
                }],
            },
        },
        RuleTree::Composite(composite) => {
            let mut children = Vec::new();
            let mut params = Vec::new();
            let mut dropped = Vec::new();

            for (i, child) in composite.conditions.iter().enumerate() {
                let out = compile_node(child, &format!("{path}.conditions[{i}]"));
                dropped.extend(out.dropped);
                if let Some(mut fragment) = out.fragment {
                    fragment.expr.offset(params.len());
                    params.extend(fragment.params);
                    children.push(fragment.expr);
                }
            }

            let fragment = if children.is_empty() {
                None
            } else {
                Some(Fragment {
                    expr: FilterExpr::Group {
                        op: composite.operator,
                        children,
                    },
                    params,
                })
            };
            NodeOutput { fragment, dropped }
        }
    }
}

/// Lower one leaf, or explain why it cannot be lowered.
fn compile_condition(cond: &Condition) -> Result<Fragment, String> {
    let spec = operators::lookup(&cond.field, &cond.operator).ok_or_else(|| {
        format!(
            "operator '{}' is not supported for field '{}'",
            cond.operator, cond.field
        )
    })?;
    let params = bind_value(spec, &cond.value)?;
    let field = spec.field;

    let expr = match spec.lowering {
        Lowering::Compare(cmp) => FilterExpr::Compare { field, cmp, param: 0 },
        Lowering::Between => FilterExpr::Between { field, low: 0, high: 1 },
        Lowering::OlderThanDays => FilterExpr::OlderThanDays { field, param: 0 },
        Lowering::WithinDays => FilterExpr::WithinDays { field, param: 0 },
        Lowering::IsNull => FilterExpr::IsNull { field },
    };
    Ok(Fragment { expr, params })
}

fn bind_value(spec: &OperatorSpec, value: &Value) -> Result<Vec<ParamValue>, String> {
    match spec.shape {
        ValueShape::Number => number(value)
            .map(|n| vec![ParamValue::Number(n)])
            .ok_or_else(|| format!("expected a number, got {value}")),
        ValueShape::NumberRange => {
            let (lo, hi) = range(value).ok_or_else(|| {
                format!("expected {{min, max}} or {{start, end}}, got {value}")
            })?;
            match (number(lo), number(hi)) {
                (Some(lo), Some(hi)) => Ok(vec![ParamValue::Number(lo), ParamValue::Number(hi)]),
                _ => Err(format!("range bounds must be numbers, got {value}")),
            }
        }
        ValueShape::DayCount => day_count(value)
            .map(|d| vec![ParamValue::Days(d)])
            .ok_or_else(|| format!("expected a non-negative whole number of days, got {value}")),
        ValueShape::Absent => Ok(Vec::new()),
        ValueShape::Status => value
            .as_str()
            .and_then(CustomerStatus::parse)
            .map(|s| vec![ParamValue::Status(s)])
            .ok_or_else(|| format!("expected one of active, inactive, churned, got {value}")),
        ValueShape::Date => date(value)
            .map(|d| vec![ParamValue::Timestamp(d)])
            .ok_or_else(|| format!("expected a date (YYYY-MM-DD or RFC 3339), got {value}")),
        ValueShape::DateRange => {
            let (lo, hi) = range(value).ok_or_else(|| {
                format!("expected {{start, end}} or {{min, max}}, got {value}")
            })?;
            match (date(lo), date(hi)) {
                (Some(lo), Some(hi)) => {
                    Ok(vec![ParamValue::Timestamp(lo), ParamValue::Timestamp(hi)])
                }
                _ => Err(format!("range bounds must be dates, got {value}")),
            }
        }
    }
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn day_count(value: &Value) -> Option<i64> {
    let n = number(value)?;
    (n >= 0.0 && n.fract() == 0.0 && n <= i32::MAX as f64).then_some(n as i64)
}

fn range(value: &Value) -> Option<(&Value, &Value)> {
    let obj = value.as_object()?;
    match (obj.get("min"), obj.get("max")) {
        (Some(lo), Some(hi)) => Some((lo, hi)),
        _ => match (obj.get("start"), obj.get("end")) {
            (Some(lo), Some(hi)) => Some((lo, hi)),
            _ => None,
        },
    }
}

fn date(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}
