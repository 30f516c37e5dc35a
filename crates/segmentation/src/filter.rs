//! Backend-agnostic filter expression produced by the compiler.
//!
//! Leaves reference positional parameters by index. The tree renders to a
//! SQL `WHERE` fragment with `$n` placeholders and can also be evaluated
//! directly against a [`Customer`] row.

use crate::operators::{Comparator, Field};
use crate::rules::LogicalOperator;
use campaign_core::types::{Customer, CustomerStatus};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use utoipa::ToSchema;

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Number(f64),
    Days(i64),
    Status(CustomerStatus),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Compare {
        field: Field,
        cmp: Comparator,
        param: usize,
    },
    Between {
        field: Field,
        low: usize,
        high: usize,
    },
    OlderThanDays {
        field: Field,
        param: usize,
    },
    WithinDays {
        field: Field,
        param: usize,
    },
    IsNull {
        field: Field,
    },
    Group {
        op: LogicalOperator,
        children: Vec<FilterExpr>,
    },
}

/// A leaf the compiler left out of the expression.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DroppedCondition {
    pub path: String,
    pub field: String,
    pub operator: String,
    pub reason: String,
}

/// Output of the predicate compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPredicate {
    pub expr: FilterExpr,
    pub params: Vec<ParamValue>,
    pub dropped: Vec<DroppedCondition>,
}

impl CompiledPredicate {
    /// SQL `WHERE` fragment with `$1`-style placeholders.
    pub fn where_clause(&self) -> String {
        self.expr.to_string()
    }

    pub fn matches(&self, customer: &Customer, now: DateTime<Utc>) -> bool {
        self.expr.matches(customer, &self.params, now)
    }
}

impl FilterExpr {
    /// Shift every placeholder index by `by`. Used when a parent splices a
    /// child's locally numbered fragment after its earlier siblings.
    pub(crate) fn offset(&mut self, by: usize) {
        match self {
            FilterExpr::Compare { param, .. }
            | FilterExpr::OlderThanDays { param, .. }
            | FilterExpr::WithinDays { param, .. } => *param += by,
            FilterExpr::Between { low, high, .. } => {
                *low += by;
                *high += by;
            }
            FilterExpr::IsNull { .. } => {}
            FilterExpr::Group { children, .. } => {
                for child in children {
                    child.offset(by);
                }
            }
        }
    }

    /// Placeholder indices in emission order.
    pub fn placeholders(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_placeholders(&mut out);
        out
    }

    fn collect_placeholders(&self, out: &mut Vec<usize>) {
        match self {
            FilterExpr::Compare { param, .. }
            | FilterExpr::OlderThanDays { param, .. }
            | FilterExpr::WithinDays { param, .. } => out.push(*param),
            FilterExpr::Between { low, high, .. } => {
                out.push(*low);
                out.push(*high);
            }
            FilterExpr::IsNull { .. } => {}
            FilterExpr::Group { children, .. } => {
                for child in children {
                    child.collect_placeholders(out);
                }
            }
        }
    }

    pub fn matches(&self, customer: &Customer, params: &[ParamValue], now: DateTime<Utc>) -> bool {
        match self {
            FilterExpr::Compare { field, cmp, param } => match params.get(*param) {
                Some(value) => compare(customer, *field, *cmp, value),
                None => false,
            },
            FilterExpr::Between { field, low, high } => {
                match (params.get(*low), params.get(*high)) {
                    (Some(lo), Some(hi)) => {
                        order(customer, *field, lo).is_some_and(|o| o != Ordering::Less)
                            && order(customer, *field, hi).is_some_and(|o| o != Ordering::Greater)
                    }
                    _ => false,
                }
            }
            FilterExpr::OlderThanDays { field, param } => {
                match (timestamp_of(customer, *field), params.get(*param)) {
                    // A cutoff before the representable range excludes everyone.
                    (Some(ts), Some(ParamValue::Days(days))) => {
                        days_before(now, *days).is_some_and(|cutoff| ts < cutoff)
                    }
                    _ => false,
                }
            }
            FilterExpr::WithinDays { field, param } => {
                match (timestamp_of(customer, *field), params.get(*param)) {
                    // No representable lower bound: any recorded timestamp qualifies.
                    (Some(ts), Some(ParamValue::Days(days))) => {
                        days_before(now, *days).map_or(true, |cutoff| ts >= cutoff)
                    }
                    _ => false,
                }
            }
            FilterExpr::IsNull { field } => timestamp_of(customer, *field).is_none(),
            FilterExpr::Group { op, children } => match op {
                LogicalOperator::And => children.iter().all(|c| c.matches(customer, params, now)),
                LogicalOperator::Or => children.iter().any(|c| c.matches(customer, params, now)),
            },
        }
    }
}

/// Compare a column against a parameter with SQL NULL semantics: a missing
/// column value never matches.
fn compare(customer: &Customer, field: Field, cmp: Comparator, value: &ParamValue) -> bool {
    match order(customer, field, value) {
        Some(o) => match cmp {
            Comparator::Gt => o == Ordering::Greater,
            Comparator::Lt => o == Ordering::Less,
            Comparator::Eq => o == Ordering::Equal,
            Comparator::NotEq => o != Ordering::Equal,
        },
        None => false,
    }
}

/// Ordering of the customer's column relative to `value`, if comparable.
fn order(customer: &Customer, field: Field, value: &ParamValue) -> Option<Ordering> {
    match (field, value) {
        (Field::TotalSpent, ParamValue::Number(n)) => customer.total_spent.partial_cmp(n),
        (Field::TotalOrders, ParamValue::Number(n)) => (customer.total_orders as f64).partial_cmp(n),
        (Field::Status, ParamValue::Status(s)) => Some(if customer.status == *s {
            Ordering::Equal
        } else {
            // Statuses are unordered; only equality is meaningful.
            Ordering::Greater
        }),
        (Field::LastVisit | Field::RegistrationDate, ParamValue::Timestamp(ts)) => {
            timestamp_of(customer, field).map(|own| own.cmp(ts))
        }
        _ => None,
    }
}

/// `now` minus `days`, or `None` when that falls outside chrono's range.
fn days_before(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    Duration::try_days(days).and_then(|d| now.checked_sub_signed(d))
}

fn timestamp_of(customer: &Customer, field: Field) -> Option<DateTime<Utc>> {
    match field {
        Field::LastVisit => customer.last_visit,
        Field::RegistrationDate => Some(customer.registration_date),
        _ => None,
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::Compare { field, cmp, param } => {
                write!(f, "{} {} ${}", field.column(), cmp.as_sql(), param + 1)
            }
            FilterExpr::Between { field, low, high } => {
                write!(f, "{} BETWEEN ${} AND ${}", field.column(), low + 1, high + 1)
            }
            FilterExpr::OlderThanDays { field, param } => write!(
                f,
                "{} < NOW() - (${} * INTERVAL '1 day')",
                field.column(),
                param + 1
            ),
            FilterExpr::WithinDays { field, param } => write!(
                f,
                "{} >= NOW() - (${} * INTERVAL '1 day')",
                field.column(),
                param + 1
            ),
            FilterExpr::IsNull { field } => write!(f, "{} IS NULL", field.column()),
            FilterExpr::Group { op, children } => {
                f.write_str("(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", op.as_sql())?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(total_spent: f64, last_visit_days_ago: Option<i64>) -> Customer {
        let now = Utc::now();
        Customer {
            id: 1,
            name: "Test".into(),
            email: "test@example.com".into(),
            total_spent,
            total_orders: 4,
            status: CustomerStatus::Active,
            last_visit: last_visit_days_ago.map(|d| now - Duration::days(d)),
            registration_date: now - Duration::days(400),
        }
    }

    #[test]
    fn test_render_group() {
        let expr = FilterExpr::Group {
            op: LogicalOperator::And,
            children: vec![
                FilterExpr::Compare { field: Field::Status, cmp: Comparator::Eq, param: 0 },
                FilterExpr::Between { field: Field::TotalSpent, low: 1, high: 2 },
                FilterExpr::IsNull { field: Field::LastVisit },
            ],
        };
        assert_eq!(
            expr.to_string(),
            "(status = $1 AND total_spent BETWEEN $2 AND $3 AND last_visit IS NULL)"
        );
        assert_eq!(expr.placeholders(), vec![0, 1, 2]);
    }

    #[test]
    fn test_offset_shifts_nested_indices() {
        let mut expr = FilterExpr::Group {
            op: LogicalOperator::Or,
            children: vec![
                FilterExpr::WithinDays { field: Field::LastVisit, param: 0 },
                FilterExpr::Between { field: Field::RegistrationDate, low: 1, high: 2 },
            ],
        };
        expr.offset(3);
        assert_eq!(expr.placeholders(), vec![3, 4, 5]);
    }

    #[test]
    fn test_days_relative_matching() {
        let now = Utc::now();
        let params = vec![ParamValue::Days(30)];
        let older = FilterExpr::OlderThanDays { field: Field::LastVisit, param: 0 };
        let within = FilterExpr::WithinDays { field: Field::LastVisit, param: 0 };

        let stale = customer(0.0, Some(45));
        let recent = customer(0.0, Some(3));
        let never = customer(0.0, None);

        assert!(older.matches(&stale, &params, now));
        assert!(!older.matches(&recent, &params, now));
        assert!(within.matches(&recent, &params, now));
        assert!(!within.matches(&stale, &params, now));
        // NULL last_visit matches neither comparison.
        assert!(!older.matches(&never, &params, now));
        assert!(!within.matches(&never, &params, now));
        assert!(FilterExpr::IsNull { field: Field::LastVisit }.matches(&never, &[], now));
    }

    #[test]
    fn test_day_counts_beyond_calendar_range() {
        let now = Utc::now();
        let params = vec![ParamValue::Days(2_000_000_000)];
        let older = FilterExpr::OlderThanDays { field: Field::LastVisit, param: 0 };
        let within = FilterExpr::WithinDays { field: Field::LastVisit, param: 0 };

        let visited = customer(0.0, Some(10_000));
        assert!(within.matches(&visited, &params, now));
        assert!(!older.matches(&visited, &params, now));
        assert!(!within.matches(&customer(0.0, None), &params, now));

        let extreme = vec![ParamValue::Days(i64::MAX)];
        assert!(within.matches(&visited, &extreme, now));
        assert!(!older.matches(&visited, &extreme, now));
    }

    #[test]
    fn test_between_inclusive() {
        let now = Utc::now();
        let params = vec![ParamValue::Number(1000.0), ParamValue::Number(2000.0)];
        let expr = FilterExpr::Between { field: Field::TotalSpent, low: 0, high: 1 };
        assert!(expr.matches(&customer(1000.0, None), &params, now));
        assert!(expr.matches(&customer(2000.0, None), &params, now));
        assert!(!expr.matches(&customer(2000.01, None), &params, now));
    }

    #[test]
    fn test_missing_param_never_matches() {
        let expr = FilterExpr::Compare { field: Field::TotalSpent, cmp: Comparator::Gt, param: 5 };
        assert!(!expr.matches(&customer(50.0, None), &[], Utc::now()));
    }

    #[test]
    fn test_mismatched_param_type_never_matches() {
        let expr = FilterExpr::Compare { field: Field::TotalSpent, cmp: Comparator::NotEq, param: 0 };
        let params = vec![ParamValue::Status(CustomerStatus::Active)];
        assert!(!expr.matches(&customer(50.0, None), &params, Utc::now()));
    }
}
