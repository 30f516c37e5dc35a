//! Operator table — the legal `(field, operator, value shape)` triples and
//! the comparison each one lowers to.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    TotalSpent,
    TotalOrders,
    LastVisit,
    Status,
    RegistrationDate,
}

impl Field {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "total_spent" => Some(Field::TotalSpent),
            "total_orders" => Some(Field::TotalOrders),
            "last_visit" => Some(Field::LastVisit),
            "status" => Some(Field::Status),
            "registration_date" => Some(Field::RegistrationDate),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Field::TotalSpent => "total_spent",
            Field::TotalOrders => "total_orders",
            Field::LastVisit => "last_visit",
            Field::Status => "status",
            Field::RegistrationDate => "registration_date",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    GreaterThan,
    LessThan,
    Equals,
    NotEquals,
    Between,
    DaysAgo,
    WithinDays,
    IsNull,
    After,
    Before,
}

impl ConditionOperator {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "greater_than" => Some(ConditionOperator::GreaterThan),
            "less_than" => Some(ConditionOperator::LessThan),
            "equals" => Some(ConditionOperator::Equals),
            "not_equals" => Some(ConditionOperator::NotEquals),
            "between" => Some(ConditionOperator::Between),
            "days_ago" => Some(ConditionOperator::DaysAgo),
            "within_days" => Some(ConditionOperator::WithinDays),
            "is_null" => Some(ConditionOperator::IsNull),
            "after" => Some(ConditionOperator::After),
            "before" => Some(ConditionOperator::Before),
            _ => None,
        }
    }
}

/// Binary comparison emitted for single-valued operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    Gt,
    Lt,
    Eq,
    NotEq,
}

impl Comparator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Lt => "<",
            Comparator::Eq => "=",
            Comparator::NotEq => "!=",
        }
    }
}

/// Shape the condition's `value` must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Number,
    /// `{min, max}` or `{start, end}` of numbers.
    NumberRange,
    /// Non-negative whole number of days.
    DayCount,
    /// No value is read.
    Absent,
    /// One of the customer status names.
    Status,
    Date,
    /// `{start, end}` or `{min, max}` of dates.
    DateRange,
}

/// What a matched table row lowers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lowering {
    Compare(Comparator),
    Between,
    OlderThanDays,
    WithinDays,
    IsNull,
}

#[derive(Debug, Clone, Copy)]
pub struct OperatorSpec {
    pub field: Field,
    pub operator: ConditionOperator,
    pub shape: ValueShape,
    pub lowering: Lowering,
}

const fn spec(
    field: Field,
    operator: ConditionOperator,
    shape: ValueShape,
    lowering: Lowering,
) -> OperatorSpec {
    OperatorSpec {
        field,
        operator,
        shape,
        lowering,
    }
}

use ConditionOperator as Op;

pub const OPERATOR_TABLE: &[OperatorSpec] = &[
    spec(Field::TotalSpent, Op::GreaterThan, ValueShape::Number, Lowering::Compare(Comparator::Gt)),
    spec(Field::TotalSpent, Op::LessThan, ValueShape::Number, Lowering::Compare(Comparator::Lt)),
    spec(Field::TotalSpent, Op::Equals, ValueShape::Number, Lowering::Compare(Comparator::Eq)),
    spec(Field::TotalSpent, Op::Between, ValueShape::NumberRange, Lowering::Between),
    spec(Field::TotalOrders, Op::GreaterThan, ValueShape::Number, Lowering::Compare(Comparator::Gt)),
    spec(Field::TotalOrders, Op::LessThan, ValueShape::Number, Lowering::Compare(Comparator::Lt)),
    spec(Field::TotalOrders, Op::Equals, ValueShape::Number, Lowering::Compare(Comparator::Eq)),
    spec(Field::LastVisit, Op::DaysAgo, ValueShape::DayCount, Lowering::OlderThanDays),
    spec(Field::LastVisit, Op::WithinDays, ValueShape::DayCount, Lowering::WithinDays),
    spec(Field::LastVisit, Op::IsNull, ValueShape::Absent, Lowering::IsNull),
    spec(Field::Status, Op::Equals, ValueShape::Status, Lowering::Compare(Comparator::Eq)),
    spec(Field::Status, Op::NotEquals, ValueShape::Status, Lowering::Compare(Comparator::NotEq)),
    spec(Field::RegistrationDate, Op::After, ValueShape::Date, Lowering::Compare(Comparator::Gt)),
    spec(Field::RegistrationDate, Op::Before, ValueShape::Date, Lowering::Compare(Comparator::Lt)),
    spec(Field::RegistrationDate, Op::Between, ValueShape::DateRange, Lowering::Between),
];

/// Find the table row for a raw `(field, operator)` pair.
pub fn lookup(field: &str, operator: &str) -> Option<&'static OperatorSpec> {
    let field = Field::parse(field)?;
    let operator = ConditionOperator::parse(operator)?;
    OPERATOR_TABLE
        .iter()
        .find(|s| s.field == field && s.operator == operator)
}

/// Operators accepted for a field, in table order.
pub fn operators_for(field: Field) -> Vec<ConditionOperator> {
    OPERATOR_TABLE
        .iter()
        .filter(|s| s.field == field)
        .map(|s| s.operator)
        .collect()
}
