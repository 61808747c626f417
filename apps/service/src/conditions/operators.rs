//! The fixed registry of condition operators.
//!
//! String operators compare strictly: no type coercion is applied to either
//! side, so `"1"` never equals `1`. Numeric operators coerce only the
//! expected operand (condition values are usually stored as strings) and
//! require the actual value to already be a JSON number.

use serde_json::Value;

/// A comparison operator identified by its string id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    NumEquals,
    NumNotEquals,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
}

pub const ALL_OPERATORS: &[Operator] = &[
    Operator::Equals,
    Operator::NotEquals,
    Operator::Contains,
    Operator::NotContains,
    Operator::StartsWith,
    Operator::NotStartsWith,
    Operator::EndsWith,
    Operator::NotEndsWith,
    Operator::NumEquals,
    Operator::NumNotEquals,
    Operator::LessThan,
    Operator::GreaterThan,
    Operator::LessThanOrEqual,
    Operator::GreaterThanOrEqual,
];

pub const DEFAULT_STRING_OPERATORS: &[Operator] = &[
    Operator::Equals,
    Operator::NotEquals,
    Operator::Contains,
    Operator::NotContains,
    Operator::StartsWith,
    Operator::NotStartsWith,
    Operator::EndsWith,
    Operator::NotEndsWith,
];

pub const DEFAULT_NUMBER_OPERATORS: &[Operator] = &[
    Operator::NumEquals,
    Operator::NumNotEquals,
    Operator::LessThan,
    Operator::GreaterThan,
    Operator::LessThanOrEqual,
    Operator::GreaterThanOrEqual,
];

pub const DEFAULT_ARRAY_OPERATORS: &[Operator] = &[Operator::Contains, Operator::NotContains];

impl Operator {
    /// Look up an operator by id
    pub fn from_id(id: &str) -> Option<Self> {
        ALL_OPERATORS.iter().copied().find(|op| op.id() == id)
    }

    pub fn id(self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "starts_with",
            Operator::NotStartsWith => "not_starts_with",
            Operator::EndsWith => "ends_with",
            Operator::NotEndsWith => "not_ends_with",
            Operator::NumEquals => "num_equals",
            Operator::NumNotEquals => "num_not_equals",
            Operator::LessThan => "lt",
            Operator::GreaterThan => "gt",
            Operator::LessThanOrEqual => "lte",
            Operator::GreaterThanOrEqual => "gte",
        }
    }

    /// Human readable caption, used in heartbeat messages
    pub fn caption(self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not equals",
            Operator::Contains => "contains",
            Operator::NotContains => "not contains",
            Operator::StartsWith => "starts with",
            Operator::NotStartsWith => "not starts with",
            Operator::EndsWith => "ends with",
            Operator::NotEndsWith => "not ends with",
            Operator::NumEquals => "==",
            Operator::NumNotEquals => "!=",
            Operator::LessThan => "<",
            Operator::GreaterThan => ">",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThanOrEqual => ">=",
        }
    }

    /// Whether this operator compares numbers rather than strings or arrays
    pub fn is_numeric(self) -> bool {
        DEFAULT_NUMBER_OPERATORS.contains(&self)
    }

    /// Test `actual` (from the check context) against `expected` (from the condition).
    pub fn test(self, actual: &Value, expected: &Value) -> bool {
        match self {
            Operator::Equals => actual == expected,
            Operator::NotEquals => actual != expected,
            Operator::Contains => contains(actual, expected).unwrap_or(false),
            Operator::NotContains => contains(actual, expected).is_some_and(|found| !found),
            Operator::StartsWith => starts_with(actual, expected).unwrap_or(false),
            Operator::NotStartsWith => starts_with(actual, expected).is_some_and(|found| !found),
            Operator::EndsWith => ends_with(actual, expected).unwrap_or(false),
            Operator::NotEndsWith => ends_with(actual, expected).is_some_and(|found| !found),
            Operator::NumEquals => compare(actual, expected, |a, e| a == e),
            Operator::NumNotEquals => !compare(actual, expected, |a, e| a == e),
            Operator::LessThan => compare(actual, expected, |a, e| a < e),
            Operator::GreaterThan => compare(actual, expected, |a, e| a > e),
            Operator::LessThanOrEqual => compare(actual, expected, |a, e| a <= e),
            Operator::GreaterThanOrEqual => compare(actual, expected, |a, e| a >= e),
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// `None` when the operand types cannot be compared at all.
fn contains(actual: &Value, expected: &Value) -> Option<bool> {
    match (actual, expected) {
        (Value::Array(items), _) => Some(items.contains(expected)),
        (Value::String(haystack), Value::String(needle)) => Some(haystack.contains(needle.as_str())),
        _ => None,
    }
}

fn starts_with(actual: &Value, expected: &Value) -> Option<bool> {
    match (actual, expected) {
        (Value::Array(items), _) => Some(items.first() == Some(expected)),
        (Value::String(haystack), Value::String(prefix)) => Some(haystack.starts_with(prefix.as_str())),
        _ => None,
    }
}

fn ends_with(actual: &Value, expected: &Value) -> Option<bool> {
    match (actual, expected) {
        (Value::Array(items), _) => Some(items.last() == Some(expected)),
        (Value::String(haystack), Value::String(suffix)) => Some(haystack.ends_with(suffix.as_str())),
        _ => None,
    }
}

fn compare(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    let Some(actual) = actual.as_f64() else {
        return false;
    };
    match coerce_number(expected) {
        Some(expected) => cmp(actual, expected),
        None => false,
    }
}

/// Numeric parse of the expected operand. Empty strings are not numbers.
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
