//! Condition expressions - user configured boolean trees that decide
//! UP/DOWN from richer response data than a plain success/failure.
//!
//! Checkers that support conditions declare the variables they place in a
//! [`ConditionContext`], parse the monitor's tree with
//! [`ConditionExpressionGroup::from_monitor`] and evaluate it themselves.

pub mod evaluator;
pub mod expression;
pub mod operators;

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

pub use evaluator::{evaluate_expression, evaluate_expression_group};
pub use expression::{ConditionExpression, ConditionExpressionGroup, ConditionNode, LogicalOperator};
pub use operators::{
    DEFAULT_ARRAY_OPERATORS, DEFAULT_NUMBER_OPERATORS, DEFAULT_STRING_OPERATORS, Operator,
};

/// Errors raised while building or evaluating a condition tree.
///
/// The display text ends up verbatim in the heartbeat message so users can
/// diagnose a misconfigured condition.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConditionError {
    #[error("Unexpected expression operator ID '{operator}'. Expected one of [{expected}]")]
    UnknownOperator { operator: String, expected: String },
    #[error("Variable missing in context: {0}")]
    MissingContextVariable(String),
    #[error("ConditionExpressionGroup must contain at least one child")]
    EmptyGroup,
    #[error("Invalid child type '{0}' in condition group. Expected 'expression' or 'group'")]
    InvalidChildType(String),
    #[error("Invalid logical operator '{0}'. Expected 'and' or 'or'")]
    InvalidLogicalOperator(String),
    #[error("Invalid conditions JSON: {0}")]
    InvalidJson(String),
}

/// A variable a checker exposes to conditions, with the operators allowed on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionVariable {
    pub id: &'static str,
    pub operators: &'static [Operator],
}

impl ConditionVariable {
    pub const fn new(id: &'static str, operators: &'static [Operator]) -> Self {
        Self { id, operators }
    }
}

/// Flat map of named values extracted from a check response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionContext {
    values: HashMap<String, Value>,
}

impl ConditionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Evaluate an optional tree; no conditions means pass.
pub fn evaluate_optional(
    group: Option<&ConditionExpressionGroup>,
    context: &ConditionContext,
) -> Result<bool, ConditionError> {
    match group {
        Some(group) => evaluate_expression_group(group, context),
        None => Ok(true),
    }
}
