//! Condition trees built from a monitor's stored `conditions` JSON.

use std::str::FromStr;

use serde_json::Value;

use super::ConditionError;
use crate::database::models::Monitor;

/// How a child combines with the running result of its previous siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    /// Anything other than `"or"` means AND.
    pub fn lenient(raw: Option<&str>) -> Self {
        match raw {
            Some("or") => LogicalOperator::Or,
            _ => LogicalOperator::And,
        }
    }
}

impl FromStr for LogicalOperator {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "and" => Ok(LogicalOperator::And),
            "or" => Ok(LogicalOperator::Or),
            other => Err(ConditionError::InvalidLogicalOperator(other.to_string())),
        }
    }
}

/// Leaf comparison: `variable <operator> value`
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpression {
    pub variable: String,
    pub operator: String,
    pub value: Value,
    pub and_or: LogicalOperator,
}

impl ConditionExpression {
    pub fn new(
        variable: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
        and_or: LogicalOperator,
    ) -> Self {
        Self { variable: variable.into(), operator: operator.into(), value: value.into(), and_or }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    Expression(ConditionExpression),
    Group(ConditionExpressionGroup),
    /// An element whose `type` is neither `group` nor `expression`. Kept so
    /// evaluation reports it instead of silently dropping a user's condition.
    Unsupported { kind: String, and_or: LogicalOperator },
}

impl ConditionNode {
    pub fn and_or(&self) -> LogicalOperator {
        match self {
            ConditionNode::Expression(expression) => expression.and_or,
            ConditionNode::Group(group) => group.and_or,
            ConditionNode::Unsupported { and_or, .. } => *and_or,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConditionExpressionGroup {
    pub children: Vec<ConditionNode>,
    pub and_or: LogicalOperator,
}

impl ConditionExpressionGroup {
    pub fn new(children: Vec<ConditionNode>, and_or: LogicalOperator) -> Self {
        Self { children, and_or }
    }

    /// Build the condition tree for a monitor.
    ///
    /// Returns `Ok(None)` when no conditions are configured, which callers
    /// treat as "always pass".
    pub fn from_monitor(monitor: &Monitor) -> Result<Option<Self>, ConditionError> {
        Self::from_json(&monitor.conditions)
    }

    /// Lenient parse: unknown `andOr` values default to AND.
    pub fn from_json(raw: &str) -> Result<Option<Self>, ConditionError> {
        let elements = parse_array(raw)?;
        if elements.is_empty() {
            return Ok(None);
        }

        let mut root = Self::default();
        process_conditions(&elements, &mut root, false)?;
        Ok(Some(root))
    }

    /// Strict parse used for validation: unknown `andOr` values, unknown
    /// child types and empty groups are errors.
    pub fn parse_strict(raw: &str) -> Result<Option<Self>, ConditionError> {
        let elements = parse_array(raw)?;
        if elements.is_empty() {
            return Ok(None);
        }

        let mut root = Self::default();
        process_conditions(&elements, &mut root, true)?;
        Ok(Some(root))
    }

    /// Depth of the tree; a group of leaves has depth 1.
    pub fn depth(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(|child| match child {
                ConditionNode::Group(group) => group.depth(),
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }

    /// Every leaf expression in evaluation order.
    pub fn expressions(&self) -> Vec<&ConditionExpression> {
        let mut out = Vec::new();
        collect_expressions(self, &mut out);
        out
    }
}

fn collect_expressions<'a>(group: &'a ConditionExpressionGroup, out: &mut Vec<&'a ConditionExpression>) {
    for child in &group.children {
        match child {
            ConditionNode::Expression(expression) => out.push(expression),
            ConditionNode::Group(nested) => collect_expressions(nested, out),
            ConditionNode::Unsupported { .. } => {}
        }
    }
}

fn parse_array(raw: &str) -> Result<Vec<Value>, ConditionError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(elements)) => Ok(elements),
        Ok(Value::Null) => Ok(Vec::new()),
        Ok(other) => Err(ConditionError::InvalidJson(format!(
            "expected an array of conditions, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ConditionError::InvalidJson(e.to_string())),
    }
}

fn process_conditions(
    elements: &[Value],
    parent: &mut ConditionExpressionGroup,
    strict: bool,
) -> Result<(), ConditionError> {
    for element in elements {
        let and_or = match element.get("andOr").and_then(Value::as_str) {
            Some(raw) if strict => raw.parse()?,
            raw => LogicalOperator::lenient(raw),
        };

        match element.get("type").and_then(Value::as_str) {
            Some("group") => {
                let mut group = ConditionExpressionGroup::new(Vec::new(), and_or);
                let children = element.get("children").and_then(Value::as_array);
                if let Some(children) = children {
                    process_conditions(children, &mut group, strict)?;
                }
                if strict && group.children.is_empty() {
                    return Err(ConditionError::EmptyGroup);
                }
                parent.children.push(ConditionNode::Group(group));
            }
            Some("expression") => {
                let expression = ConditionExpression {
                    variable: string_field(element, "variable"),
                    operator: string_field(element, "operator"),
                    value: element.get("value").cloned().unwrap_or(Value::Null),
                    and_or,
                };
                parent.children.push(ConditionNode::Expression(expression));
            }
            other => {
                let kind = other.unwrap_or("<missing>").to_string();
                if strict {
                    return Err(ConditionError::InvalidChildType(kind));
                }
                parent.children.push(ConditionNode::Unsupported { kind, and_or });
            }
        }
    }
    Ok(())
}

fn string_field(element: &Value, key: &str) -> String {
    element.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
