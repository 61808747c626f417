use super::expression::{ConditionExpression, ConditionExpressionGroup, ConditionNode, LogicalOperator};
use super::operators::{ALL_OPERATORS, Operator};
use super::{ConditionContext, ConditionError};

/// Evaluate a single expression against the context.
pub fn evaluate_expression(
    expression: &ConditionExpression,
    context: &ConditionContext,
) -> Result<bool, ConditionError> {
    let operator = Operator::from_id(&expression.operator).ok_or_else(|| {
        ConditionError::UnknownOperator {
            operator: expression.operator.clone(),
            expected: ALL_OPERATORS.iter().map(|op| op.id()).collect::<Vec<_>>().join(","),
        }
    })?;

    let actual = context
        .get(&expression.variable)
        .ok_or_else(|| ConditionError::MissingContextVariable(expression.variable.clone()))?;

    Ok(operator.test(actual, &expression.value))
}

/// Evaluate a group left to right.
///
/// Every child is evaluated (no short-circuit) so a malformed child always
/// surfaces as an error. The first child seeds the result; each following
/// child folds in with its own `and_or`.
pub fn evaluate_expression_group(
    group: &ConditionExpressionGroup,
    context: &ConditionContext,
) -> Result<bool, ConditionError> {
    if group.children.is_empty() {
        return Err(ConditionError::EmptyGroup);
    }

    let mut result: Option<bool> = None;

    for child in &group.children {
        let child_result = match child {
            ConditionNode::Expression(expression) => evaluate_expression(expression, context)?,
            ConditionNode::Group(nested) => evaluate_expression_group(nested, context)?,
            ConditionNode::Unsupported { kind, .. } => {
                return Err(ConditionError::InvalidChildType(kind.clone()));
            }
        };

        result = Some(match result {
            None => child_result,
            Some(acc) => match child.and_or() {
                LogicalOperator::Or => acc || child_result,
                LogicalOperator::And => acc && child_result,
            },
        });
    }

    result.ok_or(ConditionError::EmptyGroup)
}
