//! Condition expressions for branching nodes.
//!
//! A condition is a single comparison between a dotted path into the run
//! context and a literal value. Expressions are a typed AST, not a
//! scripting language: evaluation is pure, cannot fail, and a missing
//! path or mismatched types simply evaluates to false.
//!
//! The string form `trigger.amount > 1000` parses into the AST for
//! convenience when authoring workflows as JSON.

use crate::error::ExprParseError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// String containment, or array membership for array operands.
    Contains,
}

/// A condition expression: `<context path> <op> <literal>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionExpr {
    /// Dotted path into the run context (e.g., "trigger.amount").
    pub path: String,
    /// The comparison operator.
    pub op: CompareOp,
    /// The literal to compare against.
    pub value: JsonValue,
}

impl ConditionExpr {
    /// Creates a new condition expression.
    #[must_use]
    pub fn new(path: impl Into<String>, op: CompareOp, value: JsonValue) -> Self {
        Self {
            path: path.into(),
            op,
            value,
        }
    }

    /// Evaluates the expression against the run context.
    ///
    /// A path that does not resolve evaluates to false, as does a
    /// comparison between incompatible types.
    #[must_use]
    pub fn eval(&self, context: &JsonValue) -> bool {
        let Some(actual) = lookup_path(context, &self.path) else {
            return false;
        };

        match self.op {
            CompareOp::Eq => actual == &self.value,
            CompareOp::Ne => actual != &self.value,
            CompareOp::Gt => compare_ordered(actual, &self.value).is_some_and(|o| o.is_gt()),
            CompareOp::Ge => compare_ordered(actual, &self.value).is_some_and(|o| o.is_ge()),
            CompareOp::Lt => compare_ordered(actual, &self.value).is_some_and(|o| o.is_lt()),
            CompareOp::Le => compare_ordered(actual, &self.value).is_some_and(|o| o.is_le()),
            CompareOp::Contains => contains(actual, &self.value),
        }
    }
}

/// Resolves a dotted path against a JSON value.
fn lookup_path<'a>(context: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Ordering comparison for numbers and strings; other types are unordered.
fn compare_ordered(left: &JsonValue, right: &JsonValue) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (JsonValue::Number(l), JsonValue::Number(r)) => {
            l.as_f64()?.partial_cmp(&r.as_f64()?)
        }
        (JsonValue::String(l), JsonValue::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

fn contains(haystack: &JsonValue, needle: &JsonValue) -> bool {
    match (haystack, needle) {
        (JsonValue::String(h), JsonValue::String(n)) => h.contains(n.as_str()),
        (JsonValue::Array(items), _) => items.contains(needle),
        _ => false,
    }
}

impl FromStr for ConditionExpr {
    type Err = ExprParseError;

    /// Parses the `path op literal` surface form.
    ///
    /// Multi-character operators are tried before their single-character
    /// prefixes so `>=` does not parse as `>` followed by `=...`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const OPERATORS: &[(&str, CompareOp)] = &[
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            (">=", CompareOp::Ge),
            ("<=", CompareOp::Le),
            (">", CompareOp::Gt),
            ("<", CompareOp::Lt),
            (" contains ", CompareOp::Contains),
        ];

        let (path_str, op, value_str) = OPERATORS
            .iter()
            .find_map(|(token, op)| {
                s.split_once(token)
                    .map(|(path, value)| (path, *op, value))
            })
            .ok_or_else(|| ExprParseError::MissingOperator {
                expression: s.to_string(),
            })?;

        let path = path_str.trim();
        let value_str = value_str.trim();
        if path.is_empty() || value_str.is_empty() {
            return Err(ExprParseError::MissingOperand {
                expression: s.to_string(),
            });
        }

        // Literals parse as JSON; a bare word falls back to a string.
        let value = serde_json::from_str(value_str)
            .unwrap_or_else(|_| JsonValue::String(value_str.to_string()));

        Ok(Self::new(path, op, value))
    }
}

impl std::fmt::Display for ConditionExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self.op {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Contains => "contains",
        };
        write!(f, "{} {} {}", self.path, op, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_numeric_comparison() {
        let expr: ConditionExpr = "trigger.amount > 1000".parse().expect("should parse");
        assert_eq!(expr.path, "trigger.amount");
        assert_eq!(expr.op, CompareOp::Gt);
        assert_eq!(expr.value, json!(1000));
    }

    #[test]
    fn parses_multi_char_operator_before_prefix() {
        let expr: ConditionExpr = "trigger.count >= 5".parse().expect("should parse");
        assert_eq!(expr.op, CompareOp::Ge);
        assert_eq!(expr.value, json!(5));
    }

    #[test]
    fn parses_string_literal() {
        let expr: ConditionExpr = r#"trigger.status == "open""#.parse().expect("should parse");
        assert_eq!(expr.value, json!("open"));

        // Bare word falls back to a string
        let expr: ConditionExpr = "trigger.status == open".parse().expect("should parse");
        assert_eq!(expr.value, json!("open"));
    }

    #[test]
    fn parses_contains() {
        let expr: ConditionExpr = "trigger.subject contains invoice"
            .parse()
            .expect("should parse");
        assert_eq!(expr.op, CompareOp::Contains);
    }

    #[test]
    fn rejects_missing_operator() {
        let result: Result<ConditionExpr, _> = "trigger.amount".parse();
        assert!(matches!(
            result,
            Err(ExprParseError::MissingOperator { .. })
        ));
    }

    #[test]
    fn rejects_missing_operand() {
        let result: Result<ConditionExpr, _> = "> 1000".parse();
        assert!(matches!(result, Err(ExprParseError::MissingOperand { .. })));
    }

    #[test]
    fn eval_numeric_comparison() {
        let context = json!({"trigger": {"amount": 1500}});
        let expr: ConditionExpr = "trigger.amount > 1000".parse().expect("parse");
        assert!(expr.eval(&context));

        let context = json!({"trigger": {"amount": 500}});
        assert!(!expr.eval(&context));
    }

    #[test]
    fn eval_missing_path_is_false() {
        let context = json!({"trigger": {}});
        let expr: ConditionExpr = "trigger.amount > 1000".parse().expect("parse");
        assert!(!expr.eval(&context));
    }

    #[test]
    fn eval_type_mismatch_is_false() {
        let context = json!({"trigger": {"amount": "plenty"}});
        let expr: ConditionExpr = "trigger.amount > 1000".parse().expect("parse");
        assert!(!expr.eval(&context));
    }

    #[test]
    fn eval_equality_on_any_type() {
        let context = json!({"trigger": {"urgent": true}});
        let expr = ConditionExpr::new("trigger.urgent", CompareOp::Eq, json!(true));
        assert!(expr.eval(&context));
    }

    #[test]
    fn eval_string_contains() {
        let context = json!({"trigger": {"subject": "Invoice #42 overdue"}});
        let expr = ConditionExpr::new("trigger.subject", CompareOp::Contains, json!("Invoice"));
        assert!(expr.eval(&context));

        // Case sensitive
        let expr = ConditionExpr::new("trigger.subject", CompareOp::Contains, json!("invoice"));
        assert!(!expr.eval(&context));
    }

    #[test]
    fn eval_array_contains() {
        let context = json!({"trigger": {"tags": ["billing", "urgent"]}});
        let expr = ConditionExpr::new("trigger.tags", CompareOp::Contains, json!("urgent"));
        assert!(expr.eval(&context));
    }

    #[test]
    fn expr_serde_roundtrip() {
        let expr = ConditionExpr::new("trigger.amount", CompareOp::Ge, json!(10.5));
        let json = serde_json::to_string(&expr).expect("serialize");
        let parsed: ConditionExpr = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(expr, parsed);
    }
}
