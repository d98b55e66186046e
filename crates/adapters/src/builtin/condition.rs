//! `condition`: a gate.
//!
//! Params: `{"left": .., "operator": "eq", "right": ..}`. Succeeds with
//! `{"passed": true}` when the comparison holds and fails with
//! "condition not met" otherwise, so a condition with `stopOnError` ends the
//! run and one without it merely records the outcome.
//!
//! Operands usually come out of placeholder substitution as strings, so
//! equality compares string forms and ordering operators parse numbers.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{as_f64, string_form};
use crate::{ActionContext, AdapterError, IntegrationAdapter};

#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Exists,
}

impl std::str::FromStr for Operator {
    type Err = AdapterError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" | "==" | "equals"         => Ok(Self::Eq),
            "ne" | "!=" | "not_equals"     => Ok(Self::Ne),
            "gt" | ">"                     => Ok(Self::Gt),
            "gte" | ">="                   => Ok(Self::Gte),
            "lt" | "<"                     => Ok(Self::Lt),
            "lte" | "<="                   => Ok(Self::Lte),
            "contains"                     => Ok(Self::Contains),
            "exists"                       => Ok(Self::Exists),
            other => Err(AdapterError::InvalidParams(format!("unknown operator '{other}'"))),
        }
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    a == b || string_form(a) == string_form(b)
}

fn numeric(value: &Value, side: &str) -> Result<f64, AdapterError> {
    as_f64(value).ok_or_else(|| {
        AdapterError::InvalidParams(format!("'{side}' must be numeric, got {value}"))
    })
}

fn evaluate(op: Operator, left: &Value, right: &Value) -> Result<bool, AdapterError> {
    Ok(match op {
        Operator::Eq  => loosely_equal(left, right),
        Operator::Ne  => !loosely_equal(left, right),
        Operator::Gt  => numeric(left, "left")? > numeric(right, "right")?,
        Operator::Gte => numeric(left, "left")? >= numeric(right, "right")?,
        Operator::Lt  => numeric(left, "left")? < numeric(right, "right")?,
        Operator::Lte => numeric(left, "left")? <= numeric(right, "right")?,
        Operator::Contains => match left {
            Value::Array(items) => items.iter().any(|item| loosely_equal(item, right)),
            Value::Object(map) => map.contains_key(&string_form(right)),
            other => string_form(other).contains(&string_form(right)),
        },
        Operator::Exists => match left {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        },
    })
}

#[async_trait]
impl IntegrationAdapter for ConditionAdapter {
    async fn execute(
        &self,
        _action_type: &str,
        params: Value,
        _ctx: &ActionContext,
    ) -> Result<Value, AdapterError> {
        let op: Operator = match params.get("operator") {
            None => Operator::Eq,
            Some(Value::String(s)) => s.parse()?,
            Some(other) => {
                return Err(AdapterError::InvalidParams(format!(
                    "'operator' must be a string, got {other}"
                )))
            }
        };
        let left = params.get("left").unwrap_or(&Value::Null);
        let right = params.get("right").unwrap_or(&Value::Null);

        if evaluate(op, left, right)? {
            Ok(json!({ "passed": true }))
        } else {
            Err(AdapterError::Failed(format!(
                "condition not met: {} {:?} {}",
                left, op, right
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ctx() -> ActionContext {
        ActionContext {
            workflow_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            step: 0,
            attempt: 1,
        }
    }

    async fn check(params: Value) -> Result<Value, AdapterError> {
        ConditionAdapter.execute("condition", params, &ctx()).await
    }

    #[tokio::test]
    async fn equality_compares_string_forms() {
        assert!(check(json!({ "left": "5", "operator": "eq", "right": 5 })).await.is_ok());
        assert!(check(json!({ "left": "5", "right": "5" })).await.is_ok());
        assert!(check(json!({ "left": "a", "operator": "ne", "right": "b" })).await.is_ok());
    }

    #[tokio::test]
    async fn unmet_condition_fails() {
        let out = check(json!({ "left": 1, "operator": "gt", "right": "10" })).await;
        assert!(matches!(out, Err(AdapterError::Failed(msg)) if msg.starts_with("condition not met")));
    }

    #[tokio::test]
    async fn ordering_needs_numbers() {
        assert!(check(json!({ "left": "12.5", "operator": ">=", "right": 12 })).await.is_ok());
        let out = check(json!({ "left": "abc", "operator": "lt", "right": 1 })).await;
        assert!(matches!(out, Err(AdapterError::InvalidParams(_))));
    }

    #[tokio::test]
    async fn contains_and_exists() {
        assert!(check(json!({ "left": "urgent: server down", "operator": "contains", "right": "urgent" })).await.is_ok());
        assert!(check(json!({ "left": ["a", 2], "operator": "contains", "right": "2" })).await.is_ok());
        assert!(check(json!({ "left": "x", "operator": "exists" })).await.is_ok());
        assert!(check(json!({ "left": "", "operator": "exists" })).await.is_err());
        assert!(check(json!({ "operator": "exists" })).await.is_err());
    }

    #[tokio::test]
    async fn unknown_operator_is_invalid() {
        let out = check(json!({ "left": 1, "operator": "~", "right": 1 })).await;
        assert!(matches!(out, Err(AdapterError::InvalidParams(_))));
    }
}
