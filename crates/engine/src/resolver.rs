//! Variable resolution for action params.
//!
//! Every `{{name}}` inside a string leaf is replaced by the string form of
//! `variables[name]`. Dotted paths walk into bound values
//! (`{{lead.emails.0}}`), whitespace inside the braces is ignored, and a
//! placeholder that cannot be resolved stays in the output verbatim.
//!
//! Resolution is a pure function of `(params, variables)`: inputs are never
//! mutated and object key order is preserved.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}\}").unwrap()
});

/// Resolve every placeholder in `value` against `variables`.
pub fn resolve(value: &Value, variables: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_str(s, variables)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, variables)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, variables)))
                .collect(),
        ),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
    }
}

/// Resolve placeholders in a single string.
pub fn resolve_str(input: &str, variables: &HashMap<String, Value>) -> String {
    if !input.contains("{{") {
        return input.to_owned();
    }

    PLACEHOLDER
        .replace_all(input, |caps: &Captures| match lookup(&caps[1], variables) {
            Some(value) => string_form(value),
            None => caps[0].to_owned(),
        })
        .into_owned()
}

/// Names referenced by placeholders anywhere in `value`, in first-seen order.
pub fn referenced_variables(value: &Value) -> Vec<String> {
    fn collect(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) => {
                for caps in PLACEHOLDER.captures_iter(s) {
                    let root = caps[1].split('.').next().unwrap_or_default().to_owned();
                    if !out.contains(&root) {
                        out.push(root);
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
            Value::Object(map) => map.values().for_each(|v| collect(v, out)),
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    let mut out = Vec::new();
    collect(value, &mut out);
    out
}

fn lookup<'a>(path: &str, variables: &'a HashMap<String, Value>) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = variables.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
