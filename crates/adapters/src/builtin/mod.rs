//! Adapters that ship with the engine and need no connected account.

mod condition;
mod http;
mod log;
mod wait;

pub use condition::ConditionAdapter;
pub use http::HttpRequestAdapter;
pub use log::LogAdapter;
pub use wait::WaitAdapter;

use serde_json::Value;

/// Read a non-negative integer that may have arrived as a string after
/// placeholder substitution (`"{{delay}}"` resolves to `"5"`).
pub(crate) fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64().filter(|f| *f >= 0.0 && f.is_finite()).map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Same as [`as_u64`] for floats.
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The text a value would be substituted as.
pub(crate) fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
