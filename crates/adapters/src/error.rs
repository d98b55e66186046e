//! Adapter-level error type.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by an adapter's `execute` method.
///
/// All variants are action-level failures: the step executor records the
/// message in the results trail and applies the action's stop-on-error flag.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The external call failed or the integration rejected the request.
    #[error("{0}")]
    Failed(String),

    /// The resolved params do not fit what the adapter expects.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The call did not finish within its deadline.
    #[error("action timed out after {0:?}")]
    Timeout(Duration),
}
