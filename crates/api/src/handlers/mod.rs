pub mod executions;
pub mod webhooks;
pub mod workflows;

pub use crate::AppState;
