//! `engine` crate — workflow models, variable resolution, the step executor,
//! the trigger manager, and the `WorkflowEngine` that ties them to the queue.

pub mod config;
pub mod error;
pub mod executor;
pub mod models;
pub mod resolver;
pub mod runner;
pub mod service;
pub mod store;
pub mod trigger;
pub mod validate;

pub use config::EngineConfig;
pub use error::EngineError;
pub use executor::{ExecutorConfig, StepExecutor};
pub use models::{Action, ActionResult, Execution, ExecutionOutcome, ExecutionStatus, JobPayload, Trigger, Workflow};
pub use resolver::resolve;
pub use runner::ExecutionRunner;
pub use service::WorkflowEngine;
pub use store::{ExecutionStore, InMemoryStore, PgStore, WorkflowStore};
pub use trigger::{conditions_match, ScheduledRegistration, TriggerManager};
pub use validate::{validate_cron, validate_workflow};

#[cfg(test)]
mod executor_tests;
