//! `adapters` crate — the `IntegrationAdapter` contract, the action-type
//! registry, and built-in adapters.
//!
//! Every integration, built-in or host-provided, implements
//! [`IntegrationAdapter`]. The engine looks adapters up by action type in an
//! [`AdapterRegistry`] and never matches on type strings itself.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use error::AdapterError;
pub use registry::AdapterRegistry;
pub use traits::{ActionContext, IntegrationAdapter};
