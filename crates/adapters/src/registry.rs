//! Action-type → adapter lookup, populated once at start-up.

use std::collections::HashMap;
use std::sync::Arc;

use crate::builtin::{ConditionAdapter, HttpRequestAdapter, LogAdapter, WaitAdapter};
use crate::IntegrationAdapter;

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn IntegrationAdapter>>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `wait`, `condition`, `http_request` and `log`.
    pub fn with_builtins() -> Self {
        Self::new()
            .with("wait", Arc::new(WaitAdapter))
            .with("condition", Arc::new(ConditionAdapter))
            .with("http_request", Arc::new(HttpRequestAdapter::new()))
            .with("log", Arc::new(LogAdapter))
    }

    /// Register `adapter` for `action_type`, returning the one it replaced.
    pub fn register(
        &mut self,
        action_type: impl Into<String>,
        adapter: Arc<dyn IntegrationAdapter>,
    ) -> Option<Arc<dyn IntegrationAdapter>> {
        self.adapters.insert(action_type.into(), adapter)
    }

    /// Builder-style [`AdapterRegistry::register`].
    pub fn with(mut self, action_type: impl Into<String>, adapter: Arc<dyn IntegrationAdapter>) -> Self {
        self.register(action_type, adapter);
        self
    }

    pub fn get(&self, action_type: &str) -> Option<&Arc<dyn IntegrationAdapter>> {
        self.adapters.get(action_type)
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.adapters.contains_key(action_type)
    }

    /// Registered action types, sorted.
    pub fn action_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("action_types", &self.action_types())
            .finish()
    }
}
