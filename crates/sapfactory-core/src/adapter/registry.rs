use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Adapter, AdapterError, AdapterFactory, AdapterResult, FakeAdapterFactory};
use crate::domain::SystemConfig;

/// String-keyed adapter factories. Built at startup, shared read-only by
/// every executor afterwards.
#[derive(Default)]
pub struct AdapterRegistry {
    factories: BTreeMap<String, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// `fake` plus the placeholders for the wire-protocol adapters.
    pub fn with_defaults() -> Self {
        Self::new()
            .register("fake", Arc::new(FakeAdapterFactory::new()))
            .register("rfc", Arc::new(UnsupportedAdapterFactory::new("rfc")))
            .register("odata", Arc::new(UnsupportedAdapterFactory::new("odata")))
    }

    /// Add or replace the factory under `name`.
    pub fn register(mut self, name: &str, factory: Arc<dyn AdapterFactory>) -> Self {
        self.factories.insert(name.to_string(), factory);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Create an adapter for `system` using the factory registered as `name`.
    pub fn create(&self, name: &str, system: &SystemConfig) -> AdapterResult<Arc<dyn Adapter>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| AdapterError::UnknownAdapter {
                name: name.to_string(),
            })?;
        factory.create(system)
    }
}

/// Registry slot for an adapter that has no implementation yet.
pub struct UnsupportedAdapterFactory {
    name: String,
}

impl UnsupportedAdapterFactory {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl AdapterFactory for UnsupportedAdapterFactory {
    fn create(&self, _system: &SystemConfig) -> AdapterResult<Arc<dyn Adapter>> {
        Err(AdapterError::Unsupported {
            adapter: self.name.clone(),
        })
    }
}
