//! Backend factories for execution-store connections.
//!
//! [`BackendRegistry`] is the dependency injection point the instance cache
//! uses to construct a [`World`] for a backend kind. Each factory receives
//! the effective settings of the configuration being connected.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use runboard_core::{StoreError, World};

use crate::service::config::Settings;

/// Constructs connections for one backend kind.
#[async_trait]
pub trait WorldFactory: Send + Sync {
    /// Backend kind served by this factory (e.g. `"memory"`).
    fn kind(&self) -> &'static str;

    /// Open a connection using `settings`.
    async fn create(&self, settings: &Settings) -> Result<Arc<dyn World>, StoreError>;
}

/// Registry of backend factories keyed by kind.
#[derive(Default)]
pub struct BackendRegistry {
    factories: HashMap<&'static str, Arc<dyn WorldFactory>>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A later registration for the same kind replaces
    /// the earlier one.
    pub fn register<F: WorldFactory + 'static>(&mut self, factory: F) {
        self.factories.insert(factory.kind(), Arc::new(factory));
    }

    #[must_use]
    pub fn get(&self, kind: &str) -> Option<Arc<dyn WorldFactory>> {
        self.factories.get(kind).cloned()
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}
