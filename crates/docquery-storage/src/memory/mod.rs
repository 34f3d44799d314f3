//! In-memory document store.
//!
//! Non-persistent; intended for tests, the CLI and as the fallback
//! evaluator for queries that cannot be translated to Mango.

mod container;
mod feed;
pub mod interpreter;

pub use container::MemoryContainer;
pub use feed::MemoryFeed;
pub use interpreter::Interpreter;

use crate::config::MemoryStoreConfig;
use async_trait::async_trait;
use docquery_core::storage::{DocumentContainer, DocumentDatabase, Result, StoreError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A set of in-memory containers.
pub struct MemoryDocumentStore {
    config: MemoryStoreConfig,
    containers: RwLock<HashMap<String, Arc<MemoryContainer>>>,
}

impl MemoryDocumentStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            containers: RwLock::new(HashMap::new()),
        }
    }

    /// Create with default configuration.
    pub fn default_config() -> Self {
        Self::new(MemoryStoreConfig::new())
    }

    /// Typed handle to a container, creating it when missing.
    pub fn container(&self, name: &str) -> Arc<MemoryContainer> {
        if let Some(container) = self.containers.read().get(name) {
            return Arc::clone(container);
        }
        let mut containers = self.containers.write();
        Arc::clone(containers.entry(name.to_string()).or_insert_with(|| {
            info!(container = %name, "Created container");
            Arc::new(MemoryContainer::new(name, self.config.clone()))
        }))
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::default_config()
    }
}

#[async_trait]
impl DocumentDatabase for MemoryDocumentStore {
    async fn open_container(&self, name: &str) -> Result<Arc<dyn DocumentContainer>> {
        let container: Arc<dyn DocumentContainer> = self.container(name);
        Ok(container)
    }

    async fn delete_container(&self, name: &str) -> Result<()> {
        match self.containers.write().remove(name) {
            Some(_) => {
                info!(container = %name, "Deleted container");
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("container '{}' not found", name))),
        }
    }

    async fn list_containers(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.containers.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
