//! Memory store configuration.

use docquery_core::config::{self, env_vars};
use serde::{Deserialize, Serialize};

/// Configuration for [`MemoryDocumentStore`](crate::MemoryDocumentStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Page size used when a read does not ask for one.
    pub default_page_size: usize,
    /// Pending continuation sessions kept per container; the least recently
    /// issued are dropped first.
    pub max_pending_continuations: usize,
}

impl MemoryStoreConfig {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self {
            default_page_size: config::DEFAULT_PAGE_SIZE,
            max_pending_continuations: config::DEFAULT_MAX_PENDING_CONTINUATIONS,
        }
    }

    /// Defaults overridden by `DOCQUERY_PAGE_SIZE` and
    /// `DOCQUERY_MAX_CONTINUATIONS`.
    pub fn from_env() -> Self {
        Self {
            default_page_size: env_vars::page_size(),
            max_pending_continuations: env_vars::max_continuations(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.default_page_size = config::clamp_page_size(Some(page_size), config::DEFAULT_PAGE_SIZE);
        self
    }

    pub fn with_max_pending_continuations(mut self, capacity: usize) -> Self {
        self.max_pending_continuations = capacity.max(1);
        self
    }
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
