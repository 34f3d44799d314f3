//! In-memory container.

use super::feed::MemoryFeed;
use super::interpreter::Interpreter;
use crate::config::MemoryStoreConfig;
use async_trait::async_trait;
use docquery_core::config::clamp_page_size;
use docquery_core::expr::Expr;
use docquery_core::storage::{Document, DocumentContainer, DocumentFeed, Result, StoreError};
use docquery_mango::QueryOptimizer;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Results still to be read by a resumed feed.
#[derive(Debug, Clone)]
pub(super) struct Session {
    pub(super) results: Arc<Vec<Document>>,
    pub(super) offset: usize,
    pub(super) partition_key: Option<String>,
}

/// Everything behind the container lock.
pub(super) struct ContainerState {
    /// Documents in insertion order.
    pub(super) documents: Vec<Document>,
    pub(super) sessions: LruCache<Uuid, Session>,
}

pub(super) struct Shared {
    pub(super) name: String,
    pub(super) config: MemoryStoreConfig,
    pub(super) state: Mutex<ContainerState>,
}

/// A named document collection guarded by a single lock.
///
/// Reads, writes, deletes and query materialization all take the same lock.
/// Feeds hold their results outside it and only lock to register or claim
/// continuation sessions.
#[derive(Clone)]
pub struct MemoryContainer {
    shared: Arc<Shared>,
}

impl MemoryContainer {
    pub fn new(name: impl Into<String>, config: MemoryStoreConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_pending_continuations).unwrap_or(NonZeroUsize::MIN);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                state: Mutex::new(ContainerState {
                    documents: Vec::new(),
                    sessions: LruCache::new(capacity),
                }),
            }),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.shared.state.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of continuation sessions waiting to be claimed.
    pub fn pending_continuations(&self) -> usize {
        self.shared.state.lock().sessions.len()
    }

    fn page_size(&self, requested: Option<usize>) -> usize {
        clamp_page_size(requested, self.shared.config.default_page_size)
    }
}

fn same_key(doc: &Document, id: &str, partition_key: Option<&str>) -> bool {
    doc.id == id && doc.partition_key.as_deref() == partition_key
}

fn new_etag() -> String {
    Uuid::new_v4().to_string()
}

fn require_object(id: &str, payload: &Value) -> Result<()> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(StoreError::BadRequest(format!(
            "document '{}' payload must be a JSON object",
            id
        )))
    }
}

fn check_etag(existing: &Document, etag: Option<&str>) -> Result<()> {
    match etag {
        Some(etag) if etag != existing.etag => Err(StoreError::OutOfDate(format!(
            "document '{}' has changed since etag {}",
            existing.id, etag
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl DocumentContainer for MemoryContainer {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn find(&self, id: &str, partition_key: Option<&str>) -> Result<Option<Document>> {
        let state = self.shared.state.lock();
        Ok(state
            .documents
            .iter()
            .find(|doc| same_key(doc, id, partition_key))
            .cloned())
    }

    async fn add(&self, id: &str, payload: Value, partition_key: Option<&str>) -> Result<Document> {
        require_object(id, &payload)?;
        let mut state = self.shared.state.lock();
        if state
            .documents
            .iter()
            .any(|doc| same_key(doc, id, partition_key))
        {
            return Err(StoreError::Conflict(format!(
                "document '{}' already exists in '{}'",
                id, self.shared.name
            )));
        }
        let doc = Document::new(id, new_etag(), partition_key.map(str::to_string), payload);
        state.documents.push(doc.clone());
        Ok(doc)
    }

    async fn upsert(
        &self,
        id: &str,
        payload: Value,
        partition_key: Option<&str>,
        etag: Option<&str>,
    ) -> Result<Document> {
        require_object(id, &payload)?;
        let mut state = self.shared.state.lock();
        let doc = Document::new(id, new_etag(), partition_key.map(str::to_string), payload);
        match state
            .documents
            .iter()
            .position(|existing| same_key(existing, id, partition_key))
        {
            Some(position) => {
                check_etag(&state.documents[position], etag)?;
                state.documents[position] = doc.clone();
            }
            None if etag.is_some() => {
                return Err(StoreError::OutOfDate(format!(
                    "document '{}' no longer exists",
                    id
                )))
            }
            None => state.documents.push(doc.clone()),
        }
        Ok(doc)
    }

    async fn replace(&self, existing: &Document, payload: Value) -> Result<Document> {
        require_object(&existing.id, &payload)?;
        let mut state = self.shared.state.lock();
        let partition_key = existing.partition_key.as_deref();
        let Some(current) = state
            .documents
            .iter_mut()
            .find(|doc| same_key(doc, &existing.id, partition_key))
        else {
            return Err(StoreError::NotFound(format!(
                "document '{}' not found in '{}'",
                existing.id, self.shared.name
            )));
        };
        check_etag(current, Some(existing.etag.as_str()))?;
        let doc = Document::new(
            existing.id.clone(),
            new_etag(),
            existing.partition_key.clone(),
            payload,
        );
        *current = doc.clone();
        Ok(doc)
    }

    async fn delete(&self, id: &str, partition_key: Option<&str>, etag: Option<&str>) -> Result<()> {
        let mut state = self.shared.state.lock();
        let Some(position) = state
            .documents
            .iter()
            .position(|doc| same_key(doc, id, partition_key))
        else {
            return Err(StoreError::NotFound(format!(
                "document '{}' not found in '{}'",
                id, self.shared.name
            )));
        };
        check_etag(&state.documents[position], etag)?;
        state.documents.remove(position);
        Ok(())
    }

    fn create_query(
        &self,
        query: &Expr,
        page_size: Option<usize>,
        partition_key: Option<&str>,
    ) -> Result<Box<dyn DocumentFeed>> {
        let plan = QueryOptimizer::optimize(query)?;
        if plan.source != self.shared.name {
            debug!(
                container = %self.shared.name,
                source = %plan.source,
                "Query source differs from container name"
            );
        }

        let results = {
            let state = self.shared.state.lock();
            let scoped = state.documents.iter().filter(|doc| {
                partition_key.is_none() || doc.partition_key.as_deref() == partition_key
            });
            Interpreter::new().evaluate(&plan, scoped)?
        };

        info!(
            container = %self.shared.name,
            results = results.len(),
            "Query materialized"
        );
        Ok(Box::new(MemoryFeed::new(
            Arc::clone(&self.shared),
            results,
            self.page_size(page_size),
            partition_key.map(str::to_string),
        )))
    }

    fn continue_query(
        &self,
        continuation: &str,
        page_size: Option<usize>,
        partition_key: Option<&str>,
    ) -> Box<dyn DocumentFeed> {
        Box::new(MemoryFeed::resume(
            Arc::clone(&self.shared),
            continuation.to_string(),
            self.page_size(page_size),
            partition_key.map(str::to_string),
        ))
    }
}
