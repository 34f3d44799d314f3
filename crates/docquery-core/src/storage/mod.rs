//! Document store collaborator contract.
//!
//! The translator never talks to a store; it only produces the query these
//! traits consume. Stores hand results back page by page through
//! [`DocumentFeed`].

use crate::error::QueryError;
use crate::expr::Expr;
use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The request itself is malformed (e.g. a garbage continuation token).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A document with the same id already exists.
    #[error("Resource conflict: {0}")]
    Conflict(String),

    /// Etag mismatch.
    #[error("Resource out of date: {0}")]
    OutOfDate(String),

    /// The query could not be translated.
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend error.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_out_of_date(&self) -> bool {
        matches!(self, Self::OutOfDate(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Stored document envelope.
///
/// The payload is schema-less. The envelope id is written into the payload
/// object when the envelope is built, so filters can address `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub etag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
    pub payload: Value,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        etag: impl Into<String>,
        partition_key: Option<String>,
        mut payload: Value,
    ) -> Self {
        let id = id.into();
        if let Value::Object(map) = &mut payload {
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        Self {
            id,
            etag: etag.into(),
            partition_key,
            payload,
        }
    }

    /// Look up a dotted field path in the payload.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.payload, |value, segment| value.get(segment))
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Document>,
    /// Token resuming the query after this page; `None` once exhausted.
    pub continuation: Option<String>,
}

impl Page {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Page-at-a-time result enumeration.
#[async_trait]
pub trait DocumentFeed: Send {
    /// True iff another page can be fetched.
    fn has_more(&self) -> bool;

    /// Fetch the next page. `page_size` overrides the feed's default.
    ///
    /// On exhaustion returns an empty page with no continuation token.
    async fn read_next(&mut self, page_size: Option<usize>) -> Result<Page>;
}

/// Adapt a feed into a stream of pages, stopping once it reports no more.
pub fn page_stream(feed: Box<dyn DocumentFeed>) -> impl Stream<Item = Result<Page>> + Send {
    stream::try_unfold(feed, |mut feed| async move {
        if !feed.has_more() {
            return Ok(None);
        }
        let page = feed.read_next(None).await?;
        Ok(Some((page, feed)))
    })
}

/// A named collection of documents.
#[async_trait]
pub trait DocumentContainer: Send + Sync {
    fn name(&self) -> &str;

    async fn find(&self, id: &str, partition_key: Option<&str>) -> Result<Option<Document>>;

    /// Add a new document; fails with `Conflict` if the id exists.
    async fn add(&self, id: &str, payload: Value, partition_key: Option<&str>) -> Result<Document>;

    /// Insert or replace; with an etag, fails with `OutOfDate` on mismatch.
    async fn upsert(
        &self,
        id: &str,
        payload: Value,
        partition_key: Option<&str>,
        etag: Option<&str>,
    ) -> Result<Document>;

    /// Replace an existing document, checking its etag.
    async fn replace(&self, existing: &Document, payload: Value) -> Result<Document>;

    async fn delete(&self, id: &str, partition_key: Option<&str>, etag: Option<&str>) -> Result<()>;

    /// Start a query. Translation errors surface here.
    fn create_query(
        &self,
        query: &Expr,
        page_size: Option<usize>,
        partition_key: Option<&str>,
    ) -> Result<Box<dyn DocumentFeed>>;

    /// Resume a query from a continuation token.
    ///
    /// Never fails at call time; token problems surface on the first read.
    fn continue_query(
        &self,
        continuation: &str,
        page_size: Option<usize>,
        partition_key: Option<&str>,
    ) -> Box<dyn DocumentFeed>;
}

/// A set of containers.
#[async_trait]
pub trait DocumentDatabase: Send + Sync {
    /// Open a container, creating it when missing.
    async fn open_container(&self, name: &str) -> Result<Arc<dyn DocumentContainer>>;

    async fn delete_container(&self, name: &str) -> Result<()>;

    async fn list_containers(&self) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[test]
    fn test_envelope_injects_id() {
        let doc = Document::new("AndersenFamily", "e1", None, json!({"LastName": "Andersen"}));
        assert_eq!(doc.payload["id"], json!("AndersenFamily"));
        assert_eq!(doc.get("LastName"), Some(&json!("Andersen")));
    }

    #[test]
    fn test_get_nested_path() {
        let doc = Document::new("a", "e", None, json!({"Address": {"City": "Seattle"}}));
        assert_eq!(doc.get("Address.City"), Some(&json!("Seattle")));
        assert_eq!(doc.get("Address.Zip"), None);
    }

    struct CountingFeed {
        remaining: usize,
    }

    #[async_trait]
    impl DocumentFeed for CountingFeed {
        fn has_more(&self) -> bool {
            self.remaining > 0
        }

        async fn read_next(&mut self, _page_size: Option<usize>) -> Result<Page> {
            self.remaining = self.remaining.saturating_sub(1);
            Ok(Page {
                items: vec![Document::new("x", "e", None, json!({}))],
                continuation: (self.remaining > 0).then(|| "next".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn test_page_stream_stops_when_exhausted() {
        let pages: Vec<_> = page_stream(Box::new(CountingFeed { remaining: 3 }))
            .collect()
            .await;
        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|p| p.is_ok()));
    }
}
