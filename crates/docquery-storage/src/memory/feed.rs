//! Paged result feed over materialized query results.

use super::container::{Session, Shared};
use crate::continuation::ContinuationToken;
use async_trait::async_trait;
use docquery_core::config::clamp_page_size;
use docquery_core::storage::{Document, DocumentFeed, Page, Result, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

enum FeedState {
    /// Resumed from a token that has not been claimed yet.
    Resume { token: String },
    Active {
        results: Arc<Vec<Document>>,
        offset: usize,
        /// Session registered for the last page read, if any.
        issued: Option<Uuid>,
    },
}

/// Feed returned by [`MemoryContainer`](super::MemoryContainer) queries.
///
/// Reading a page that leaves results behind registers the remainder as a
/// continuation session and returns its token. Reading on from the same
/// feed consumes that token.
pub struct MemoryFeed {
    shared: Arc<Shared>,
    page_size: usize,
    partition_key: Option<String>,
    state: FeedState,
}

impl MemoryFeed {
    pub(super) fn new(
        shared: Arc<Shared>,
        results: Vec<Document>,
        page_size: usize,
        partition_key: Option<String>,
    ) -> Self {
        Self {
            shared,
            page_size,
            partition_key,
            state: FeedState::Active {
                results: Arc::new(results),
                offset: 0,
                issued: None,
            },
        }
    }

    pub(super) fn resume(
        shared: Arc<Shared>,
        token: String,
        page_size: usize,
        partition_key: Option<String>,
    ) -> Self {
        Self {
            shared,
            page_size,
            partition_key,
            state: FeedState::Resume { token },
        }
    }

    /// Decode a token and take its session out of the container.
    fn claim(&self, token: &str) -> Result<Session> {
        let name = &self.shared.name;
        let decoded = ContinuationToken::decode(token).map_err(|e| {
            warn!(container = %name, "Rejected malformed continuation token");
            e
        })?;
        if decoded.container != *name {
            warn!(container = %name, issuer = %decoded.container, "Continuation token from another container");
            return Err(StoreError::BadRequest(format!(
                "continuation token was issued by container '{}'",
                decoded.container
            )));
        }

        let mut state = self.shared.state.lock();
        let partition_matches = match state.sessions.peek(&decoded.session) {
            Some(session) => {
                self.partition_key.is_none() || session.partition_key == self.partition_key
            }
            None => {
                warn!(container = %name, session = %decoded.session, "Unknown continuation session");
                return Err(StoreError::NotFound(format!(
                    "continuation session {} is unknown or expired",
                    decoded.session
                )));
            }
        };
        if !partition_matches {
            return Err(StoreError::BadRequest(
                "partition key differs from the one the query was started with".to_string(),
            ));
        }
        state.sessions.pop(&decoded.session).ok_or_else(|| {
            StoreError::NotFound(format!("continuation session {} was claimed", decoded.session))
        })
    }
}

#[async_trait]
impl DocumentFeed for MemoryFeed {
    fn has_more(&self) -> bool {
        match &self.state {
            FeedState::Resume { .. } => true,
            FeedState::Active {
                results, offset, ..
            } => *offset < results.len(),
        }
    }

    async fn read_next(&mut self, page_size: Option<usize>) -> Result<Page> {
        if let FeedState::Resume { token } = &self.state {
            let session = self.claim(token)?;
            debug!(
                container = %self.shared.name,
                remaining = session.results.len() - session.offset,
                "Continuation session claimed"
            );
            if self.partition_key.is_none() {
                self.partition_key = session.partition_key;
            }
            self.state = FeedState::Active {
                results: session.results,
                offset: session.offset,
                issued: None,
            };
        }

        let FeedState::Active {
            results,
            offset,
            issued,
        } = &mut self.state
        else {
            return Err(StoreError::Backend("feed was not resumed".to_string()));
        };

        let size = clamp_page_size(page_size, self.page_size);
        let end = offset.saturating_add(size).min(results.len());
        let items = results[*offset..end].to_vec();
        *offset = end;

        let mut state = self.shared.state.lock();
        if let Some(previous) = issued.take() {
            state.sessions.pop(&previous);
        }
        let continuation = if end < results.len() {
            let session = Uuid::new_v4();
            state.sessions.put(
                session,
                Session {
                    results: Arc::clone(results),
                    offset: end,
                    partition_key: self.partition_key.clone(),
                },
            );
            *issued = Some(session);
            Some(ContinuationToken::new(self.shared.name.clone(), session).encode()?)
        } else {
            None
        };
        drop(state);

        Ok(Page {
            items,
            continuation,
        })
    }
}
