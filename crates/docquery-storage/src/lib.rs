//! docquery storage.
//!
//! Reference implementation of the document store contract from
//! `docquery_core::storage`: an in-memory store that materializes query
//! results and hands them back page by page with continuation tokens.

pub mod config;
pub mod continuation;
pub mod memory;

pub use config::MemoryStoreConfig;
pub use continuation::{ContinuationToken, TOKEN_VERSION};
pub use memory::{Interpreter, MemoryContainer, MemoryDocumentStore, MemoryFeed};

// Re-exports from core
pub use docquery_core::storage::{
    page_stream, Document, DocumentContainer, DocumentDatabase, DocumentFeed, Page, Result,
    StoreError,
};
