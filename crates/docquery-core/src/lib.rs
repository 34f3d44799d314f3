//! Core types for docquery.
//!
//! This crate defines the query expression tree, the error taxonomy and the
//! document store contract shared by the translator, the in-memory store
//! and the CLI.

pub mod config;
pub mod error;
pub mod expr;
pub mod storage;

pub use error::{Error, QueryError, QueryResult, Result};
pub use expr::{
    lambda, lit, new_object, param, BinaryOp, Constant, Expr, FieldPath, IntoExpr, Query,
    QueryMethod, SortDirection, UnaryOp,
};
pub use storage::{
    page_stream, Document, DocumentContainer, DocumentDatabase, DocumentFeed, Page, StoreError,
};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{env_vars, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
    pub use crate::error::{Error, QueryError, Result};
    pub use crate::expr::{lambda, lit, new_object, param, Constant, Expr, IntoExpr, Query};
    pub use crate::storage::{
        Document, DocumentContainer, DocumentDatabase, DocumentFeed, Page, StoreError,
    };
}
