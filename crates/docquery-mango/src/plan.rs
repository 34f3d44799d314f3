//! Normalized query plan produced by the optimizer.

use docquery_core::expr::{Expr, SortDirection};
use serde::Serialize;

/// Merged filter predicate and the parameter it is written against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub parameter: String,
    pub predicate: Expr,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub path: String,
    pub direction: SortDirection,
}

/// Normalized form of a query chain.
///
/// Holds at most one filter, sort keys that all share one direction, an
/// optional cap and an optional projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    /// Collection named by the query root.
    pub source: String,
    pub filter: Option<Filter>,
    pub sort: Vec<SortKey>,
    pub limit: Option<u64>,
    /// Projected field paths; `None` for whole documents.
    pub fields: Option<Vec<String>>,
    pub distinct: bool,
}

impl QueryPlan {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            filter: None,
            sort: Vec::new(),
            limit: None,
            fields: None,
            distinct: false,
        }
    }

    /// Direction shared by every sort key.
    pub fn sort_direction(&self) -> Option<SortDirection> {
        self.sort.first().map(|key| key.direction)
    }
}
