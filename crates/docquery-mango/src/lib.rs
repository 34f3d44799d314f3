//! Query expression to Mango translation.
//!
//! Translation runs in two passes:
//! - [`QueryOptimizer`] checks every operator against the
//!   [`OperatorRegistry`], merges `Where` calls and normalizes boolean
//!   members into a [`QueryPlan`]
//! - [`MangoEmitter`] writes the plan out as a [`MangoQuery`]
//!
//! ```
//! use docquery_core::expr::{param, Query};
//!
//! let query = Query::source("families")
//!     .filter("f", param("f").field("Age").gt(5))
//!     .into_expr();
//! let mango = docquery_mango::translate(&query).unwrap();
//! assert_eq!(mango.to_string(), r#"{"selector":{"Age":{"$gt":5}}}"#);
//! ```

pub mod document;
pub mod emitter;
pub mod optimizer;
pub mod plan;
pub mod registry;

pub use document::MangoQuery;
pub use emitter::{encode_constant, MangoEmitter};
pub use optimizer::QueryOptimizer;
pub use plan::{Filter, QueryPlan, SortKey};
pub use registry::{OperatorInfo, OperatorKind, OperatorRegistry};

use docquery_core::error::QueryResult;
use docquery_core::expr::Expr;

/// Translate a query tree into a Mango query document.
pub fn translate(expr: &Expr) -> QueryResult<MangoQuery> {
    let plan = QueryOptimizer::optimize(expr)?;
    MangoEmitter::emit(&plan)
}

/// True iff [`translate`] would succeed.
pub fn is_valid(expr: &Expr) -> bool {
    translate(expr).is_ok()
}
