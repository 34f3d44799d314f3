//! Allow-list of supported query operators.
//!
//! Every method call in a query tree is checked against this table before
//! any translation happens. Each check is one hash lookup.

use docquery_core::error::{QueryError, QueryResult};
use docquery_core::expr::{Expr, QueryMethod};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Where an operator may appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    /// In the query call chain (`Where`, `OrderBy`, `Take`, ...).
    Chain,
    /// Inside a filter predicate (`Any`, `Contains`, `IsMatch`, ...).
    Predicate,
}

/// Registry entry for one operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorInfo {
    pub kind: OperatorKind,
    /// Number of arguments, including the source / receiver.
    pub arity: usize,
}

static OPERATORS: Lazy<HashMap<QueryMethod, OperatorInfo>> = Lazy::new(|| {
    use OperatorKind::{Chain, Predicate};

    [
        (QueryMethod::Where, Chain, 2),
        (QueryMethod::OrderBy, Chain, 2),
        (QueryMethod::OrderByDescending, Chain, 2),
        (QueryMethod::ThenBy, Chain, 2),
        (QueryMethod::ThenByDescending, Chain, 2),
        (QueryMethod::Take, Chain, 2),
        (QueryMethod::Select, Chain, 2),
        (QueryMethod::Distinct, Chain, 1),
        // Any without a predicate is not supported
        (QueryMethod::Any, Predicate, 2),
        (QueryMethod::All, Predicate, 2),
        (QueryMethod::Contains, Predicate, 2),
        (QueryMethod::In, Predicate, 2),
        (QueryMethod::IsMatch, Predicate, 2),
    ]
    .into_iter()
    .map(|(method, kind, arity)| (method, OperatorInfo { kind, arity }))
    .collect()
});

/// Operator registry.
pub struct OperatorRegistry;

impl OperatorRegistry {
    /// Registry entry for a method identity, ignoring arity.
    pub fn lookup(method: &QueryMethod) -> Option<OperatorInfo> {
        OPERATORS.get(method).copied()
    }

    /// True only for a call node whose operator and arity are registered.
    pub fn is_supported(node: &Expr) -> bool {
        match node {
            Expr::Call { method, args } => Self::is_supported_call(method, args),
            _ => false,
        }
    }

    pub fn is_supported_call(method: &QueryMethod, args: &[Expr]) -> bool {
        Self::lookup(method).is_some_and(|info| info.arity == args.len())
    }

    /// Look up a call, failing with an error that names the operator.
    pub fn check(method: &QueryMethod, args: &[Expr]) -> QueryResult<OperatorInfo> {
        let info = Self::lookup(method).ok_or_else(|| {
            QueryError::unsupported(format!("operator '{}' is not supported", method))
        })?;
        if info.arity != args.len() {
            return Err(QueryError::unsupported(format!(
                "operator '{}' with {} argument(s) is not supported (expected {})",
                method,
                args.len(),
                info.arity
            )));
        }
        Ok(info)
    }

    /// All registered operators, sorted by name.
    pub fn supported_operators() -> Vec<&'static QueryMethod> {
        let mut methods: Vec<_> = OPERATORS.keys().collect();
        methods.sort_by(|a, b| a.name().cmp(b.name()));
        methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docquery_core::expr::{lit, param, Query};

    #[test]
    fn test_chain_operators_supported() {
        let expr = Query::source("families")
            .filter("f", param("f").field("Age").gt(5))
            .into_expr();
        assert!(OperatorRegistry::is_supported(&expr));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let expr = Query::source("families")
            .call("Skip", vec![lit(10)])
            .into_expr();
        assert!(!OperatorRegistry::is_supported(&expr));

        let err = OperatorRegistry::check(&QueryMethod::from_name("Skip"), &[]).unwrap_err();
        assert!(matches!(err, QueryError::Unsupported(_)));
        assert!(err.to_string().contains("Skip"));
    }

    #[test]
    fn test_any_requires_predicate() {
        let with_predicate = param("f")
            .field("Children")
            .any("c", param("c").field("Grade").gt(1));
        assert!(OperatorRegistry::is_supported(&with_predicate));

        let bare = param("f").field("Children").call("Any", vec![]);
        assert!(!OperatorRegistry::is_supported(&bare));
    }

    #[test]
    fn test_non_call_nodes_are_not_operators() {
        assert!(!OperatorRegistry::is_supported(&param("f")));
        assert!(!OperatorRegistry::is_supported(&lit(1)));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            OperatorRegistry::lookup(&QueryMethod::Take).map(|i| i.kind),
            Some(OperatorKind::Chain)
        );
        assert_eq!(
            OperatorRegistry::lookup(&QueryMethod::IsMatch).map(|i| i.kind),
            Some(OperatorKind::Predicate)
        );
        assert_eq!(OperatorRegistry::supported_operators().len(), 13);
    }
}
