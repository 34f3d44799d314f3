//! Method identities for [`Expr::Call`](super::Expr::Call) nodes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Method identity, resolved once from its name when the node is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QueryMethod {
    Where,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Take,
    Select,
    Distinct,
    Any,
    All,
    Contains,
    In,
    IsMatch,
    /// Any method the translator does not know, kept by name.
    Other(String),
}

/// Sort direction of an ordering operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }
}

impl QueryMethod {
    pub fn from_name(name: &str) -> Self {
        match name {
            "Where" => Self::Where,
            "OrderBy" => Self::OrderBy,
            "OrderByDescending" => Self::OrderByDescending,
            "ThenBy" => Self::ThenBy,
            "ThenByDescending" => Self::ThenByDescending,
            "Take" => Self::Take,
            "Select" => Self::Select,
            "Distinct" => Self::Distinct,
            "Any" => Self::Any,
            "All" => Self::All,
            "Contains" => Self::Contains,
            "In" => Self::In,
            "IsMatch" => Self::IsMatch,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Where => "Where",
            Self::OrderBy => "OrderBy",
            Self::OrderByDescending => "OrderByDescending",
            Self::ThenBy => "ThenBy",
            Self::ThenByDescending => "ThenByDescending",
            Self::Take => "Take",
            Self::Select => "Select",
            Self::Distinct => "Distinct",
            Self::Any => "Any",
            Self::All => "All",
            Self::Contains => "Contains",
            Self::In => "In",
            Self::IsMatch => "IsMatch",
            Self::Other(name) => name,
        }
    }

    /// Direction of a sort operator, `None` for everything else.
    pub fn sort_direction(&self) -> Option<SortDirection> {
        match self {
            Self::OrderBy | Self::ThenBy => Some(SortDirection::Ascending),
            Self::OrderByDescending | Self::ThenByDescending => Some(SortDirection::Descending),
            _ => None,
        }
    }

    /// True for `ThenBy` / `ThenByDescending`.
    pub fn is_chained_sort(&self) -> bool {
        matches!(self, Self::ThenBy | Self::ThenByDescending)
    }
}

impl From<String> for QueryMethod {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<&str> for QueryMethod {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

impl From<QueryMethod> for String {
    fn from(method: QueryMethod) -> Self {
        method.name().to_string()
    }
}

impl fmt::Display for QueryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_roundtrip() {
        for name in [
            "Where",
            "OrderBy",
            "OrderByDescending",
            "ThenBy",
            "ThenByDescending",
            "Take",
            "Select",
            "Distinct",
            "Any",
            "All",
            "Contains",
            "In",
            "IsMatch",
        ] {
            let method = QueryMethod::from_name(name);
            assert!(!matches!(method, QueryMethod::Other(_)), "{}", name);
            assert_eq!(method.name(), name);
        }
    }

    #[test]
    fn test_unknown_method_kept_by_name() {
        let method = QueryMethod::from_name("Skip");
        assert_eq!(method, QueryMethod::Other("Skip".to_string()));
        assert_eq!(method.to_string(), "Skip");
    }

    #[test]
    fn test_sort_direction() {
        assert_eq!(
            QueryMethod::ThenByDescending.sort_direction(),
            Some(SortDirection::Descending)
        );
        assert_eq!(QueryMethod::Take.sort_direction(), None);
        assert!(QueryMethod::ThenBy.is_chained_sort());
        assert!(!QueryMethod::OrderBy.is_chained_sort());
    }
}
