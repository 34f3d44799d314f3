//! Fluent construction of expression trees.
//!
//! ```
//! use docquery_core::expr::{param, Query};
//!
//! let query = Query::source("families")
//!     .filter("f", param("f").field("LastName").equals("Andersen"))
//!     .order_by("f", param("f").field("RegistrationDate"))
//!     .take(1)
//!     .into_expr();
//! assert_eq!(query.node_name(), "call");
//! ```

use super::{BinaryOp, Constant, Expr, NewMember, QueryMethod, UnaryOp};
use crate::error::QueryError;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lambda parameter reference.
pub fn param(name: impl Into<String>) -> Expr {
    Expr::Parameter { name: name.into() }
}

/// Constant node.
pub fn lit(value: impl Into<Constant>) -> Expr {
    Expr::Constant {
        value: value.into(),
    }
}

pub fn lambda(parameter: impl Into<String>, body: Expr) -> Expr {
    Expr::Lambda {
        parameter: parameter.into(),
        body: Box::new(body),
    }
}

/// Multi-field result shape for projections.
pub fn new_object<I, S>(members: I) -> Expr
where
    I: IntoIterator<Item = (S, Expr)>,
    S: Into<String>,
{
    Expr::New {
        members: members
            .into_iter()
            .map(|(name, value)| NewMember {
                name: name.into(),
                value,
            })
            .collect(),
    }
}

/// Anything that can stand as an operand in the builder.
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

macro_rules! literal_into_expr {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoExpr for $ty {
                fn into_expr(self) -> Expr {
                    lit(self)
                }
            }
        )*
    };
}

literal_into_expr!(bool, i32, i64, u32, u64, usize, &str, String, Uuid, DateTime<Utc>, Constant);

impl<T: Into<Constant>> IntoExpr for Vec<T> {
    fn into_expr(self) -> Expr {
        lit(self)
    }
}

impl Expr {
    fn binary(self, op: BinaryOp, rhs: impl IntoExpr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(rhs.into_expr()),
        }
    }

    fn unary(self, op: UnaryOp) -> Expr {
        Expr::Unary {
            op,
            operand: Box::new(self),
        }
    }

    /// Member access.
    pub fn field(self, name: impl Into<String>) -> Expr {
        Expr::Member {
            target: Box::new(self),
            name: name.into(),
        }
    }

    pub fn equals(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn not_equals(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn lt(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn le(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn gt(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn ge(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Ge, rhs)
    }

    pub fn and(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::And, rhs)
    }

    pub fn or(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Or, rhs)
    }

    pub fn modulo(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Modulo, rhs)
    }

    pub fn add(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn not(self) -> Expr {
        self.unary(UnaryOp::Not)
    }

    pub fn convert(self) -> Expr {
        self.unary(UnaryOp::Convert)
    }

    pub fn length(self) -> Expr {
        self.unary(UnaryOp::Length)
    }

    pub fn index(self, index: impl IntoExpr) -> Expr {
        Expr::Index {
            target: Box::new(self),
            index: Box::new(index.into_expr()),
        }
    }

    /// `collection.Any(parameter => body)`
    pub fn any(self, parameter: impl Into<String>, body: Expr) -> Expr {
        Expr::Call {
            method: QueryMethod::Any,
            args: vec![self, lambda(parameter, body)],
        }
    }

    /// `collection.All(parameter => body)`
    pub fn all(self, parameter: impl Into<String>, body: Expr) -> Expr {
        Expr::Call {
            method: QueryMethod::All,
            args: vec![self, lambda(parameter, body)],
        }
    }

    /// `collection.Contains(item)`
    pub fn contains(self, item: impl IntoExpr) -> Expr {
        Expr::Call {
            method: QueryMethod::Contains,
            args: vec![self, item.into_expr()],
        }
    }

    /// `value.In(list)`
    pub fn is_in(self, list: impl IntoExpr) -> Expr {
        Expr::Call {
            method: QueryMethod::In,
            args: vec![self, list.into_expr()],
        }
    }

    /// `Regex.IsMatch(value, pattern)`
    pub fn is_match(self, pattern: impl Into<String>) -> Expr {
        Expr::Call {
            method: QueryMethod::IsMatch,
            args: vec![self, lit(pattern.into())],
        }
    }

    /// Call an arbitrary method with this expression as the first argument.
    pub fn call(self, method: impl Into<QueryMethod>, args: Vec<Expr>) -> Expr {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(self);
        all.extend(args);
        Expr::Call {
            method: method.into(),
            args: all,
        }
    }
}

impl From<bool> for Constant {
    fn from(v: bool) -> Self {
        Constant::Bool(v)
    }
}

macro_rules! number_into_constant {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Constant {
                fn from(v: $ty) -> Self {
                    Constant::Number(serde_json::Number::from(v))
                }
            }
        )*
    };
}

number_into_constant!(i32, i64, u32, u64, usize);

impl TryFrom<f64> for Constant {
    type Error = QueryError;

    /// Non-finite values have no JSON form.
    fn try_from(v: f64) -> Result<Self, Self::Error> {
        serde_json::Number::from_f64(v)
            .map(Constant::Number)
            .ok_or_else(|| QueryError::unsupported(format!("number '{}' has no JSON form", v)))
    }
}

impl From<&str> for Constant {
    fn from(v: &str) -> Self {
        Constant::String(v.to_string())
    }
}

impl From<String> for Constant {
    fn from(v: String) -> Self {
        Constant::String(v)
    }
}

impl From<Uuid> for Constant {
    fn from(v: Uuid) -> Self {
        Constant::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Constant {
    fn from(v: DateTime<Utc>) -> Self {
        Constant::DateTime(v)
    }
}

impl<T: Into<Constant>> From<Vec<T>> for Constant {
    fn from(v: Vec<T>) -> Self {
        Constant::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Constant>> From<Option<T>> for Constant {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Constant::Null)
    }
}

/// Builder for query call chains.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    expr: Expr,
}

impl Query {
    /// Start a query over the named collection.
    pub fn source(collection: impl Into<String>) -> Self {
        Self {
            expr: Expr::Source {
                collection: collection.into(),
            },
        }
    }

    fn chain(self, method: QueryMethod, mut args: Vec<Expr>) -> Self {
        args.insert(0, self.expr);
        Self {
            expr: Expr::Call { method, args },
        }
    }

    pub fn filter(self, parameter: &str, predicate: Expr) -> Self {
        self.chain(QueryMethod::Where, vec![lambda(parameter, predicate)])
    }

    pub fn order_by(self, parameter: &str, key: Expr) -> Self {
        self.chain(QueryMethod::OrderBy, vec![lambda(parameter, key)])
    }

    pub fn order_by_descending(self, parameter: &str, key: Expr) -> Self {
        self.chain(QueryMethod::OrderByDescending, vec![lambda(parameter, key)])
    }

    pub fn then_by(self, parameter: &str, key: Expr) -> Self {
        self.chain(QueryMethod::ThenBy, vec![lambda(parameter, key)])
    }

    pub fn then_by_descending(self, parameter: &str, key: Expr) -> Self {
        self.chain(QueryMethod::ThenByDescending, vec![lambda(parameter, key)])
    }

    pub fn take(self, count: u64) -> Self {
        self.chain(QueryMethod::Take, vec![lit(count)])
    }

    pub fn select(self, parameter: &str, shape: Expr) -> Self {
        self.chain(QueryMethod::Select, vec![lambda(parameter, shape)])
    }

    pub fn distinct(self) -> Self {
        self.chain(QueryMethod::Distinct, vec![])
    }

    /// Append any method call, supported or not.
    pub fn call(self, method: impl Into<QueryMethod>, args: Vec<Expr>) -> Self {
        self.chain(method.into(), args)
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn into_expr(self) -> Expr {
        self.expr
    }
}

impl From<Query> for Expr {
    fn from(query: Query) -> Self {
        query.expr
    }
}
